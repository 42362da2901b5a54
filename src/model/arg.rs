//! 命令行参数

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::render::ViewMode;

/// Decompose request latency into server-reported DB time and everything else
#[derive(Parser, Debug)]
#[command(name = "db-trace", version)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Poll an endpoint N times and print the per-request decomposition
    Trace(TraceArgs),
    /// Capture XHR/fetch traffic from a browser session or a HAR file with a live view
    Live(LiveArgs),
    /// Run the sample producer that reports db_latency_ms
    DemoServer(DemoServerArgs),
}

#[derive(clap::Args, Debug)]
pub struct TraceArgs {
    /// API endpoint to test
    #[arg(long)]
    pub url: String,

    /// Number of requests to send
    #[arg(long, default_value = "1")]
    pub repeat: NonZeroU32,

    /// Write results to this CSV file
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Do not render the latency chart
    #[arg(long)]
    pub no_chart: bool,
}

#[derive(clap::Args, Debug)]
pub struct LiveArgs {
    /// Live view mode
    #[arg(long, value_enum, default_value_t = ViewMode::Table)]
    pub view: ViewMode,

    /// Chromium remote debugging endpoint (http://host:port or ws:// page URL)
    #[arg(long, conflicts_with = "har")]
    pub devtools: Option<String>,

    /// Navigate the attached page to this URL after attaching
    #[arg(long, conflicts_with = "har")]
    pub navigate: Option<String>,

    /// Replay a HAR capture instead of attaching to a browser
    #[arg(long)]
    pub har: Option<PathBuf>,

    /// Maximum capture time in seconds (overrides config)
    #[arg(long)]
    pub max_wait: Option<u64>,

    /// Write results to this CSV file when capture ends
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct DemoServerArgs {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub bind: SocketAddr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_defaults() {
        let args = Args::try_parse_from(["db-trace", "trace", "--url", "http://localhost:5000/api/fetch-users"]).unwrap();
        let Command::Trace(trace) = args.command else {
            panic!("期望 trace 子命令");
        };
        assert_eq!(trace.repeat.get(), 1);
        assert!(trace.output.is_none());
        assert!(!trace.no_chart);
        assert!(args.config.is_none());
    }

    #[test]
    fn test_repeat_must_be_positive() {
        assert!(Args::try_parse_from(["db-trace", "trace", "--url", "http://x", "--repeat", "0"]).is_err());
        assert!(Args::try_parse_from(["db-trace", "trace", "--repeat", "3"]).is_err());
    }

    #[test]
    fn test_live_view_values() {
        let args = Args::try_parse_from(["db-trace", "live", "--view", "bar", "--har", "a.har"]).unwrap();
        let Command::Live(live) = args.command else {
            panic!("期望 live 子命令");
        };
        assert_eq!(live.view, ViewMode::Bar);
        assert_eq!(live.har, Some(PathBuf::from("a.har")));

        assert!(Args::try_parse_from(["db-trace", "live", "--view", "pie"]).is_err());
        assert!(Args::try_parse_from(["db-trace", "live", "--har", "a.har", "--devtools", "http://x"]).is_err());
    }

    #[test]
    fn test_global_config_flag() {
        let args = Args::try_parse_from(["db-trace", "demo-server", "--config", "custom.json"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("custom.json")));
        assert!(matches!(args.command, Command::DemoServer(_)));
    }
}
