mod capture;
mod decompose;
mod demo_server;
mod error;
mod http_client;
mod interrupt;
mod logging;
mod model;
mod render;
mod session;
mod trace_log;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use capture::stream::CaptureSurface;
use capture::{DevToolsSurface, HarSurface, HttpProbe, PollingSource, StreamSource};
use http_client::ClientKind;
use model::arg::{Args, Command, LiveArgs, TraceArgs};
use model::config::Config;
use render::batch::{BatchSink, ChartSize};
use render::console::ConsoleReporter;
use render::live::LiveSink;
use render::log_capture::LogBuffer;
use session::{SessionController, SessionReport, SessionState};

/// 批量模式下没有采集到任何记录时的退出码
const EXIT_NO_RECORDS: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // 实时模式占用终端，日志改写到内存缓冲
    let log_buffer = if matches!(args.command, Command::Live(_)) {
        Some(logging::init_buffer_logging())
    } else {
        logging::init_stderr_logging();
        None
    };

    match run(args, log_buffer).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args, log_buffer: Option<LogBuffer>) -> anyhow::Result<ExitCode> {
    let config_path = args
        .config
        .unwrap_or_else(|| PathBuf::from(Config::default_config_path()));
    let config = Config::load(&config_path)?;
    tracing::debug!(path = ?config.config_path(), "配置已加载");

    match args.command {
        Command::Trace(trace) => run_trace(&config, trace).await,
        Command::Live(live) => run_live(&config, live, log_buffer.unwrap_or_default()).await,
        Command::DemoServer(demo) => {
            demo_server::serve(demo.bind).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_trace(config: &Config, args: TraceArgs) -> anyhow::Result<ExitCode> {
    let client = http_client::build_client(config, ClientKind::Probe)?;
    let source = PollingSource::new(HttpProbe::new(client), args.url, args.repeat);
    let mut session = SessionController::new(config.channel_capacity);

    interrupt::spawn_ctrl_c_handler(session.cancellation());

    let mut reporter = ConsoleReporter::new(io::stdout());
    session.run_polling(source, &mut reporter).await?;

    let chart = (!args.no_chart).then_some(ChartSize {
        width: config.chart_width,
        height: config.chart_height,
    });
    let sink = BatchSink::new(args.output, chart);
    let report = session.finalize(&sink, &mut io::stdout())?;
    print_summary(&report);

    if report.records() == 0 {
        return Ok(ExitCode::from(EXIT_NO_RECORDS));
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_live(config: &Config, args: LiveArgs, logs: LogBuffer) -> anyhow::Result<ExitCode> {
    let max_wait = Duration::from_secs(args.max_wait.unwrap_or(config.max_wait_secs));
    let mut session = SessionController::new(config.channel_capacity);
    let live = LiveSink::new(
        args.view,
        session.view(),
        session.subscribe_updates(),
        session.subscribe_state(),
        session.cancellation(),
    )
    .with_logs(logs)
    .with_tick(Duration::from_millis(config.render_tick_ms))
    .with_scale(config.bar_ms_per_cell);

    match args.har {
        Some(path) => {
            let source = StreamSource::new(HarSurface::new(path), max_wait);
            run_live_session(&mut session, live, source).await?;
        }
        None => {
            let endpoint = args
                .devtools
                .unwrap_or_else(|| config.devtools_endpoint.clone());
            let client = http_client::build_client(config, ClientKind::Discovery)?;
            let surface = DevToolsSurface::new(endpoint, args.navigate, client);
            run_live_session(&mut session, live, StreamSource::new(surface, max_wait)).await?;
        }
    }

    let sink = BatchSink::new(args.output, None);
    let report = session.finalize(&sink, &mut io::stdout())?;
    print_summary(&report);
    Ok(ExitCode::SUCCESS)
}

/// 实时视图与流式会话并行运行，视图退出后返回
async fn run_live_session<S>(
    session: &mut SessionController,
    live: LiveSink,
    source: StreamSource<S>,
) -> anyhow::Result<SessionState>
where
    S: CaptureSurface + 'static,
{
    let ui = tokio::spawn(live.run());

    let result = session.run_stream(source).await;
    if result.is_err() {
        // 让实时视图退出并恢复终端
        session.cancellation().cancel();
    }

    ui.await.context("实时视图任务异常退出")??;
    Ok(result?)
}

fn print_summary(report: &SessionReport) {
    println!(
        "\nSession {}: {} record(s) captured, {} failed cycle(s), {}",
        report.id.simple(),
        report.records(),
        report.failed_cycles,
        report.state
    );
}
