//! 日志初始化
//!
//! - 批量模式：写到 stderr，stdout 只留给逐条结果
//! - 实时模式：写入 `LogBuffer`，由实时视图显示最近几行
//!
//! 过滤级别由 `RUST_LOG` 控制，默认 `info`

use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use crate::render::log_capture::{LogBuffer, LogMakeWriter};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init_stderr_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(env_filter()),
        )
        .init();
}

pub fn init_buffer_logging() -> LogBuffer {
    let buffer = LogBuffer::new();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(LogMakeWriter::new(buffer.clone()))
                .with_ansi(false)
                .with_target(false)
                .compact()
                .with_filter(env_filter()),
        )
        .init();
    buffer
}
