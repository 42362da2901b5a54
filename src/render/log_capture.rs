//! 实时视图的日志捕获
//!
//! 实时模式下终端处于备用屏幕，日志不能直接写到 stderr，
//! 改为写入内存缓冲，由实时视图在底部显示最近几行。

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;

/// 缓冲中最多保留的行数
const MAX_LOG_LINES: usize = 500;

/// 日志行缓冲（tracing 写入，实时视图读取）
#[derive(Clone, Default)]
pub struct LogBuffer {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock();
        if lines.len() >= MAX_LOG_LINES {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// 最近 `count` 行，按写入顺序
    pub fn recent_lines(&self, count: usize) -> Vec<String> {
        let lines = self.lines.lock();
        let skip = lines.len().saturating_sub(count);
        lines.iter().skip(skip).cloned().collect()
    }
}

/// 按行切分后写入 `LogBuffer`
pub struct LogWriter {
    buffer: LogBuffer,
    pending: String,
}

impl LogWriter {
    pub fn new(buffer: LogBuffer) -> Self {
        Self {
            buffer,
            pending: String::new(),
        }
    }

    fn push_pending(&mut self) {
        if !self.pending.is_empty() {
            self.buffer.push(std::mem::take(&mut self.pending));
        }
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        for c in text.chars() {
            if c == '\n' {
                self.push_pending();
            } else {
                self.pending.push(c);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.push_pending();
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        self.push_pending();
    }
}

/// tracing-subscriber 的 MakeWriter
pub struct LogMakeWriter {
    buffer: LogBuffer,
}

impl LogMakeWriter {
    pub fn new(buffer: LogBuffer) -> Self {
        Self { buffer }
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogMakeWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter::new(self.buffer.clone())
    }
}
