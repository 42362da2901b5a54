//! 批量输出：会话终止后的 CSV 导出与折线图

use std::io::Write;
use std::path::PathBuf;

use super::chart::chart_text;
use super::csv::export_csv;
use crate::error::SessionError;
use crate::trace_log::TraceSnapshot;

/// 图表尺寸（字符单元）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChartSize {
    pub width: u16,
    pub height: u16,
}

#[derive(Debug, Clone, Default)]
pub struct BatchSink {
    csv_path: Option<PathBuf>,
    chart: Option<ChartSize>,
}

impl BatchSink {
    pub fn new(csv_path: Option<PathBuf>, chart: Option<ChartSize>) -> Self {
        Self { csv_path, chart }
    }

    /// 输出图表（有记录时）并导出 CSV（指定路径时）
    pub fn finalize<W: Write>(&self, snapshot: &TraceSnapshot, out: &mut W) -> Result<(), SessionError> {
        if let Some(size) = self.chart {
            if snapshot.is_empty() {
                writeln!(out, "\nNo records captured, chart skipped.")?;
            } else {
                writeln!(out)?;
                writeln!(out, "{}", chart_text(snapshot, size.width, size.height))?;
            }
        }

        if let Some(path) = &self.csv_path {
            export_csv(snapshot, path).map_err(|e| {
                SessionError::Sink(format!("写入 CSV 失败 {}: {}", path.display(), e))
            })?;
            tracing::info!(path = %path.display(), records = snapshot.len(), "CSV 已导出");
            writeln!(out, "\nResults saved to {}", path.display())?;
        }

        out.flush()?;
        Ok(())
    }
}
