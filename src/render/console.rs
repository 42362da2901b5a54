//! 批量模式的逐条控制台输出

use std::io::{self, Write};

use crate::decompose::DB_LATENCY_FIELD;
use crate::error::CaptureError;
use crate::model::record::MetricRecord;
use crate::session::CycleObserver;

/// 每个轮询周期结束后立即输出结果
pub struct ConsoleReporter<W: Write> {
    out: W,
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    fn write_record(&mut self, cycle: u32, record: &MetricRecord) -> io::Result<()> {
        writeln!(self.out, "\nRequest {}:", cycle)?;
        writeln!(self.out, "  Total RTT: {:.2} ms", record.rtt_ms())?;
        match (record.db_latency_ms(), record.non_db_latency_ms()) {
            (Some(db), Some(non_db)) => {
                writeln!(self.out, "  DB Latency (server): {:.2} ms", db)?;
                writeln!(self.out, "  Non-DB Delay: {:.2} ms", non_db)?;
            }
            _ => writeln!(self.out, "  '{}' not found in response", DB_LATENCY_FIELD)?,
        }
        self.out.flush()
    }

    fn write_failure(&mut self, cycle: u32, error: &CaptureError) -> io::Result<()> {
        writeln!(self.out, "\nRequest {}:", cycle)?;
        writeln!(self.out, "  Request failed: {}", error)?;
        self.out.flush()
    }
}

impl<W: Write> CycleObserver for ConsoleReporter<W> {
    fn on_record(&mut self, cycle: u32, record: &MetricRecord) {
        if let Err(e) = self.write_record(cycle, record) {
            tracing::warn!("输出周期结果失败: {}", e);
        }
    }

    fn on_failure(&mut self, cycle: u32, error: &CaptureError) {
        if let Err(e) = self.write_failure(cycle, error) {
            tracing::warn!("输出周期结果失败: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace_log::testing::snapshot_of;

    #[test]
    fn test_report_wording() {
        let snapshot = snapshot_of(&[(50.0, Some(10.0)), (30.0, None)]);
        let mut out = Vec::new();
        let mut reporter = ConsoleReporter::new(&mut out);
        let mut records = snapshot.iter();

        reporter.on_record(1, records.next().unwrap());
        reporter.on_failure(2, &CaptureError::Timeout);
        reporter.on_record(3, records.next().unwrap());
        drop(reporter);

        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "\nRequest 1:\n  Total RTT: 50.00 ms\n  DB Latency (server): 10.00 ms\n  Non-DB Delay: 40.00 ms\n\
             \nRequest 2:\n  Request failed: request timed out\n\
             \nRequest 3:\n  Total RTT: 30.00 ms\n  'db_latency_ms' not found in response\n"
        );
    }
}
