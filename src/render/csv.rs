//! CSV 导出
//!
//! 缺失的 DB / Non-DB 值写为空字段，不写 0

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::trace_log::TraceSnapshot;

pub const CSV_HEADER: &str = "request,rtt_ms,db_latency_ms,non_db_delay_ms";

fn field(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_default()
}

pub fn write_csv<W: Write>(snapshot: &TraceSnapshot, out: &mut W) -> io::Result<()> {
    writeln!(out, "{}", CSV_HEADER)?;
    for record in snapshot.iter() {
        writeln!(
            out,
            "{},{:.2},{},{}",
            record.sequence(),
            record.rtt_ms(),
            field(record.db_latency_ms()),
            field(record.non_db_latency_ms())
        )?;
    }
    Ok(())
}

pub fn export_csv(snapshot: &TraceSnapshot, path: &Path) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    write_csv(snapshot, &mut out)?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace_log::testing::snapshot_of;

    #[test]
    fn test_three_rows_plus_header() {
        let snapshot = snapshot_of(&[(50.0, Some(10.0)), (60.0, Some(10.0)), (40.0, Some(10.0))]);
        let mut out = Vec::new();
        write_csv(&snapshot, &mut out).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "request,rtt_ms,db_latency_ms,non_db_delay_ms\n\
             1,50.00,10.00,40.00\n\
             2,60.00,10.00,50.00\n\
             3,40.00,10.00,30.00\n"
        );
    }

    #[test]
    fn test_absent_values_are_empty_not_zero() {
        let snapshot = snapshot_of(&[(30.0, None), (12.0, Some(0.0))]);
        let mut out = Vec::new();
        write_csv(&snapshot, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        let rows: Vec<&str> = text.lines().skip(1).collect();
        assert_eq!(rows, vec!["1,30.00,,", "2,12.00,0.00,12.00"]);
    }

    #[test]
    fn test_export_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.csv");
        export_csv(&snapshot_of(&[(8.0, Some(3.0))]), &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.starts_with(CSV_HEADER));
    }
}
