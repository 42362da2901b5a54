//! 实时柱状视图（仅显示最新一条记录）

use ratatui::{
    Frame,
    layout::Rect,
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
};

use super::format_ms;
use crate::model::record::MetricRecord;

pub const TITLE: &str = "Live DB Tracing";
pub const WAITING: &str = "Waiting for DB interaction...";

const LABEL_WIDTH: usize = 8;
/// 数值部分预留宽度（" 12345.67 ms ≈ RTT"）
const VALUE_WIDTH: usize = 20;

/// Non-DB 的显示值
///
/// DB 未上报时用 RTT 作近似，第二个值为 true 表示是近似值。
/// 只影响显示，记录本身保持缺失。
pub fn non_db_display(record: &MetricRecord) -> (f64, bool) {
    match record.non_db_latency_ms() {
        Some(v) => (v, false),
        None => (record.rtt_ms(), true),
    }
}

fn bar(value: f64, ms_per_cell: f64, max_cells: usize) -> String {
    let cells = if value > 0.0 && ms_per_cell > 0.0 {
        ((value / ms_per_cell).round() as usize).min(max_cells)
    } else {
        0
    };
    "█".repeat(cells)
}

fn bar_line(label: &str, value: f64, color: Color, ms_per_cell: f64, max_cells: usize) -> Line<'static> {
    Line::from(vec![
        Span::raw(format!("{:<width$}", label, width = LABEL_WIDTH)),
        Span::styled(bar(value, ms_per_cell, max_cells), Style::default().fg(color)),
        Span::raw(format!(" {} ms", format_ms(Some(value)))),
    ])
}

pub fn bar_lines(record: Option<&MetricRecord>, ms_per_cell: f64, max_cells: usize) -> Vec<Line<'static>> {
    let Some(record) = record else {
        return vec![Line::from(WAITING)];
    };

    let mut lines = vec![
        Line::from(format!(
            "Request #{}  {}  {}",
            record.sequence(),
            record.source_url(),
            record.captured_at().format("%H:%M:%S%.3f")
        )),
        Line::from(""),
        bar_line("RTT", record.rtt_ms(), Color::Cyan, ms_per_cell, max_cells),
    ];

    match record.db_latency_ms() {
        Some(db) => lines.push(bar_line("DB", db, Color::Yellow, ms_per_cell, max_cells)),
        None => lines.push(Line::from(format!("{:<width$}N/A", "DB", width = LABEL_WIDTH))),
    }

    let (non_db, approximated) = non_db_display(record);
    let mut non_db_line = bar_line("Non-DB", non_db, Color::Magenta, ms_per_cell, max_cells);
    if approximated {
        non_db_line.push_span(Span::styled(" ≈ RTT", Style::default().fg(Color::DarkGray)));
    }
    lines.push(non_db_line);

    lines
}

pub fn render_bar(frame: &mut Frame, area: Rect, record: Option<&MetricRecord>, ms_per_cell: f64) {
    let max_cells = (area.width as usize).saturating_sub(2 + LABEL_WIDTH + VALUE_WIDTH);
    let paragraph = Paragraph::new(bar_lines(record, ms_per_cell, max_cells))
        .block(Block::default().borders(Borders::ALL).title(TITLE));
    frame.render_widget(paragraph, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace_log::testing::snapshot_of;

    fn text(line: &Line) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    #[test]
    fn test_waiting_when_empty() {
        let lines = bar_lines(None, 20.0, 40);
        assert_eq!(lines.len(), 1);
        assert_eq!(text(&lines[0]), WAITING);
    }

    #[test]
    fn test_bars_scale_with_value() {
        let snapshot = snapshot_of(&[(100.0, Some(40.0))]);
        let lines = bar_lines(snapshot.last(), 20.0, 40);

        assert_eq!(text(&lines[2]), "RTT     █████ 100.00 ms");
        assert_eq!(text(&lines[3]), "DB      ██ 40.00 ms");
        assert_eq!(text(&lines[4]), "Non-DB  ███ 60.00 ms");
    }

    #[test]
    fn test_unknown_db_shows_rtt_proxy_without_touching_record() {
        let snapshot = snapshot_of(&[(30.0, None)]);
        let record = snapshot.last().unwrap();
        let lines = bar_lines(Some(record), 10.0, 40);

        assert_eq!(text(&lines[3]), "DB      N/A");
        assert_eq!(text(&lines[4]), "Non-DB  ███ 30.00 ms ≈ RTT");
        assert_eq!(non_db_display(record), (30.0, true));
        assert_eq!(record.non_db_latency_ms(), None);
    }

    #[test]
    fn test_bar_is_clamped() {
        assert_eq!(bar(1000.0, 1.0, 5).chars().count(), 5);
        assert_eq!(bar(-4.0, 1.0, 5), "");
    }
}
