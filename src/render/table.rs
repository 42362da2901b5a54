//! 实时表格视图

use ratatui::{
    Frame,
    layout::{Constraint, Rect},
    style::{Modifier, Style},
    widgets::{Block, Borders, Row, Table},
};

use super::format_ms;
use crate::trace_log::TraceSnapshot;

pub const TITLE: &str = "Live DB Tracing Report";
pub const HEADERS: [&str; 4] = ["Req #", "RTT (ms)", "DB (ms)", "Non-DB (ms)"];

/// 每条记录一行；缺失值显示 `N/A`
pub fn table_rows(snapshot: &TraceSnapshot) -> Vec<[String; 4]> {
    snapshot
        .iter()
        .map(|r| {
            [
                r.sequence().to_string(),
                format_ms(Some(r.rtt_ms())),
                format_ms(r.db_latency_ms()),
                format_ms(r.non_db_latency_ms()),
            ]
        })
        .collect()
}

pub fn render_table(frame: &mut Frame, area: Rect, snapshot: &TraceSnapshot) {
    // 边框 2 行 + 表头 1 行，其余空间显示最新的记录
    let visible = area.height.saturating_sub(3) as usize;
    let rows = table_rows(snapshot);
    let skip = rows.len().saturating_sub(visible);

    let header = Row::new(HEADERS).style(Style::default().add_modifier(Modifier::BOLD));
    let widths = [
        Constraint::Length(8),
        Constraint::Length(12),
        Constraint::Length(12),
        Constraint::Length(14),
    ];
    let table = Table::new(rows.into_iter().skip(skip).map(Row::new), widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(TITLE));

    frame.render_widget(table, area);
}
