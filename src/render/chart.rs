//! 批量折线图
//!
//! 三条曲线（Total RTT / DB Latency / Non-DB Delay）按请求序号展开，
//! 用 ratatui `Chart` 画到离屏 Buffer 后转成文本输出。
//! DB 未上报的记录在 DB / Non-DB 曲线上留空，把曲线切成多段。

use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Style},
    symbols::Marker,
    text::Span,
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Widget},
};

use crate::model::record::MetricRecord;
use crate::trace_log::TraceSnapshot;

pub const TITLE: &str = "Latency Tracing Report";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Rtt,
    Db,
    NonDb,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Rtt, Metric::Db, Metric::NonDb];

    pub fn label(self) -> &'static str {
        match self {
            Metric::Rtt => "Total RTT",
            Metric::Db => "DB Latency",
            Metric::NonDb => "Non-DB Delay",
        }
    }

    pub fn value(self, record: &MetricRecord) -> Option<f64> {
        match self {
            Metric::Rtt => Some(record.rtt_ms()),
            Metric::Db => record.db_latency_ms(),
            Metric::NonDb => record.non_db_latency_ms(),
        }
    }

    // 文本输出没有颜色，靠不同的点阵符号区分曲线
    fn marker(self) -> Marker {
        match self {
            Metric::Rtt => Marker::Dot,
            Metric::Db => Marker::Bar,
            Metric::NonDb => Marker::Braille,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Metric::Rtt => "•",
            Metric::Db => "▄",
            Metric::NonDb => "⣿",
        }
    }

    fn color(self) -> Color {
        match self {
            Metric::Rtt => Color::Cyan,
            Metric::Db => Color::Yellow,
            Metric::NonDb => Color::Magenta,
        }
    }
}

/// 一条曲线：连续的点组成一段
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub metric: Metric,
    pub segments: Vec<Vec<(f64, f64)>>,
}

pub fn latency_series(snapshot: &TraceSnapshot) -> Vec<Series> {
    Metric::ALL
        .iter()
        .map(|&metric| {
            let mut segments = Vec::new();
            let mut current = Vec::new();
            for record in snapshot.iter() {
                match metric.value(record) {
                    Some(v) => current.push((record.sequence() as f64, v)),
                    None if !current.is_empty() => segments.push(std::mem::take(&mut current)),
                    None => {}
                }
            }
            if !current.is_empty() {
                segments.push(current);
            }
            Series { metric, segments }
        })
        .collect()
}

/// 坐标范围：x 从 1 到记录数；y 包含 0 与所有值（Non-DB 可能为负）
fn bounds(series: &[Series], len: usize) -> ([f64; 2], [f64; 2]) {
    let x = [1.0, len.max(2) as f64];

    let values = series
        .iter()
        .flat_map(|s| s.segments.iter().flatten().map(|(_, y)| *y));
    let (min, max) = values.fold((0.0f64, 0.0f64), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let y_max = if max > 0.0 { max * 1.1 } else { 1.0 };
    let y_min = if min < 0.0 { min * 1.1 } else { 0.0 };

    (x, [y_min, y_max])
}

pub fn render_chart(snapshot: &TraceSnapshot, width: u16, height: u16) -> Buffer {
    let series = latency_series(snapshot);
    let (x, y) = bounds(&series, snapshot.len());

    let datasets: Vec<Dataset> = series
        .iter()
        .flat_map(|s| {
            s.segments.iter().map(move |segment| {
                let graph_type = if segment.len() == 1 {
                    GraphType::Scatter
                } else {
                    GraphType::Line
                };
                Dataset::default()
                    .marker(s.metric.marker())
                    .graph_type(graph_type)
                    .style(Style::default().fg(s.metric.color()))
                    .data(segment)
            })
        })
        .collect();

    let x_axis = Axis::default()
        .title("Request #")
        .bounds(x)
        .labels(vec![
            Span::raw(format!("{}", x[0])),
            Span::raw(format!("{}", x[1])),
        ]);
    let y_axis = Axis::default()
        .title("Latency (ms)")
        .bounds(y)
        .labels(vec![
            Span::raw(format!("{:.0}", y[0])),
            Span::raw(format!("{:.0}", (y[0] + y[1]) / 2.0)),
            Span::raw(format!("{:.0}", y[1])),
        ]);

    let chart = Chart::new(datasets)
        .block(Block::default().borders(Borders::ALL).title(TITLE))
        .x_axis(x_axis)
        .y_axis(y_axis);

    let area = Rect::new(0, 0, width, height);
    let mut buffer = Buffer::empty(area);
    chart.render(area, &mut buffer);
    buffer
}

/// Buffer 逐行转文本（去掉行尾空白）
pub fn buffer_to_text(buffer: &Buffer) -> Vec<String> {
    let width = (buffer.area.width as usize).max(1);
    buffer
        .content
        .chunks(width)
        .map(|row| {
            let line: String = row.iter().map(|cell| cell.symbol()).collect();
            line.trim_end().to_string()
        })
        .collect()
}

pub fn legend() -> String {
    Metric::ALL
        .iter()
        .map(|m| format!("{} {}", m.symbol(), m.label()))
        .collect::<Vec<_>>()
        .join("   ")
}

/// 图表 + 图例的完整文本
pub fn chart_text(snapshot: &TraceSnapshot, width: u16, height: u16) -> String {
    let mut lines = buffer_to_text(&render_chart(snapshot, width, height));
    lines.push(legend());
    lines.join("\n")
}
