//! 渲染端
//!
//! - 实时：`live`（表格 / 柱状视图，随追加或定时重绘）
//! - 批量：`batch`（逐条控制台输出、CSV 导出、折线图），在会话终止后执行

pub mod bar;
pub mod batch;
pub mod chart;
pub mod console;
pub mod csv;
pub mod live;
pub mod log_capture;
pub mod table;

/// 实时视图模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ViewMode {
    /// 全部记录的表格
    #[default]
    Table,
    /// 仅最新一条记录的柱状图
    Bar,
}

/// 毫秒值格式化为两位小数，缺失时为 `N/A`
pub fn format_ms(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.2}", v),
        None => "N/A".to_string(),
    }
}
