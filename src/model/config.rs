use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// db-trace 运行配置
///
/// 所有字段都有默认值，配置文件缺失时直接使用默认配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// HTTP 代理地址（可选）
    /// 支持格式: http://host:port, https://host:port, socks5://host:port
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,

    /// 流式采集最长等待时间（秒）
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,

    /// 实时视图刷新间隔（毫秒）
    #[serde(default = "default_render_tick_ms")]
    pub render_tick_ms: u64,

    /// 采集 → 处理 队列容量
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// 条形视图比例：每个 █ 代表的毫秒数
    #[serde(default = "default_bar_ms_per_cell")]
    pub bar_ms_per_cell: f64,

    /// 批量图表宽度（字符）
    #[serde(default = "default_chart_width")]
    pub chart_width: u16,

    /// 批量图表高度（行）
    #[serde(default = "default_chart_height")]
    pub chart_height: u16,

    /// 浏览器 DevTools 端点（HTTP 发现地址或 ws:// 页面地址）
    #[serde(default = "default_devtools_endpoint")]
    pub devtools_endpoint: String,

    /// 配置文件路径（运行时元数据，不写入 JSON）
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_wait_secs() -> u64 {
    120
}

fn default_render_tick_ms() -> u64 {
    250
}

fn default_channel_capacity() -> usize {
    256
}

fn default_bar_ms_per_cell() -> f64 {
    20.0
}

fn default_chart_width() -> u16 {
    100
}

fn default_chart_height() -> u16 {
    24
}

fn default_devtools_endpoint() -> String {
    "http://127.0.0.1:9222".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            proxy_url: None,
            max_wait_secs: default_max_wait_secs(),
            render_tick_ms: default_render_tick_ms(),
            channel_capacity: default_channel_capacity(),
            bar_ms_per_cell: default_bar_ms_per_cell(),
            chart_width: default_chart_width(),
            chart_height: default_chart_height(),
            devtools_endpoint: default_devtools_endpoint(),
            config_path: None,
        }
    }
}

impl Config {
    /// 获取默认配置文件路径
    pub fn default_config_path() -> &'static str {
        "db-trace.json"
    }

    /// 从文件加载配置
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            // 配置文件不存在，返回默认配置
            let mut config = Self::default();
            config.config_path = Some(path.to_path_buf());
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        let mut config: Config = serde_json::from_str(&content)
            .with_context(|| format!("解析配置文件失败: {}", path.display()))?;
        config.config_path = Some(path.to_path_buf());
        config.validate()?;
        Ok(config)
    }

    /// 获取配置文件路径（如果有）
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.channel_capacity == 0 {
            anyhow::bail!("channelCapacity 必须大于 0");
        }
        if !(self.bar_ms_per_cell.is_finite() && self.bar_ms_per_cell > 0.0) {
            anyhow::bail!("barMsPerCell 必须为正数");
        }
        if self.render_tick_ms == 0 {
            anyhow::bail!("renderTickMs 必须大于 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let config = Config::load(&path).unwrap();

        assert_eq!(config.max_wait_secs, 120);
        assert_eq!(config.render_tick_ms, 250);
        assert_eq!(config.config_path(), Some(path.as_path()));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db-trace.json");
        fs::write(&path, r#"{"maxWaitSecs": 5, "barMsPerCell": 10}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_wait_secs, 5);
        assert_eq!(config.bar_ms_per_cell, 10.0);
        assert_eq!(config.channel_capacity, 256);
        assert_eq!(config.devtools_endpoint, "http://127.0.0.1:9222");
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db-trace.json");
        fs::write(&path, r#"{"channelCapacity": 0}"#).unwrap();

        assert!(Config::load(&path).is_err());
    }
}
