//! 采集样本与指标记录

use chrono::{DateTime, Utc};
use serde::Serialize;

/// 采集源产生的原始样本（尚未分解）
#[derive(Debug, Clone)]
pub struct RawSample {
    /// 请求/响应对应的 URL
    pub source_url: String,
    /// 客户端观测到的往返时间（毫秒）
    pub rtt_ms: f64,
    /// 已解析的响应体；None 表示响应体不可用或不是 JSON
    pub body: Option<serde_json::Value>,
    /// 采集时间
    pub captured_at: DateTime<Utc>,
}

impl RawSample {
    pub fn new(source_url: impl Into<String>, rtt_ms: f64, body: Option<serde_json::Value>) -> Self {
        Self {
            source_url: source_url.into(),
            rtt_ms,
            body,
            captured_at: Utc::now(),
        }
    }
}

/// 分解结果（尚未分配序号）
#[derive(Debug, Clone, PartialEq)]
pub struct Decomposed {
    pub source_url: String,
    pub rtt_ms: f64,
    pub db_latency_ms: Option<f64>,
    pub non_db_latency_ms: Option<f64>,
    pub captured_at: DateTime<Utc>,
}

/// 单条请求的延迟分解记录
///
/// 追加到 TraceLog 时分配序号，此后不可变。
/// `db_latency_ms` 缺失表示服务端未上报，与 0 含义不同。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRecord {
    sequence: u64,
    source_url: String,
    rtt_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    db_latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    non_db_latency_ms: Option<f64>,
    captured_at: DateTime<Utc>,
}

impl MetricRecord {
    pub(crate) fn sequenced(sequence: u64, decomposed: Decomposed) -> Self {
        Self {
            sequence,
            source_url: decomposed.source_url,
            rtt_ms: decomposed.rtt_ms,
            db_latency_ms: decomposed.db_latency_ms,
            non_db_latency_ms: decomposed.non_db_latency_ms,
            captured_at: decomposed.captured_at,
        }
    }

    /// 从 1 开始的追加序号
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn rtt_ms(&self) -> f64 {
        self.rtt_ms
    }

    /// 服务端上报的数据库耗时（未上报时为 None）
    pub fn db_latency_ms(&self) -> Option<f64> {
        self.db_latency_ms
    }

    /// RTT − DB；DB 未知时为 None，可能为负（时钟偏差）
    pub fn non_db_latency_ms(&self) -> Option<f64> {
        self.non_db_latency_ms
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}
