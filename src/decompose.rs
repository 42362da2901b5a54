//! 延迟分解
//!
//! 原始样本 → 分解结果，无状态、确定性：
//! - 服务端上报了数值型 `db_latency_ms`：Non-DB = RTT − DB（允许为负，原样保留）
//! - 未上报或格式不正确：DB 与 Non-DB 均缺失（绝不把 RTT 当作 Non-DB 写入记录）

use serde_json::Value;

use crate::model::record::{Decomposed, RawSample};

/// 生产者在 JSON 响应中携带数据库耗时的字段名
pub const DB_LATENCY_FIELD: &str = "db_latency_ms";

/// 从响应 JSON 中提取数据库耗时
///
/// 只接受对象顶层的非负有限数字，其余情况一律视为“未上报”
pub fn extract_db_latency(body: &Value) -> Option<f64> {
    let value = body.as_object()?.get(DB_LATENCY_FIELD)?;
    match value.as_f64() {
        Some(ms) if ms.is_finite() && ms >= 0.0 => Some(ms),
        _ => {
            tracing::debug!(value = %value, "db_latency_ms 不是非负数字，按未上报处理");
            None
        }
    }
}

/// 分解单个样本
pub fn decompose(sample: RawSample) -> Decomposed {
    debug_assert!(sample.rtt_ms >= 0.0, "rtt_ms 必须非负");

    let db_latency_ms = sample.body.as_ref().and_then(extract_db_latency);
    let non_db_latency_ms = db_latency_ms.map(|db| sample.rtt_ms - db);

    Decomposed {
        source_url: sample.source_url,
        rtt_ms: sample.rtt_ms,
        db_latency_ms,
        non_db_latency_ms,
        captured_at: sample.captured_at,
    }
}
