//! HAR 回放采集面
//!
//! 读取录制代理或浏览器导出的 HAR 1.2 文件，按完成时间顺序逐条回放。
//! RTT 取 entry.time，缺失时退回到各阶段 timings 之和（忽略 -1）。

use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::DateTime;
use serde::Deserialize;

use super::stream::{CaptureSurface, NetworkCompletion, SurfaceEvent};
use crate::error::CaptureError;

#[derive(Debug, Deserialize)]
struct HarFile {
    log: HarLog,
}

#[derive(Debug, Deserialize)]
struct HarLog {
    #[serde(default)]
    entries: Vec<HarEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HarEntry {
    #[serde(default)]
    started_date_time: Option<String>,
    #[serde(default)]
    time: Option<f64>,
    request: HarRequest,
    #[serde(default)]
    response: Option<HarResponse>,
    #[serde(default)]
    timings: Option<HarTimings>,
    /// Chromium 导出的扩展字段
    #[serde(default, rename = "_resourceType")]
    resource_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HarRequest {
    url: String,
    #[serde(default)]
    headers: Vec<HarHeader>,
}

#[derive(Debug, Deserialize)]
struct HarHeader {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct HarResponse {
    #[serde(default)]
    content: Option<HarContent>,
}

#[derive(Debug, Deserialize)]
struct HarContent {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct HarTimings {
    #[serde(default)]
    blocked: Option<f64>,
    #[serde(default)]
    dns: Option<f64>,
    #[serde(default)]
    connect: Option<f64>,
    #[serde(default)]
    send: Option<f64>,
    #[serde(default)]
    wait: Option<f64>,
    #[serde(default)]
    receive: Option<f64>,
}

impl HarTimings {
    /// 各阶段之和；ssl 已包含在 connect 中，不重复计算
    fn total(&self) -> Option<f64> {
        let phases = [
            self.blocked,
            self.dns,
            self.connect,
            self.send,
            self.wait,
            self.receive,
        ];
        let valid: Vec<f64> = phases
            .into_iter()
            .flatten()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .collect();
        if valid.is_empty() {
            None
        } else {
            Some(valid.iter().sum())
        }
    }
}

impl HarEntry {
    fn rtt_ms(&self) -> Option<f64> {
        match self.time {
            Some(t) if t.is_finite() && t >= 0.0 => Some(t),
            _ => self.timings.as_ref().and_then(HarTimings::total),
        }
    }

    /// 完成时刻（毫秒时间戳），用于排序
    fn finished_at_ms(&self) -> Option<f64> {
        let started = DateTime::parse_from_rfc3339(self.started_date_time.as_deref()?).ok()?;
        Some(started.timestamp_millis() as f64 + self.rtt_ms()?)
    }

    fn into_event(self) -> SurfaceEvent {
        let Some(rtt_ms) = self.rtt_ms() else {
            return SurfaceEvent::Error(CaptureError::Surface(format!(
                "HAR 条目缺少有效耗时: {}",
                self.request.url
            )));
        };

        let body = self
            .response
            .and_then(|r| r.content)
            .and_then(|c| match c.encoding.as_deref() {
                Some(enc) if enc.eq_ignore_ascii_case("base64") => None,
                _ => c.text,
            });

        SurfaceEvent::Completion(NetworkCompletion {
            url: self.request.url,
            rtt_ms,
            resource_type: self.resource_type,
            request_headers: self
                .request
                .headers
                .into_iter()
                .map(|h| (h.name, h.value))
                .collect(),
            body,
        })
    }
}

/// HAR 文件回放
pub struct HarSurface {
    path: PathBuf,
    entries: VecDeque<HarEntry>,
}

impl HarSurface {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: VecDeque::new(),
        }
    }

    fn load(content: &str) -> Result<VecDeque<HarEntry>, CaptureError> {
        let har: HarFile = serde_json::from_str(content)
            .map_err(|e| CaptureError::Surface(format!("HAR 解析失败: {}", e)))?;
        let mut entries = har.log.entries;

        // 全部条目都有完成时刻时按完成顺序回放，否则保持文件顺序
        let keyed: Option<Vec<f64>> = entries.iter().map(HarEntry::finished_at_ms).collect();
        if let Some(keys) = keyed {
            let mut indexed: Vec<(f64, HarEntry)> = keys.into_iter().zip(entries).collect();
            indexed.sort_by(|a, b| a.0.total_cmp(&b.0));
            entries = indexed.into_iter().map(|(_, e)| e).collect();
        }

        Ok(entries.into())
    }
}

impl CaptureSurface for HarSurface {
    async fn open(&mut self) -> Result<(), CaptureError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            CaptureError::Surface(format!("读取 HAR 文件失败 {}: {}", self.path.display(), e))
        })?;
        self.entries = Self::load(&content)?;
        tracing::info!(path = %self.path.display(), entries = self.entries.len(), "HAR 已加载");
        Ok(())
    }

    async fn next_event(&mut self) -> SurfaceEvent {
        match self.entries.pop_front() {
            Some(entry) => entry.into_event(),
            None => SurfaceEvent::Exhausted,
        }
    }

    /// 回放条目按需产出，没有已交付待取的事件
    fn try_next_event(&mut self) -> Option<SurfaceEvent> {
        None
    }

    async fn close(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::stream::is_api_traffic;

    const SAMPLE_HAR: &str = r#"{
      "log": {
        "version": "1.2",
        "entries": [
          {
            "startedDateTime": "2026-10-19T10:00:00.000Z",
            "time": 120.5,
            "request": {
              "method": "GET",
              "url": "http://localhost:5000/api/fetch-users",
              "headers": [{"name": "X-Requested-With", "value": "XMLHttpRequest"}]
            },
            "response": {"content": {"mimeType": "application/json", "text": "{\"db_latency_ms\": 4.2}"}},
            "timings": {"blocked": -1, "dns": -1, "connect": -1, "send": 1, "wait": 100, "receive": 19.5}
          },
          {
            "startedDateTime": "2026-10-19T10:00:00.010Z",
            "time": 30,
            "request": {"method": "GET", "url": "http://localhost:5000/api/non-db", "headers": []},
            "response": {"content": {"text": "eyJ4IjoxfQ==", "encoding": "base64"}},
            "_resourceType": "fetch"
          },
          {
            "startedDateTime": "2026-10-19T10:00:00.020Z",
            "request": {"method": "GET", "url": "http://localhost:5000/", "headers": []},
            "timings": {"send": 2, "wait": 8, "receive": 1},
            "_resourceType": "document"
          }
        ]
      }
    }"#;

    fn completion(event: SurfaceEvent) -> NetworkCompletion {
        match event {
            SurfaceEvent::Completion(c) => c,
            other => panic!("期望 Completion，实际 {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_replays_in_completion_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.har");
        std::fs::write(&path, SAMPLE_HAR).unwrap();

        let mut surface = HarSurface::new(&path);
        surface.open().await.unwrap();

        // non-db 完成于 +40ms，document 完成于 +31ms，fetch-users 完成于 +120.5ms
        let first = completion(surface.next_event().await);
        assert_eq!(first.url, "http://localhost:5000/");
        assert_eq!(first.rtt_ms, 11.0);
        assert!(!is_api_traffic(first.resource_type.as_deref(), &first.request_headers));

        let second = completion(surface.next_event().await);
        assert_eq!(second.url, "http://localhost:5000/api/non-db");
        assert!(second.body.is_none(), "base64 响应体按不可用处理");
        assert!(is_api_traffic(second.resource_type.as_deref(), &second.request_headers));

        let third = completion(surface.next_event().await);
        assert_eq!(third.rtt_ms, 120.5);
        assert_eq!(third.body.as_deref(), Some(r#"{"db_latency_ms": 4.2}"#));
        assert!(is_api_traffic(third.resource_type.as_deref(), &third.request_headers));

        assert!(matches!(surface.next_event().await, SurfaceEvent::Exhausted));
    }

    #[tokio::test]
    async fn test_missing_file_fails_open() {
        let mut surface = HarSurface::new("/definitely/not/here.har");
        assert!(surface.open().await.is_err());
    }

    #[test]
    fn test_entry_without_timing_is_an_error_event() {
        let entries = HarSurface::load(
            r#"{"log": {"entries": [{"request": {"url": "http://x/api"}, "time": -1}]}}"#,
        )
        .unwrap();
        let entry = entries.into_iter().next().unwrap();
        assert!(matches!(entry.into_event(), SurfaceEvent::Error(_)));
    }
}
