//! 轮询采集源
//!
//! 对目标 URL 顺序发起最多 N 次请求，每次记录墙钟 RTT 并解析 JSON 响应。
//! 单次失败（网络错误、非 JSON 响应）只影响该周期，不中断后续周期。

use std::future::Future;
use std::num::NonZeroU32;
use std::time::Instant;

use bytes::Bytes;
use reqwest::Client;

use crate::error::CaptureError;
use crate::model::record::RawSample;

/// 一次请求/响应的原始观测
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    /// 从发出请求到完整读取响应体的耗时（毫秒）
    pub rtt_ms: f64,
    pub status: u16,
    pub body: Bytes,
}

/// 发起单次请求并计时
pub trait Probe: Send + Sync {
    fn probe(&self, url: &str) -> impl Future<Output = Result<ProbeResponse, CaptureError>> + Send;
}

/// 基于 reqwest 的 HTTP 探测
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl Probe for HttpProbe {
    async fn probe(&self, url: &str) -> Result<ProbeResponse, CaptureError> {
        let start = Instant::now();
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        let rtt_ms = start.elapsed().as_secs_f64() * 1000.0;

        Ok(ProbeResponse {
            rtt_ms,
            status,
            body,
        })
    }
}

/// 单个轮询周期的结果（周期号从 1 开始）
#[derive(Debug)]
pub struct CycleOutcome {
    pub cycle: u32,
    pub result: Result<RawSample, CaptureError>,
}

/// 轮询采集源
pub struct PollingSource<P> {
    probe: P,
    url: String,
    repeat: NonZeroU32,
    cycle: u32,
}

impl<P: Probe> PollingSource<P> {
    pub fn new(probe: P, url: impl Into<String>, repeat: NonZeroU32) -> Self {
        Self {
            probe,
            url: url.into(),
            repeat,
            cycle: 0,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn repeat(&self) -> u32 {
        self.repeat.get()
    }

    /// 执行下一个周期；N 个周期结束后返回 None
    pub async fn next_cycle(&mut self) -> Option<CycleOutcome> {
        if self.cycle >= self.repeat.get() {
            return None;
        }
        self.cycle += 1;

        let result = match self.probe.probe(&self.url).await {
            Ok(response) => self.to_sample(response),
            Err(e) => Err(e),
        };

        Some(CycleOutcome {
            cycle: self.cycle,
            result,
        })
    }

    fn to_sample(&self, response: ProbeResponse) -> Result<RawSample, CaptureError> {
        tracing::debug!(
            cycle = self.cycle,
            status = response.status,
            rtt_ms = response.rtt_ms,
            bytes = response.body.len(),
            "轮询响应"
        );

        #[cfg(feature = "sensitive-logs")]
        tracing::debug!(body = %String::from_utf8_lossy(&response.body), "响应体");

        let body: serde_json::Value = serde_json::from_slice(&response.body)
            .map_err(|e| CaptureError::InvalidBody(e.to_string()))?;

        Ok(RawSample::new(
            self.url.clone(),
            response.rtt_ms.max(0.0),
            Some(body),
        ))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;

    use parking_lot::Mutex;

    use super::*;

    /// 按脚本返回固定响应的探测器
    pub struct ScriptedProbe {
        script: Mutex<VecDeque<Result<ProbeResponse, CaptureError>>>,
    }

    impl ScriptedProbe {
        pub fn new(script: Vec<Result<ProbeResponse, CaptureError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
            }
        }

        pub fn json(rtt_ms: f64, body: &str) -> Result<ProbeResponse, CaptureError> {
            Ok(ProbeResponse {
                rtt_ms,
                status: 200,
                body: Bytes::from(body.to_string()),
            })
        }
    }

    impl Probe for ScriptedProbe {
        async fn probe(&self, _url: &str) -> Result<ProbeResponse, CaptureError> {
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(CaptureError::Request("脚本已耗尽".to_string())))
        }
    }
}
