//! 流式采集源
//!
//! 订阅采集面（浏览器会话 / HAR 回放）的网络完成事件，只保留 XHR/fetch 流量，
//! 归一化为 `RawSample` 后经有界队列交给处理路径。
//! 取消是协作式的：在两个事件之间观察取消标记，已收到的完成事件一定会被送出。

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::CaptureError;
use crate::model::record::RawSample;

/// 采集面上报的一次网络请求完成
#[derive(Debug, Clone, Default)]
pub struct NetworkCompletion {
    pub url: String,
    /// 采集面测得的往返时间（毫秒）
    pub rtt_ms: f64,
    /// 资源类型（如 `XHR`、`Fetch`、`Document`），采集面不提供时为 None
    pub resource_type: Option<String>,
    /// 请求头（名称保持原样，比较时忽略大小写）
    pub request_headers: Vec<(String, String)>,
    /// 响应体文本；不可用时为 None
    pub body: Option<String>,
}

/// 采集面事件
#[derive(Debug)]
pub enum SurfaceEvent {
    Completion(NetworkCompletion),
    /// 单个事件处理失败，采集继续
    Error(CaptureError),
    /// 数据源已读完（如 HAR 文件回放结束）
    Exhausted,
    /// 采集面被外部关闭（如用户关闭浏览器）
    Closed,
}

/// 采集面抽象
///
/// `next_event` 必须是取消安全的：在等待期间被丢弃不会丢失已产生的事件
pub trait CaptureSurface: Send {
    /// 建立采集（失败即会话级错误）
    fn open(&mut self) -> impl Future<Output = Result<(), CaptureError>> + Send;

    fn next_event(&mut self) -> impl Future<Output = SurfaceEvent> + Send;

    /// 不等待，取出采集面已经就绪的事件；没有就绪事件时返回 None
    fn try_next_event(&mut self) -> Option<SurfaceEvent>;

    /// 释放连接等资源，任何退出路径都会调用
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// 判断一次请求是否为 API 流量（XHR / fetch）
///
/// 采集面给出资源类型时以资源类型为准；否则退回到请求头信号：
/// `X-Requested-With: XMLHttpRequest` 或 `Sec-Fetch-Dest: empty`
pub fn is_api_traffic(resource_type: Option<&str>, request_headers: &[(String, String)]) -> bool {
    if let Some(kind) = resource_type {
        return kind.eq_ignore_ascii_case("xhr") || kind.eq_ignore_ascii_case("fetch");
    }

    request_headers.iter().any(|(name, value)| {
        let value = value.trim();
        if name.eq_ignore_ascii_case("x-requested-with") {
            value.eq_ignore_ascii_case("xmlhttprequest")
        } else if name.eq_ignore_ascii_case("sec-fetch-dest") {
            value.eq_ignore_ascii_case("empty")
        } else {
            false
        }
    })
}

/// 归一化为原始样本；响应体无法解析为 JSON 时记录警告并视为未上报
pub fn to_sample(completion: NetworkCompletion) -> RawSample {
    let body = completion
        .body
        .as_deref()
        .and_then(|text| match serde_json::from_str::<serde_json::Value>(text) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(url = %completion.url, "Failed to parse JSON from {}: {}", completion.url, e);
                None
            }
        });

    #[cfg(feature = "sensitive-logs")]
    tracing::debug!(url = %completion.url, body = ?completion.body, "响应体");

    RawSample::new(completion.url, completion.rtt_ms.max(0.0), body)
}

/// 流式采集结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// 数据源读完
    Exhausted,
    /// 达到最长等待时间
    MaxWait,
    /// 取消标记被观察到
    Cancelled,
    /// 采集面被外部关闭
    Closed,
    /// 处理路径已不再接收
    ReceiverGone,
}

/// 流式采集源
pub struct StreamSource<S> {
    surface: S,
    max_wait: Duration,
}

impl<S: CaptureSurface> StreamSource<S> {
    pub fn new(surface: S, max_wait: Duration) -> Self {
        Self { surface, max_wait }
    }

    /// 打开采集面；失败时已释放资源
    pub async fn open(&mut self) -> Result<(), CaptureError> {
        if let Err(e) = self.surface.open().await {
            self.surface.close().await;
            return Err(e);
        }
        Ok(())
    }

    /// 采集循环：把匹配的完成事件送入 `tx`，直到取消 / 超时 / 数据源结束
    ///
    /// 观察到取消后，采集面已经交付的事件仍会全部送出，之后不再等待新事件
    pub async fn run(mut self, tx: mpsc::Sender<RawSample>, cancel: CancellationToken) -> StreamEnd {
        let deadline = tokio::time::sleep(self.max_wait);
        tokio::pin!(deadline);

        let mut stats = ForwardStats::default();

        let end = loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break self.drain_ready(&tx, &mut stats).await,
                _ = &mut deadline => break StreamEnd::MaxWait,
                event = self.surface.next_event() => event,
            };

            if let ControlFlow::Break(end) = forward(event, &tx, &mut stats).await {
                break end;
            }
        };

        self.surface.close().await;
        tracing::info!(
            forwarded = stats.forwarded,
            skipped = stats.skipped,
            end = ?end,
            "流式采集结束"
        );
        end
    }

    async fn drain_ready(&mut self, tx: &mpsc::Sender<RawSample>, stats: &mut ForwardStats) -> StreamEnd {
        let before = stats.forwarded;
        while let Some(event) = self.surface.try_next_event() {
            match forward(event, tx, stats).await {
                ControlFlow::Break(StreamEnd::ReceiverGone) => return StreamEnd::ReceiverGone,
                ControlFlow::Break(_) => break,
                ControlFlow::Continue(()) => {}
            }
        }
        tracing::debug!(drained = stats.forwarded - before, "取消前已就绪的事件已送出");
        StreamEnd::Cancelled
    }
}

#[derive(Debug, Default)]
struct ForwardStats {
    forwarded: u64,
    skipped: u64,
}

/// 处理单个事件；`Break` 表示采集应结束
async fn forward(
    event: SurfaceEvent,
    tx: &mpsc::Sender<RawSample>,
    stats: &mut ForwardStats,
) -> ControlFlow<StreamEnd> {
    match event {
        SurfaceEvent::Completion(completion) => {
            if !is_api_traffic(completion.resource_type.as_deref(), &completion.request_headers) {
                stats.skipped += 1;
                return ControlFlow::Continue(());
            }
            if tx.send(to_sample(completion)).await.is_err() {
                return ControlFlow::Break(StreamEnd::ReceiverGone);
            }
            stats.forwarded += 1;
            ControlFlow::Continue(())
        }
        SurfaceEvent::Error(e) => {
            tracing::warn!("采集事件处理失败，已跳过: {}", e);
            ControlFlow::Continue(())
        }
        SurfaceEvent::Exhausted => ControlFlow::Break(StreamEnd::Exhausted),
        SurfaceEvent::Closed => ControlFlow::Break(StreamEnd::Closed),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{ChannelSurface, xhr};
    use super::*;
    use crate::decompose::decompose;
    use std::sync::atomic::Ordering;

    fn headers(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_resource_type_signal() {
        assert!(is_api_traffic(Some("XHR"), &[]));
        assert!(is_api_traffic(Some("fetch"), &[]));
        assert!(!is_api_traffic(Some("Document"), &[]));
        assert!(!is_api_traffic(Some("Script"), &headers(&[("Sec-Fetch-Dest", "empty")])));
    }

    #[test]
    fn test_header_signal_when_type_unknown() {
        assert!(is_api_traffic(None, &headers(&[("X-Requested-With", "XMLHttpRequest")])));
        assert!(is_api_traffic(None, &headers(&[("sec-fetch-dest", "empty")])));
        assert!(!is_api_traffic(None, &headers(&[("Sec-Fetch-Dest", "document")])));
        assert!(!is_api_traffic(None, &[]));
    }

    #[test]
    fn test_unparsable_body_becomes_unreported() {
        let sample = to_sample(xhr("http://localhost/api/x", 9.0, "not json"));
        assert!(sample.body.is_none());
        let d = decompose(sample);
        assert_eq!(d.db_latency_ms, None);
        assert_eq!(d.non_db_latency_ms, None);
    }

    #[tokio::test]
    async fn test_filters_non_api_and_keeps_observed_order() {
        let (surface, events) = ChannelSurface::new();
        let closed = surface.closed.clone();
        let source = StreamSource::new(surface, Duration::from_secs(5));
        let (tx, mut rx) = mpsc::channel(8);

        // 完成顺序与发起顺序不同，按观测顺序保留
        events.send(SurfaceEvent::Completion(xhr("/api/b", 30.0, r#"{"db_latency_ms": 5}"#))).unwrap();
        events
            .send(SurfaceEvent::Completion(NetworkCompletion {
                url: "/app.js".to_string(),
                rtt_ms: 3.0,
                resource_type: Some("Script".to_string()),
                ..Default::default()
            }))
            .unwrap();
        events.send(SurfaceEvent::Error(CaptureError::Surface("body gone".into()))).unwrap();
        events.send(SurfaceEvent::Completion(xhr("/api/a", 20.0, r#"{}"#))).unwrap();
        events.send(SurfaceEvent::Exhausted).unwrap();

        let end = source.run(tx, CancellationToken::new()).await;
        assert_eq!(end, StreamEnd::Exhausted);
        assert!(closed.load(Ordering::SeqCst));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(rx.recv().await.is_none());
        assert_eq!(first.source_url, "/api/b");
        assert_eq!(second.source_url, "/api/a");
    }

    #[tokio::test]
    async fn test_cancel_stops_capture_and_releases_surface() {
        let (surface, events) = ChannelSurface::new();
        let closed = surface.closed.clone();
        let source = StreamSource::new(surface, Duration::from_secs(60));
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        events.send(SurfaceEvent::Completion(xhr("/api/1", 10.0, "{}"))).unwrap();
        let handle = tokio::spawn(source.run(tx, cancel.clone()));

        // 等第一条送达后再取消
        let first = rx.recv().await.unwrap();
        assert_eq!(first.source_url, "/api/1");
        cancel.cancel();

        let end = handle.await.unwrap();
        assert_eq!(end, StreamEnd::Cancelled);
        assert!(closed.load(Ordering::SeqCst));

        // 取消之后送入的事件不会产生样本
        let _ = events.send(SurfaceEvent::Completion(xhr("/api/2", 10.0, "{}")));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_still_forwards_already_delivered_completions() {
        let (surface, events) = ChannelSurface::new();
        let closed = surface.closed.clone();
        let source = StreamSource::new(surface, Duration::from_secs(60));
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        for (url, rtt) in [("/api/1", 10.0), ("/api/2", 20.0), ("/api/3", 30.0)] {
            events.send(SurfaceEvent::Completion(xhr(url, rtt, r#"{"db_latency_ms": 1}"#))).unwrap();
        }
        cancel.cancel();

        let end = source.run(tx, cancel).await;
        assert_eq!(end, StreamEnd::Cancelled);
        assert!(closed.load(Ordering::SeqCst));

        let mut urls = Vec::new();
        while let Some(sample) = rx.recv().await {
            urls.push(sample.source_url);
        }
        assert_eq!(urls, vec!["/api/1", "/api/2", "/api/3"]);
    }

    #[tokio::test]
    async fn test_cancel_drain_stops_at_closed() {
        let (surface, events) = ChannelSurface::new();
        let source = StreamSource::new(surface, Duration::from_secs(60));
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        events.send(SurfaceEvent::Completion(xhr("/api/1", 10.0, "{}"))).unwrap();
        events.send(SurfaceEvent::Closed).unwrap();
        events.send(SurfaceEvent::Completion(xhr("/api/late", 10.0, "{}"))).unwrap();
        cancel.cancel();

        assert_eq!(source.run(tx, cancel).await, StreamEnd::Cancelled);
        assert_eq!(rx.recv().await.unwrap().source_url, "/api/1");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_wait_ends_capture() {
        let (surface, _events) = ChannelSurface::new();
        let source = StreamSource::new(surface, Duration::from_secs(120));
        let (tx, _rx) = mpsc::channel(1);

        let end = source.run(tx, CancellationToken::new()).await;
        assert_eq!(end, StreamEnd::MaxWait);
    }

    #[tokio::test]
    async fn test_open_failure_releases_surface() {
        let surface = ChannelSurface::failing();
        let closed = surface.closed.clone();
        let mut source = StreamSource::new(surface, Duration::from_secs(1));

        assert!(source.open().await.is_err());
        assert!(closed.load(Ordering::SeqCst));
    }
}
