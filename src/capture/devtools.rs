//! Chromium DevTools 采集面
//!
//! Input: 远程调试端点（HTTP 发现地址或 ws:// 页面地址）
//! Output: 按 `loadingFinished` 观测顺序产出的网络完成事件
//! Pos: 浏览器会话 → 流式采集源
//!
//! 三个后台任务：
//! - writer：把命令帧写入 websocket
//! - reader：分发命令响应，跟踪 Network 事件，把已完成的请求按顺序交给 completer
//! - completer：顺序拉取 API 流量的响应体，保证输出顺序与完成顺序一致
//!
//! 浏览器本身的启动与页面交互不在这里处理，只做附加和可选的首次导航。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};

use super::stream::{CaptureSurface, NetworkCompletion, SurfaceEvent, is_api_traffic};
use crate::error::CaptureError;

/// 单条 DevTools 命令的超时
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
/// completer → 采集源 的事件队列容量
const COMPLETION_QUEUE: usize = 256;
/// 关闭时等待 writer 发送 Close 帧的时间
const CLOSE_GRACE: Duration = Duration::from_secs(1);
/// 未完成请求的最长保留时间（协议时钟，秒）；EventSource、长轮询等可能永远不会结束
const PENDING_MAX_AGE_SECS: f64 = 300.0;
/// 清理未完成请求的最小间隔（协议时钟，秒）
const SWEEP_INTERVAL_SECS: f64 = 30.0;

type PendingCalls = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, String>>>>>;

/// 命令通道（可克隆）
#[derive(Clone)]
struct CommandChannel {
    outgoing: mpsc::UnboundedSender<Message>,
    pending: PendingCalls,
    next_id: Arc<AtomicU64>,
}

impl CommandChannel {
    async fn call(&self, method: &str, params: Value) -> Result<Value, CaptureError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let frame = json!({ "id": id, "method": method, "params": params }).to_string();
        if self.outgoing.send(Message::text(frame)).is_err() {
            self.pending.lock().remove(&id);
            return Err(CaptureError::Surface("DevTools 连接已关闭".to_string()));
        }

        match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(message))) => Err(CaptureError::Surface(format!(
                "{} 失败: {}",
                method, message
            ))),
            Ok(Err(_)) => Err(CaptureError::Surface("DevTools 连接已关闭".to_string())),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(CaptureError::Timeout)
            }
        }
    }
}

/// 已发出但尚未完成的请求
#[derive(Debug)]
struct PendingRequest {
    url: String,
    resource_type: Option<String>,
    headers: Vec<(String, String)>,
    /// 协议单调时钟（秒）
    started_at: f64,
}

/// 已完成、待拉取响应体的请求
#[derive(Debug)]
struct FinishedRequest {
    request_id: String,
    url: String,
    resource_type: Option<String>,
    headers: Vec<(String, String)>,
    rtt_ms: f64,
}

/// 按 requestId 关联 Network 域事件
#[derive(Debug, Default)]
struct NetworkTracker {
    pending: HashMap<String, PendingRequest>,
    last_sweep: f64,
}

impl NetworkTracker {
    /// 丢弃发起时间早于 `now - PENDING_MAX_AGE_SECS` 的未完成请求
    fn evict_stale(&mut self, now: f64) {
        if now - self.last_sweep < SWEEP_INTERVAL_SECS {
            return;
        }
        self.last_sweep = now;

        let before = self.pending.len();
        self.pending
            .retain(|_, request| now - request.started_at <= PENDING_MAX_AGE_SECS);
        let evicted = before - self.pending.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.pending.len(), "已清理长时间未完成的请求");
        }
    }

    fn handle(&mut self, method: &str, params: &Value) -> Option<FinishedRequest> {
        let request_id = params.get("requestId")?.as_str()?;

        match method {
            "Network.requestWillBeSent" => {
                let started_at = params.get("timestamp")?.as_f64()?;
                self.evict_stale(started_at);
                let request = params.get("request")?;
                let url = request.get("url")?.as_str()?.to_string();
                let resource_type = params.get("type").and_then(Value::as_str).map(str::to_string);

                match self.pending.get_mut(request_id) {
                    // 重定向沿用同一 requestId，保留最初的发起时刻
                    Some(existing) => {
                        existing.url = url;
                        if resource_type.is_some() {
                            existing.resource_type = resource_type;
                        }
                    }
                    None => {
                        self.pending.insert(
                            request_id.to_string(),
                            PendingRequest {
                                url,
                                resource_type,
                                headers: header_pairs(request.get("headers")),
                                started_at,
                            },
                        );
                    }
                }
                None
            }
            "Network.responseReceived" => {
                if let (Some(pending), Some(kind)) = (
                    self.pending.get_mut(request_id),
                    params.get("type").and_then(Value::as_str),
                ) {
                    pending.resource_type = Some(kind.to_string());
                }
                None
            }
            "Network.loadingFinished" => {
                let finished_at = params.get("timestamp")?.as_f64()?;
                let pending = self.pending.remove(request_id)?;
                Some(FinishedRequest {
                    request_id: request_id.to_string(),
                    url: pending.url,
                    resource_type: pending.resource_type,
                    headers: pending.headers,
                    rtt_ms: ((finished_at - pending.started_at) * 1000.0).max(0.0),
                })
            }
            "Network.loadingFailed" => {
                if let Some(pending) = self.pending.remove(request_id) {
                    let reason = params.get("errorText").and_then(Value::as_str).unwrap_or("");
                    tracing::debug!(url = %pending.url, error = reason, "请求失败，已丢弃");
                }
                None
            }
            _ => None,
        }
    }
}

fn header_pairs(headers: Option<&Value>) -> Vec<(String, String)> {
    headers
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(name, value)| Some((name.clone(), value.as_str()?.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetInfo {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    web_socket_debugger_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseBody {
    body: String,
    #[serde(default)]
    base64_encoded: bool,
}

async fn write_loop<S>(mut sink: S, mut outgoing: mpsc::UnboundedReceiver<Message>)
where
    S: Sink<Message> + Unpin,
{
    while let Some(message) = outgoing.recv().await {
        if sink.send(message).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop<S>(
    mut stream: S,
    pending: PendingCalls,
    finished: mpsc::UnboundedSender<FinishedRequest>,
) where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let mut tracker = NetworkTracker::default();

    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!("DevTools 连接读取失败: {}", e);
                break;
            }
        };

        let message: Value = match serde_json::from_str(text.as_str()) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!("忽略无法解析的 DevTools 消息: {}", e);
                continue;
            }
        };

        if let Some(id) = message.get("id").and_then(Value::as_u64) {
            let waiter = pending.lock().remove(&id);
            if let Some(waiter) = waiter {
                let result = match message.get("error") {
                    Some(error) => Err(error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string()),
                    None => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
                };
                let _ = waiter.send(result);
            }
            continue;
        }

        if let Some(method) = message.get("method").and_then(Value::as_str) {
            let params = message.get("params").unwrap_or(&Value::Null);
            if let Some(done) = tracker.handle(method, params) {
                if finished.send(done).is_err() {
                    break;
                }
            }
        }
    }

    // 连接断开：挂起的调用立即失败
    pending.lock().clear();
    tracing::info!("DevTools 连接已断开");
}

async fn fetch_body(commands: &CommandChannel, request_id: &str) -> Result<Option<String>, CaptureError> {
    let result = commands
        .call("Network.getResponseBody", json!({ "requestId": request_id }))
        .await?;
    let body: ResponseBody = serde_json::from_value(result)
        .map_err(|e| CaptureError::Surface(format!("响应体格式异常: {}", e)))?;
    if body.base64_encoded {
        return Ok(None);
    }
    Ok(Some(body.body))
}

async fn complete_loop(
    commands: CommandChannel,
    mut finished: mpsc::UnboundedReceiver<FinishedRequest>,
    completions: mpsc::Sender<SurfaceEvent>,
) {
    while let Some(request) = finished.recv().await {
        let mut completion = NetworkCompletion {
            url: request.url,
            rtt_ms: request.rtt_ms,
            resource_type: request.resource_type,
            request_headers: request.headers,
            body: None,
        };

        if is_api_traffic(completion.resource_type.as_deref(), &completion.request_headers) {
            match fetch_body(&commands, &request.request_id).await {
                Ok(body) => completion.body = body,
                Err(e) => tracing::warn!(url = %completion.url, "获取响应体失败: {}", e),
            }
        }

        if completions.send(SurfaceEvent::Completion(completion)).await.is_err() {
            return;
        }
    }
    let _ = completions.send(SurfaceEvent::Closed).await;
}

struct Connection {
    commands: CommandChannel,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
    completer: JoinHandle<()>,
}

/// 附加到 Chromium 远程调试端点的采集面
pub struct DevToolsSurface {
    endpoint: String,
    navigate: Option<String>,
    client: reqwest::Client,
    connection: Option<Connection>,
    completions: Option<mpsc::Receiver<SurfaceEvent>>,
}

impl DevToolsSurface {
    pub fn new(endpoint: impl Into<String>, navigate: Option<String>, client: reqwest::Client) -> Self {
        Self {
            endpoint: endpoint.into(),
            navigate,
            client,
            connection: None,
            completions: None,
        }
    }

    /// 解析出页面级 websocket 地址
    async fn resolve_endpoint(&self) -> Result<String, CaptureError> {
        if self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://") {
            return Ok(self.endpoint.clone());
        }

        let list_url = format!("{}/json/list", self.endpoint.trim_end_matches('/'));
        let targets: Vec<TargetInfo> = self
            .client
            .get(&list_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        targets
            .into_iter()
            .filter(|t| t.kind == "page")
            .find_map(|t| t.web_socket_debugger_url)
            .ok_or_else(|| CaptureError::Surface(format!("{} 下没有可附加的页面", list_url)))
    }
}

impl CaptureSurface for DevToolsSurface {
    async fn open(&mut self) -> Result<(), CaptureError> {
        let ws_url = self.resolve_endpoint().await?;
        let (socket, _) = tokio_tungstenite::connect_async(ws_url.as_str())
            .await
            .map_err(|e| CaptureError::Surface(format!("连接 DevTools 失败 {}: {}", ws_url, e)))?;
        let (sink, stream) = socket.split();

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let pending: PendingCalls = Arc::new(Mutex::new(HashMap::new()));
        let commands = CommandChannel {
            outgoing: outgoing_tx,
            pending: pending.clone(),
            next_id: Arc::new(AtomicU64::new(1)),
        };
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::channel(COMPLETION_QUEUE);

        let writer = tokio::spawn(write_loop(sink, outgoing_rx));
        let reader = tokio::spawn(read_loop(stream, pending, finished_tx));
        let completer = tokio::spawn(complete_loop(commands.clone(), finished_rx, completion_tx));

        self.connection = Some(Connection {
            commands: commands.clone(),
            writer,
            reader,
            completer,
        });
        self.completions = Some(completion_rx);

        commands.call("Network.enable", json!({})).await?;
        if let Some(url) = &self.navigate {
            commands.call("Page.navigate", json!({ "url": url })).await?;
            tracing::info!("已导航到 {}", url);
        }

        tracing::info!(endpoint = %ws_url, "已附加到 DevTools 会话");
        Ok(())
    }

    async fn next_event(&mut self) -> SurfaceEvent {
        match self.completions.as_mut() {
            Some(rx) => rx.recv().await.unwrap_or(SurfaceEvent::Closed),
            None => SurfaceEvent::Closed,
        }
    }

    fn try_next_event(&mut self) -> Option<SurfaceEvent> {
        self.completions.as_mut()?.try_recv().ok()
    }

    async fn close(&mut self) {
        self.completions = None;
        let Some(connection) = self.connection.take() else {
            return;
        };

        let Connection {
            commands,
            mut writer,
            reader,
            completer,
        } = connection;

        reader.abort();
        completer.abort();
        let _ = commands.outgoing.send(Message::Close(None));
        drop(commands);

        if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
            writer.abort();
        }
        tracing::debug!("DevTools 连接已释放");
    }
}

impl Drop for DevToolsSurface {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.reader.abort();
            connection.completer.abort();
            connection.writer.abort();
        }
    }
}
