//! 会话控制器
//!
//! 状态机：`Idle → Capturing → Completed | Cancelled`
//!
//! 控制器独占 TraceLog，是唯一的写入端：
//! - 轮询模式：单一顺序流程，每个周期完成后才开始下一个
//! - 流式模式：采集面在独立任务中运行，经有界队列把样本交给当前任务分解、追加
//!
//! 每次追加后通过 watch 通道广播最新序号，实时视图据此重绘。
//! 终止状态的收尾（CSV / 图表）只执行一次。

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::capture::polling::{PollingSource, Probe};
use crate::capture::stream::{CaptureSurface, StreamEnd, StreamSource};
use crate::decompose::decompose;
use crate::error::{CaptureError, SessionError};
use crate::model::record::{MetricRecord, RawSample};
use crate::render::batch::BatchSink;
use crate::trace_log::{TraceLog, TraceSnapshot, TraceView};

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Capturing,
    Completed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Cancelled)
    }

    fn can_transition_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Idle, SessionState::Capturing)
                | (SessionState::Capturing, SessionState::Completed)
                | (SessionState::Capturing, SessionState::Cancelled)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Capturing => "capturing",
            SessionState::Completed => "completed",
            SessionState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

impl From<StreamEnd> for SessionState {
    fn from(end: StreamEnd) -> Self {
        match end {
            StreamEnd::Exhausted | StreamEnd::MaxWait => SessionState::Completed,
            StreamEnd::Cancelled | StreamEnd::Closed | StreamEnd::ReceiverGone => {
                SessionState::Cancelled
            }
        }
    }
}

/// 轮询周期回调（批量模式的逐条输出）
pub trait CycleObserver {
    fn on_record(&mut self, cycle: u32, record: &MetricRecord);

    fn on_failure(&mut self, cycle: u32, error: &CaptureError);
}

/// 不关心逐条结果时使用
impl CycleObserver for () {
    fn on_record(&mut self, _cycle: u32, _record: &MetricRecord) {}

    fn on_failure(&mut self, _cycle: u32, _error: &CaptureError) {}
}

/// 收尾结果
#[derive(Debug)]
pub struct SessionReport {
    pub id: Uuid,
    pub state: SessionState,
    pub snapshot: TraceSnapshot,
    pub failed_cycles: u32,
}

impl SessionReport {
    pub fn records(&self) -> usize {
        self.snapshot.len()
    }
}

/// 会话控制器（一次性：一个实例对应一个会话）
pub struct SessionController {
    id: Uuid,
    state: watch::Sender<SessionState>,
    log: TraceLog,
    cancel: CancellationToken,
    updates: watch::Sender<u64>,
    failed_cycles: u32,
    finalized: bool,
    channel_capacity: usize,
}

impl SessionController {
    /// 创建会话，TraceLog 为空
    pub fn new(channel_capacity: usize) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (updates, _) = watch::channel(0);
        Self {
            id: Uuid::new_v4(),
            state,
            log: TraceLog::new(),
            cancel: CancellationToken::new(),
            updates,
            failed_cycles: 0,
            finalized: false,
            channel_capacity: channel_capacity.max(1),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// 渲染端使用的只读视图
    pub fn view(&self) -> TraceView {
        self.log.view()
    }

    /// 外部停止信号（Ctrl-C、按键、关闭采集面）共用的取消标记
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 最新追加的序号
    pub fn subscribe_updates(&self) -> watch::Receiver<u64> {
        self.updates.subscribe()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn ensure_transition(&self, to: SessionState) -> Result<(), SessionError> {
        let from = self.state();
        if from.can_transition_to(to) {
            Ok(())
        } else {
            Err(SessionError::InvalidTransition { from, to })
        }
    }

    fn transition(&mut self, to: SessionState) -> Result<(), SessionError> {
        self.ensure_transition(to)?;
        let from = self.state.send_replace(to);
        tracing::info!(session = %self.id, "会话状态: {} -> {}", from, to);
        Ok(())
    }

    /// 分解并追加，随后广播序号
    fn record(&mut self, sample: RawSample) -> Arc<MetricRecord> {
        let record = self.log.append(decompose(sample));
        tracing::debug!(
            session = %self.id,
            sequence = record.sequence(),
            url = record.source_url(),
            rtt_ms = record.rtt_ms(),
            db_latency_ms = ?record.db_latency_ms(),
            "记录已追加"
        );
        self.updates.send_replace(record.sequence());
        record
    }

    /// 轮询模式：顺序执行全部周期，取消标记在周期之间检查
    pub async fn run_polling<P: Probe, O: CycleObserver>(
        &mut self,
        mut source: PollingSource<P>,
        observer: &mut O,
    ) -> Result<SessionState, SessionError> {
        self.transition(SessionState::Capturing)?;
        tracing::info!(
            session = %self.id,
            url = source.url(),
            repeat = source.repeat(),
            "开始轮询采集"
        );

        let end = loop {
            if self.cancel.is_cancelled() {
                break SessionState::Cancelled;
            }
            let Some(outcome) = source.next_cycle().await else {
                break SessionState::Completed;
            };

            match outcome.result {
                Ok(sample) => {
                    let record = self.record(sample);
                    observer.on_record(outcome.cycle, &record);
                }
                Err(e) => {
                    self.failed_cycles += 1;
                    tracing::warn!(session = %self.id, cycle = outcome.cycle, "采集周期失败: {}", e);
                    observer.on_failure(outcome.cycle, &e);
                }
            }
        };

        self.transition(end)?;
        Ok(end)
    }

    /// 流式模式：采集面打开失败时会话保持 Idle 并返回 `SurfaceStart`
    pub async fn run_stream<S>(&mut self, mut source: StreamSource<S>) -> Result<SessionState, SessionError>
    where
        S: CaptureSurface + 'static,
    {
        self.ensure_transition(SessionState::Capturing)?;
        source
            .open()
            .await
            .map_err(|e| SessionError::SurfaceStart(e.to_string()))?;
        self.transition(SessionState::Capturing)?;

        let (tx, mut rx) = mpsc::channel(self.channel_capacity);
        let capture = tokio::spawn(source.run(tx, self.cancel.clone()));

        // 处理路径：按观测顺序分解并追加，直到采集端释放发送端
        while let Some(sample) = rx.recv().await {
            self.record(sample);
        }

        let end = match capture.await {
            Ok(end) => end,
            Err(e) => {
                tracing::error!(session = %self.id, "采集任务异常退出: {}", e);
                StreamEnd::Cancelled
            }
        };
        tracing::info!(session = %self.id, records = self.log.len(), end = ?end, "流式采集结束");

        let state = SessionState::from(end);
        self.transition(state)?;
        Ok(state)
    }

    /// 终止状态收尾（只执行一次）
    pub fn finalize<W: Write>(
        &mut self,
        sink: &BatchSink,
        out: &mut W,
    ) -> Result<SessionReport, SessionError> {
        if self.finalized {
            return Err(SessionError::AlreadyFinalized);
        }
        let state = self.state();
        if !state.is_terminal() {
            return Err(SessionError::NotTerminal(state));
        }
        self.finalized = true;

        let snapshot = self.log.view().snapshot();
        sink.finalize(&snapshot, out)?;

        Ok(SessionReport {
            id: self.id,
            state,
            snapshot,
            failed_cycles: self.failed_cycles,
        })
    }
}
