//! 错误类型
//!
//! - `CaptureError`：单次采集失败，本地恢复（记录日志、跳过该样本、继续采集）
//! - `SessionError`：会话级失败，向调用方返回并释放所有资源

use std::fmt;

use crate::session::SessionState;

/// 单个采集周期 / 单个网络事件的错误
#[derive(Debug)]
pub enum CaptureError {
    /// 网络错误（连接失败、读取响应失败等）
    Request(String),
    /// 请求超时
    Timeout,
    /// 响应体无法解析为 JSON
    InvalidBody(String),
    /// 采集面（浏览器会话 / HAR 文件）运行期错误
    Surface(String),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::Request(msg) => write!(f, "request error: {}", msg),
            CaptureError::Timeout => write!(f, "request timed out"),
            CaptureError::InvalidBody(msg) => write!(f, "response is not valid JSON: {}", msg),
            CaptureError::Surface(msg) => write!(f, "capture surface error: {}", msg),
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<reqwest::Error> for CaptureError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CaptureError::Timeout
        } else {
            CaptureError::Request(e.to_string())
        }
    }
}

/// 会话级错误
#[derive(Debug)]
pub enum SessionError {
    /// 采集面启动失败（目标不可达等），会话不会进入 Capturing
    SurfaceStart(String),
    /// 非法的状态迁移
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },
    /// 会话尚未进入终止状态，不能收尾
    NotTerminal(SessionState),
    /// 终止状态的收尾已经执行过
    AlreadyFinalized,
    /// 输出端（CSV / 图表 / 终端）失败
    Sink(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::SurfaceStart(msg) => {
                write!(f, "failed to start capture surface: {}", msg)
            }
            SessionError::InvalidTransition { from, to } => {
                write!(f, "invalid session transition: {} -> {}", from, to)
            }
            SessionError::NotTerminal(state) => {
                write!(f, "session is still {}, cannot finalize", state)
            }
            SessionError::AlreadyFinalized => write!(f, "session already finalized"),
            SessionError::Sink(msg) => write!(f, "render sink failed: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        SessionError::Sink(e.to_string())
    }
}
