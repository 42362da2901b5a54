//! 批量模式的 Ctrl-C 处理
//!
//! 第一次中断设置取消标记，当前请求完成后停止；第二次中断立即退出进程。

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

/// 强制退出的退出码（128 + SIGINT）
pub const EXIT_INTERRUPTED: i32 = 130;

/// 消费中断信号；收到第二次中断时返回 true
pub async fn escalate<S>(interrupts: S, cancel: CancellationToken) -> bool
where
    S: Stream<Item = ()>,
{
    let mut interrupts = std::pin::pin!(interrupts);

    if interrupts.next().await.is_none() {
        return false;
    }
    tracing::warn!("收到 Ctrl-C，当前请求完成后停止（再按一次立即退出）");
    cancel.cancel();

    if interrupts.next().await.is_none() {
        return false;
    }
    tracing::warn!("再次收到 Ctrl-C，立即退出");
    true
}

fn ctrl_c_signals() -> impl Stream<Item = ()> + Send {
    futures::stream::unfold((), |()| async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => Some(((), ())),
            Err(e) => {
                tracing::warn!("无法监听 Ctrl-C: {}", e);
                None
            }
        }
    })
}

pub fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if escalate(ctrl_c_signals(), cancel).await {
            std::process::exit(EXIT_INTERRUPTED);
        }
    });
}
