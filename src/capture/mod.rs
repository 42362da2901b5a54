//! 计时事件采集
//!
//! - `polling`：顺序轮询 HTTP 接口
//! - `stream`：订阅采集面的网络完成事件
//! - `devtools` / `har`：两种具体采集面

pub mod devtools;
pub mod har;
pub mod polling;
pub mod stream;

pub use devtools::DevToolsSurface;
pub use har::HarSurface;
pub use polling::{HttpProbe, PollingSource};
pub use stream::StreamSource;
