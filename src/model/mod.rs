//! 数据模型

pub mod arg;
pub mod config;
pub mod record;
