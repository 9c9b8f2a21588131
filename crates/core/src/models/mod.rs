//! # 数据模型
//!
//! master 与 worker 之间、worker 与 worker 之间通信使用的消息格式。
//! 每条消息都带有发送者、消息类型和不透明的内容，内容按类型解码。

pub mod message;

pub use message::*;
