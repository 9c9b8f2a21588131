use async_trait::async_trait;

use crate::{Message, PipelineResult};

/// master 向 worker 发送控制消息的通道
#[async_trait]
pub trait WorkerMessenger: Send + Sync {
    async fn send(&self, address: &str, message: Message) -> PipelineResult<()>;
}
