use std::time::Duration;

use async_trait::async_trait;
use pipeline_core::{Message, PipelineResult, WorkerMessenger};
use tracing::debug;

use crate::transport::send_message;

/// 每条消息使用一条短连接
#[derive(Debug, Clone)]
pub struct TcpMessenger {
    connect_timeout: Duration,
}

impl TcpMessenger {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpMessenger {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl WorkerMessenger for TcpMessenger {
    async fn send(&self, address: &str, message: Message) -> PipelineResult<()> {
        debug!(address, kind = %message.description, "发送控制消息");
        send_message(address, &message, self.connect_timeout).await
    }
}
