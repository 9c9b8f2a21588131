use std::time::Duration;

use chrono::{DateTime, Utc};
use pipeline_core::{Message, MessageKind, PipelineError, PipelineResult, WorkerId};
use pipeline_infrastructure::transport::{connect, send_message, write_message};
use tokio::io::AsyncWriteExt;
use tracing::info;

/// 与 master 通信的客户端，每条消息使用一条短连接
#[derive(Debug, Clone)]
pub struct MasterClient {
    master_address: String,
    worker_id: WorkerId,
    timeout: Duration,
}

impl MasterClient {
    pub fn new(master_address: impl Into<String>, worker_id: WorkerId, timeout: Duration) -> Self {
        Self {
            master_address: master_address.into(),
            worker_id,
            timeout,
        }
    }

    pub fn master_address(&self) -> &str {
        &self.master_address
    }

    /// 向 master 注册监听地址和进程号，返回通告出去的地址
    ///
    /// 未指定 `advertise_host` 时使用连接 master 所用的本地地址。连接超时或失败是致命错误。
    pub async fn register(
        &self,
        listen_port: u16,
        advertise_host: Option<&str>,
    ) -> PipelineResult<String> {
        let mut stream = connect(&self.master_address, self.timeout)
            .await
            .map_err(|e| {
                PipelineError::RegistrationTimeout(format!("{}: {}", self.master_address, e))
            })?;

        let host = match advertise_host {
            Some(host) => host.to_string(),
            None => stream.local_addr()?.ip().to_string(),
        };
        let address = format!("{host}:{listen_port}");

        let message = Message::stage_info(self.worker_id.clone(), address.clone(), std::process::id());
        write_message(&mut stream, &message).await?;
        stream.shutdown().await?;

        info!("已向master注册: master={}, address={}", self.master_address, address);
        Ok(address)
    }

    pub async fn send(&self, message: &Message) -> PipelineResult<()> {
        send_message(&self.master_address, message, self.timeout).await
    }

    pub async fn notify_exit(&self) -> PipelineResult<()> {
        self.send(&Message::notify_exit(self.worker_id.clone())).await
    }

    pub async fn start_first_stage(&self, at: DateTime<Utc>) -> PipelineResult<()> {
        let message = Message::timestamped(self.worker_id.clone(), MessageKind::StartFirstStage, at)?;
        self.send(&message).await
    }

    pub async fn end_execution(&self, at: DateTime<Utc>) -> PipelineResult<()> {
        let message = Message::timestamped(self.worker_id.clone(), MessageKind::EndExecution, at)?;
        self.send(&message).await
    }
}
