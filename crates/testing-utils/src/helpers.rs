//! 集成测试辅助工具

use std::time::Duration;

use pipeline_core::{Message, MessageKind};
use pipeline_infrastructure::read_message;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

/// `expect` 等待的上限
pub const EXPECT_TIMEOUT: Duration = Duration::from_secs(5);

/// 在本地端口上接收消息
///
/// 可以充当 master 的控制端口，也可以充当下游阶段。每个连接上的消息按到达顺序
/// 转发到同一个队列。
pub struct MessageCollector {
    address: String,
    rx: mpsc::UnboundedReceiver<Message>,
    accept_task: JoinHandle<()>,
}

impl MessageCollector {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        let accept_task = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    while let Ok(Some(message)) = read_message(&mut stream).await {
                        if tx.send(message).is_err() {
                            break;
                        }
                    }
                });
            }
        });

        Self {
            address,
            rx,
            accept_task,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// 等待下一条消息，超时返回 `None`
    pub async fn next(&mut self, within: Duration) -> Option<Message> {
        timeout(within, self.rx.recv()).await.ok().flatten()
    }

    /// 跳过其他类型，等待指定类型的消息
    pub async fn expect(&mut self, kind: MessageKind) -> Message {
        let deadline = Instant::now() + EXPECT_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.next(remaining).await {
                Some(message) if message.description == kind => return message,
                Some(_) => continue,
                None => panic!("等待 {kind} 消息超时"),
            }
        }
    }

    /// 收集指定类型的消息，直到收满 `count` 条
    pub async fn expect_many(&mut self, kind: MessageKind, count: usize) -> Vec<Message> {
        let mut messages = Vec::with_capacity(count);
        while messages.len() < count {
            messages.push(self.expect(kind).await);
        }
        messages
    }

    /// 已经到达但尚未读取的消息
    pub fn drain_received(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }
        messages
    }
}

impl Drop for MessageCollector {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}
