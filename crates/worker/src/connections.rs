use std::time::Duration;

use pipeline_core::{Message, PipelineError, PipelineResult};
use pipeline_infrastructure::transport::{connect, write_message};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

pub type ConnectionWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// 到一个下游 worker 的连接
pub struct Connection {
    pub address: String,
    writer: ConnectionWriter,
}

#[derive(Default)]
struct ConnectionSet {
    list: Vec<Connection>,
    /// 下一次发送使用的位置
    next: usize,
    closed: bool,
}

impl ConnectionSet {
    /// 移除连接后调整游标，轮转从被移除连接之后的那个继续
    fn take(&mut self, index: usize) -> Connection {
        if index < self.next {
            self.next -= 1;
        }
        self.list.remove(index)
    }
}

/// 下游连接列表，轮询分发
///
/// 列表为空时发送方等待，直到有新连接加入或列表被关闭。
pub struct Connections {
    inner: Mutex<ConnectionSet>,
    changed: Notify,
    connect_timeout: Duration,
}

impl Connections {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(ConnectionSet::default()),
            changed: Notify::new(),
            connect_timeout,
        }
    }

    /// 连接下游地址并加入列表
    pub async fn connect(&self, address: &str) -> PipelineResult<()> {
        if self.contains(address).await {
            warn!("下游连接已存在，忽略: {}", address);
            return Ok(());
        }
        let stream = connect(address, self.connect_timeout).await?;
        self.add(address.to_string(), Box::new(stream)).await;
        Ok(())
    }

    pub async fn add(&self, address: String, writer: ConnectionWriter) {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return;
        }
        info!("新增下游连接: {}", address);
        inner.list.push(Connection { address, writer });
        drop(inner);
        self.changed.notify_waiters();
    }

    /// 移除并关闭指定地址的连接，不存在时返回 `false`
    pub async fn remove(&self, address: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(index) = inner.list.iter().position(|c| c.address == address) else {
            return false;
        };
        let mut connection = inner.take(index);
        drop(inner);

        if let Err(e) = connection.writer.shutdown().await {
            debug!("关闭连接 {} 出错: {}", address, e);
        }
        info!("已断开下游连接: {}", address);
        true
    }

    /// 轮询选择一个连接发送消息，返回实际使用的地址
    ///
    /// 写入失败的连接会被移除，消息改由下一个连接发送。
    pub async fn send_round_robin(&self, message: &Message) -> PipelineResult<String> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock().await;
                if inner.closed {
                    return Err(PipelineError::Network("下游连接已全部关闭".to_string()));
                }

                if !inner.list.is_empty() {
                    let index = inner.next % inner.list.len();
                    inner.next = index + 1;

                    let connection = &mut inner.list[index];
                    match write_message(&mut connection.writer, message).await {
                        Ok(()) => return Ok(connection.address.clone()),
                        Err(e) => {
                            let failed = inner.take(index);
                            warn!("发送到 {} 失败，移除该连接: {}", failed.address, e);
                            continue;
                        }
                    }
                }
            }

            debug!("没有下游连接，等待新连接");
            notified.await;
        }
    }

    /// 关闭所有连接，之后的发送都会失败
    pub async fn close_all(&self) {
        let connections = {
            let mut inner = self.inner.lock().await;
            inner.closed = true;
            std::mem::take(&mut inner.list)
        };
        self.changed.notify_waiters();

        for mut connection in connections {
            if let Err(e) = connection.writer.shutdown().await {
                debug!("关闭连接 {} 出错: {}", connection.address, e);
            }
        }
    }

    pub async fn contains(&self, address: &str) -> bool {
        self.inner
            .lock()
            .await
            .list
            .iter()
            .any(|c| c.address == address)
    }

    pub async fn addresses(&self) -> Vec<String> {
        self.inner
            .lock()
            .await
            .list
            .iter()
            .map(|c| c.address.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.list.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl std::fmt::Debug for Connections {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connections")
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}
