//! master 的控制端口
//!
//! 接收 worker 发来的注册、统计、退出和吞吐量消息并更新注册表。
//! 单个连接读取失败只关闭该连接，接受循环继续运行。

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use pipeline_core::traits::perf;
use pipeline_core::{
    Message, MessageKind, PipelineResult, SchedulerConfig, StageInfo, TelemetrySink,
};
use pipeline_domain::WorkerStats;
use pipeline_infrastructure::read_message;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn, Instrument};

use crate::registry::Registry;
use crate::throughput::ThroughputTracker;

/// 处理单条控制消息
pub struct ControlHandler {
    registry: Arc<Registry>,
    throughput: Mutex<ThroughputTracker>,
    sink: Arc<dyn TelemetrySink>,
    stop_on_target: bool,
    shutdown_tx: broadcast::Sender<()>,
}

impl ControlHandler {
    pub fn new(
        registry: Arc<Registry>,
        sink: Arc<dyn TelemetrySink>,
        config: &SchedulerConfig,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self {
            registry,
            throughput: Mutex::new(ThroughputTracker::new(config.target_executions)),
            sink,
            stop_on_target: config.stop_on_target,
            shutdown_tx,
        }
    }

    fn throughput(&self) -> std::sync::MutexGuard<'_, ThroughputTracker> {
        self.throughput
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn completed(&self) -> u64 {
        self.throughput().completed()
    }

    pub fn handle(&self, message: Message) {
        trace!(sender = %message.sender, kind = %message.description, "收到控制消息");
        if let Err(e) = self.dispatch(&message) {
            warn!(
                "处理 {} 消息失败 (sender={}): {}",
                message.description, message.sender, e
            );
        }
    }

    fn dispatch(&self, message: &Message) -> PipelineResult<()> {
        match message.description {
            MessageKind::StageInfo => {
                let info: StageInfo = message.contents_as()?;
                self.registry.register(&message.sender, info.address, info.pid)?;
            }
            MessageKind::StageStats => {
                let stats: WorkerStats = message.contents_as()?;
                self.registry.update_stats(&message.sender, stats)?;
            }
            MessageKind::NotifyExit => {
                let worker_id = message
                    .contents_as::<String>()
                    .unwrap_or_else(|_| message.sender.clone());
                let worker = self.registry.remove_worker(&worker_id)?;
                info!(
                    worker_id = %worker_id,
                    "worker已退出: 节点 {}, 阶段 {}",
                    worker.host, worker.position
                );
            }
            MessageKind::StartFirstStage => {
                let at = message.timestamp()?;
                self.throughput().record_start(at);
                debug!("第0阶段开始生产: {}", at);
            }
            MessageKind::EndExecution => {
                let at = message.timestamp()?;
                let report = self.throughput().record_completion(at);
                if let Some(report) = report {
                    info!("达到目标完成数: {}", report);
                    self.sink.record(perf::THROUGHPUT, &report.to_string());
                    if self.stop_on_target {
                        info!("已达到目标，关闭master");
                        let _ = self.shutdown_tx.send(());
                    }
                }
            }
            kind => {
                warn!("master收到未预期的消息: {} (sender={})", kind, message.sender);
            }
        }
        Ok(())
    }
}

/// 控制端口的接受循环
pub struct ControlServer {
    listener: TcpListener,
    handler: Arc<ControlHandler>,
}

impl ControlServer {
    pub async fn bind(address: &str, handler: Arc<ControlHandler>) -> PipelineResult<Self> {
        let listener = TcpListener::bind(address).await?;
        info!("控制端口已监听: {}", listener.local_addr()?);
        Ok(Self { listener, handler })
    }

    pub fn local_addr(&self) -> PipelineResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let handler = Arc::clone(&self.handler);
                        let span = tracing::debug_span!("control_connection", %peer);
                        tokio::spawn(handle_connection(handler, stream).instrument(span));
                    }
                    Err(e) => warn!("接受控制连接失败: {}", e),
                },
                _ = shutdown_rx.recv() => {
                    info!("控制端口关闭");
                    break;
                }
            }
        }
    }
}

async fn handle_connection(handler: Arc<ControlHandler>, mut stream: TcpStream) {
    loop {
        match read_message(&mut stream).await {
            Ok(Some(message)) => handler.handle(message),
            Ok(None) => break,
            Err(e) => {
                warn!("读取控制消息失败，关闭连接: {}", e);
                break;
            }
        }
    }
}
