use std::sync::{Arc, Mutex};
use std::time::Duration;

use pipeline_core::{Message, MessageKind, WorkerId};
use pipeline_domain::WorkerStats;
use pipeline_infrastructure::memory;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

use super::MasterClient;

/// 线程安全的统计数据
#[derive(Debug, Clone, Default)]
pub struct StatsTracker {
    stats: Arc<Mutex<WorkerStats>>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_execution(&self, elapsed: Duration) {
        self.with(|s| s.update_execution_time(elapsed));
    }

    pub fn record_memory(&self, usage: u64, available: u64) {
        self.with(|s| s.update_memory_usage(usage, available));
    }

    pub fn set_backlog(&self, backlog: usize) {
        self.with(|s| s.update_backlog(backlog));
    }

    /// 当前统计的副本
    pub fn snapshot(&self) -> WorkerStats {
        self.with(|s| *s)
    }

    fn with<R>(&self, f: impl FnOnce(&mut WorkerStats) -> R) -> R {
        let mut guard = self
            .stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

/// 定期采样内存并把统计快照发送给 master
pub struct StatsReporter {
    worker_id: WorkerId,
    tracker: StatsTracker,
    client: MasterClient,
    interval: Duration,
}

impl StatsReporter {
    pub fn new(
        worker_id: WorkerId,
        tracker: StatsTracker,
        client: MasterClient,
        interval: Duration,
    ) -> Self {
        Self {
            worker_id,
            tracker,
            client,
            interval,
        }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = interval(self.interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.report_once().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("统计上报任务退出");
                    break;
                }
            }
        }
    }

    async fn report_once(&self) {
        self.tracker
            .record_memory(memory::process_memory_usage(), memory::available_memory());
        let snapshot = self.tracker.snapshot();
        debug!(?snapshot, "上报统计");

        let message = match Message::new(self.worker_id.clone(), MessageKind::StageStats, &snapshot) {
            Ok(message) => message,
            Err(e) => {
                warn!("序列化统计数据失败: {}", e);
                return;
            }
        };
        if let Err(e) = self.client.send(&message).await {
            warn!("发送统计数据失败: {}", e);
        }
    }
}
