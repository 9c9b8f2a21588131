//! master 持有的拓扑注册表
//!
//! 所有读改写都在同一把锁内完成。锁只在同步代码中持有，不跨越 `.await`。
//! 每次注册状态变化都会推进一个代数计数器，等待注册的任务据此被唤醒。

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use pipeline_core::{PipelineError, PipelineResult, WorkerId};
use pipeline_domain::{Topology, Worker, WorkerState, WorkerStats};
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

pub struct Registry {
    topology: Mutex<Topology>,
    changes: watch::Sender<u64>,
}

impl Registry {
    pub fn new(topology: Topology) -> Self {
        Self {
            topology: Mutex::new(topology),
            changes: watch::Sender::new(0),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Topology> {
        self.topology
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self) {
        self.changes.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// 记录 worker 上报的监听地址和进程号
    pub fn register(&self, id: &str, address: String, pid: u32) -> PipelineResult<()> {
        self.lock().update_info(id, address.clone(), pid)?;
        info!(worker_id = id, pid, "worker已注册: {}", address);
        self.notify();
        Ok(())
    }

    /// 启动器回调：标记启动失败
    pub fn mark_failed(&self, id: &str, reason: String) {
        match self.lock().mark_failed(id, reason.clone()) {
            Ok(true) => warn!(worker_id = id, "worker启动失败: {}", reason),
            Ok(false) => debug!(worker_id = id, "worker已注册，忽略启动器退出: {}", reason),
            Err(e) => debug!("{}", e),
        }
        self.notify();
    }

    pub fn update_stats(&self, id: &str, stats: WorkerStats) -> PipelineResult<()> {
        self.lock().update_stats(id, stats)
    }

    pub fn remove_worker(&self, id: &str) -> PipelineResult<Worker> {
        let worker = self.lock().remove_worker(id)?;
        self.notify();
        Ok(worker)
    }

    /// 等待 worker 注册完成
    ///
    /// 状态变化时立即重新检查，`poll` 是两次检查之间的最长间隔。
    /// worker 启动失败返回 `WorkerStartFailed`，超过 `timeout` 返回 `RegistrationTimeout`。
    pub async fn wait_for_registration(
        &self,
        id: &str,
        timeout: Duration,
        poll: Duration,
    ) -> PipelineResult<Worker> {
        let check = |topology: &Topology| -> PipelineResult<Option<Worker>> {
            let worker = topology
                .find_worker(id)
                .ok_or_else(|| PipelineError::worker_not_found(id))?;
            match &worker.state {
                WorkerState::Failed { reason } => Err(PipelineError::start_failed(id, reason.clone())),
                _ if worker.is_registered() => Ok(Some(worker.clone())),
                _ => Ok(None),
            }
        };

        self.wait_until(check, timeout, poll)
            .await
            .map_err(|e| match e {
                PipelineError::RegistrationTimeout(_) => PipelineError::RegistrationTimeout(
                    format!("worker {id} 在 {timeout:?} 内没有注册"),
                ),
                other => other,
            })
    }

    /// 等待所有 worker 注册或失败
    pub async fn wait_for_all(&self, timeout: Duration, poll: Duration) -> PipelineResult<()> {
        let check = |topology: &Topology| -> PipelineResult<Option<()>> {
            Ok(topology.all_registered().then_some(()))
        };
        self.wait_until(check, timeout, poll).await
    }

    async fn wait_until<T>(
        &self,
        check: impl Fn(&Topology) -> PipelineResult<Option<T>>,
        timeout: Duration,
        poll: Duration,
    ) -> PipelineResult<T> {
        let deadline = Instant::now() + timeout;
        let mut changes = self.changes.subscribe();

        loop {
            changes.borrow_and_update();
            let ready = {
                let topology = self.lock();
                check(&topology)?
            };
            if let Some(value) = ready {
                return Ok(value);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(PipelineError::RegistrationTimeout(format!(
                    "等待 {timeout:?} 后仍未完成注册"
                )));
            }

            let wait = poll.min(deadline - now);
            tokio::select! {
                _ = changes.changed() => {}
                _ = sleep(wait) => {}
            }
        }
    }

    /// 所有已注册 worker 的 (编号, 节点, 进程号)
    pub fn registered_processes(&self) -> Vec<(WorkerId, String, u32)> {
        let topology = self.lock();
        let mut processes: Vec<_> = topology
            .workers()
            .filter_map(|w| w.pid().map(|pid| (w.id.clone(), w.host.clone(), pid)))
            .collect();
        processes.sort_by_key(|(id, _, _)| id.parse::<u64>().unwrap_or(u64::MAX));
        processes
    }
}
