//! 调度器
//!
//! 持有拓扑注册表，负责静态放置、启动、连线以及动态调度（瓶颈扩容和内存合并）。

use std::sync::Arc;

use futures::future::join_all;
use pipeline_core::{
    FailureCallback, LaunchRequest, LaunchSignal, PipelineError, PipelineResult, RemoteLauncher,
    SchedulerConfig, WorkerId, WorkerMessenger,
};
use pipeline_domain::WorkerState;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::bottleneck::{find_bottleneck, stage_averages, Bottleneck};
use crate::command::WorkerCommand;
use crate::consolidation::{find_migration, Migration};
use crate::placement::place_stages;
use crate::registry::Registry;
use crate::wiring;

pub struct Scheduler {
    registry: Arc<Registry>,
    launcher: Arc<dyn RemoteLauncher>,
    messenger: Arc<dyn WorkerMessenger>,
    command: WorkerCommand,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        registry: Arc<Registry>,
        launcher: Arc<dyn RemoteLauncher>,
        messenger: Arc<dyn WorkerMessenger>,
        command: WorkerCommand,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            registry,
            launcher,
            messenger,
            command,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// 为每个阶段分配初始 worker
    pub fn static_schedule(&self) -> PipelineResult<Vec<WorkerId>> {
        let assigned = place_stages(&mut self.registry.lock())?;
        info!("静态放置完成: {} 个阶段", assigned.len());
        Ok(assigned)
    }

    /// 调用启动器启动一个已分配的 worker
    ///
    /// 启动器异步报告的失败通过回调写入注册表。
    pub async fn start_worker(&self, worker_id: &str) -> PipelineResult<()> {
        let request = {
            let mut topology = self.registry.lock();
            let worker = topology
                .find_worker(worker_id)
                .ok_or_else(|| PipelineError::worker_not_found(worker_id))?;
            let request = LaunchRequest {
                node: worker.host.clone(),
                worker_id: worker.id.clone(),
                position: worker.position,
                command: self.command.build(&worker.id, worker.position),
            };
            topology.mark_starting(worker_id)?;
            request
        };

        let registry = Arc::clone(&self.registry);
        let failed_id = worker_id.to_string();
        let on_failure: FailureCallback = Box::new(move |reason| {
            registry.mark_failed(&failed_id, reason);
        });

        match self.launcher.launch(request, on_failure).await {
            Ok(pid) => {
                debug!(worker_id, launcher_pid = pid, "启动命令已发出");
                Ok(())
            }
            Err(e) => {
                self.registry.mark_failed(worker_id, e.to_string());
                Err(e)
            }
        }
    }

    /// 启动所有尚未启动的 worker，单个失败只记录日志
    pub async fn start_all(&self) {
        let pending: Vec<WorkerId> = {
            let topology = self.registry.lock();
            let mut ids: Vec<WorkerId> = topology
                .workers()
                .filter(|w| w.state == WorkerState::Unstarted)
                .map(|w| w.id.clone())
                .collect();
            ids.sort_by_key(|id| id.parse::<u64>().unwrap_or(u64::MAX));
            ids
        };

        for id in pending {
            if let Err(e) = self.start_worker(&id).await {
                error!(worker_id = %id, "启动worker失败: {}", e);
            }
        }
    }

    /// 等待初始 worker 全部注册，每个阶段至少要有一个存活的 worker
    pub async fn wait_for_all(&self) -> PipelineResult<()> {
        self.registry
            .wait_for_all(
                self.config.registration_timeout(),
                self.config.registration_poll_interval(),
            )
            .await?;

        let topology = self.registry.lock();
        for stage in topology.stages().iter() {
            if topology.live_workers_at(stage.position).is_empty() {
                let failed: Vec<String> = topology
                    .workers_at(stage.position)
                    .into_iter()
                    .map(|w| w.id.clone())
                    .collect();
                return Err(PipelineError::start_failed(
                    failed.join(","),
                    format!("阶段 {} 没有可用的worker", stage.position),
                ));
            }
        }
        info!("所有worker已注册");
        Ok(())
    }

    pub async fn establish_communication(&self) -> PipelineResult<()> {
        wiring::initial_wiring(&self.registry, self.messenger.as_ref()).await
    }

    pub async fn start_first_stage(&self) -> PipelineResult<()> {
        wiring::start_first_stage(&self.registry, self.messenger.as_ref()).await
    }

    /// 启动一个新分配的 worker，等待注册后接入拓扑
    ///
    /// 任一步失败都会回滚这个 worker，本轮放弃，下一轮重新判断。
    async fn launch_and_wire(&self, worker_id: &str) -> PipelineResult<()> {
        let result = self.try_launch_and_wire(worker_id).await;
        if result.is_err() {
            self.roll_back(worker_id).await;
        }
        result
    }

    async fn try_launch_and_wire(&self, worker_id: &str) -> PipelineResult<()> {
        self.start_worker(worker_id).await?;
        self.registry
            .wait_for_registration(
                worker_id,
                self.config.registration_timeout(),
                self.config.registration_poll_interval(),
            )
            .await?;
        wiring::wire_worker(&self.registry, self.messenger.as_ref(), worker_id).await
    }

    /// 从拓扑中移除没能接入的 worker，节点上没有其他 worker 时回到空闲池
    ///
    /// 已注册的进程会收到终止信号。之后迟到的注册会因为找不到 worker 被拒绝。
    async fn roll_back(&self, worker_id: &str) {
        let worker = match self.registry.remove_worker(worker_id) {
            Ok(worker) => worker,
            Err(e) => {
                debug!(worker_id, "回滚时worker已不在拓扑中: {}", e);
                return;
            }
        };
        warn!(worker_id, node = %worker.host, "worker未能接入拓扑，已回滚");

        if let Some(pid) = worker.pid() {
            if let Err(e) = self
                .launcher
                .signal(&worker.host, pid, LaunchSignal::Terminate)
                .await
            {
                warn!(worker_id, "终止回滚的worker失败: {}", e);
            }
        }
    }

    /// 为瓶颈阶段扩容，返回实际新增的 worker 数
    ///
    /// 空闲节点用尽时提前结束；启动失败会中止本轮扩容。
    pub async fn scale_stage(&self, position: usize, factor: usize) -> PipelineResult<usize> {
        let mut added = 0;
        for _ in 0..factor {
            let worker_id = {
                let mut topology = self.registry.lock();
                if topology.free_nodes().is_empty() {
                    info!("没有空闲节点，停止扩容阶段 {}", position);
                    break;
                }
                let id = topology.add_worker_on_free_node(position)?;
                topology.mark_scaled(position);
                id
            };

            self.launch_and_wire(&worker_id).await?;
            added += 1;
            info!(worker_id = %worker_id, position, "扩容完成");
        }
        Ok(added)
    }

    /// 执行一次内存合并，没有可迁移的 worker 时返回 `None`
    pub async fn consolidate(&self) -> PipelineResult<Option<Migration>> {
        let migration = {
            let topology = self.registry.lock();
            find_migration(&topology)
        };
        let Some(migration) = migration else {
            return Ok(None);
        };
        info!(
            "迁移worker {}: {} -> {} (阶段 {})",
            migration.worker_id, migration.from_host, migration.to_host, migration.position
        );

        let replacement = {
            let mut topology = self.registry.lock();
            topology.add_worker(migration.position, &migration.to_host)?
        };
        self.launch_and_wire(&replacement).await?;

        let notified = wiring::break_predecessors(
            &self.registry,
            self.messenger.as_ref(),
            &migration.old_address,
            migration.position,
        )
        .await;
        debug!("{} 个上游已断开到 {} 的连接", notified, migration.old_address);

        let pid = {
            let mut topology = self.registry.lock();
            topology.mark_exiting(&migration.worker_id)?;
            topology
                .find_worker(&migration.worker_id)
                .and_then(|w| w.pid())
        };
        match pid {
            Some(pid) => {
                self.launcher
                    .signal(&migration.from_host, pid, LaunchSignal::Flush)
                    .await?
            }
            None => warn!("worker {} 没有进程号，无法通知退出", migration.worker_id),
        }

        Ok(Some(migration))
    }

    /// 检测当前的瓶颈，并标出该阶段之前是否扩容过
    pub fn detect_bottleneck(&self) -> Option<Bottleneck> {
        let topology = self.registry.lock();
        let averages = stage_averages(&topology);
        debug!(?averages, "各阶段平均执行时间");
        find_bottleneck(&averages, self.config.bottleneck_threshold).map(|bottleneck| {
            Bottleneck {
                previously_scaled: topology
                    .stage(bottleneck.position)
                    .is_some_and(|stage| stage.scaled),
                ..bottleneck
            }
        })
    }

    /// 一轮动态调度：先处理瓶颈，再尝试合并
    pub async fn tick(&self) {
        if self.config.scaling_enabled {
            if let Some(bottleneck) = self.detect_bottleneck() {
                info!(
                    previously_scaled = bottleneck.previously_scaled,
                    "检测到瓶颈: 阶段 {} 平均 {:.3}ms, 相邻 {:.3}ms, 扩容 {} 个",
                    bottleneck.position,
                    bottleneck.average,
                    bottleneck.neighbor_average,
                    bottleneck.scale_factor
                );
                if let Err(e) = self
                    .scale_stage(bottleneck.position, bottleneck.scale_factor)
                    .await
                {
                    warn!("扩容阶段 {} 失败: {}", bottleneck.position, e);
                }
            }
        }

        if self.config.consolidation_enabled {
            if let Err(e) = self.consolidate().await {
                warn!("内存合并失败: {}", e);
            }
        }
    }

    /// 按固定间隔运行动态调度，直到收到关闭信号
    pub async fn run_dynamic(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = shutdown_rx.recv() => {
                    info!("动态调度循环退出");
                    break;
                }
            }
        }
    }

    /// 并发地向所有已注册的 worker 发送终止信号
    pub async fn terminate_all(&self) {
        let processes = self.registry.registered_processes();
        let results = join_all(processes.iter().map(|(_, host, pid)| {
            self.launcher.signal(host, *pid, LaunchSignal::Terminate)
        }))
        .await;

        for ((id, _, _), result) in processes.iter().zip(results) {
            if let Err(e) = result {
                warn!(worker_id = %id, "终止worker失败: {}", e);
            }
        }
    }
}
