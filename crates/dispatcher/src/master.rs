use std::sync::Arc;

use pipeline_core::{
    AppConfig, PipelineError, PipelineResult, RemoteLauncher, TelemetrySink, WorkerMessenger,
};
use pipeline_domain::Topology;
use tokio::sync::broadcast;
use tracing::{error, info, info_span, Instrument};

use crate::command::WorkerCommand;
use crate::controller::{ControlHandler, ControlServer};
use crate::registry::Registry;
use crate::scheduler::Scheduler;

/// master 进程：控制端口加调度器
pub struct Master {
    scheduler: Scheduler,
    handler: Arc<ControlHandler>,
    bind_address: String,
    shutdown_tx: broadcast::Sender<()>,
}

impl Master {
    pub fn new(
        stage_count: usize,
        config: &AppConfig,
        launcher: Arc<dyn RemoteLauncher>,
        messenger: Arc<dyn WorkerMessenger>,
        sink: Arc<dyn TelemetrySink>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> PipelineResult<Self> {
        let nodes = config
            .cluster
            .resolve_nodes()
            .map_err(|e| PipelineError::Configuration(format!("{e:#}")))?;
        info!("集群节点: {:?}", nodes);

        let registry = Arc::new(Registry::new(Topology::new(nodes, stage_count)));
        let command = WorkerCommand::from_config(config)?;
        let scheduler = Scheduler::new(
            Arc::clone(&registry),
            launcher,
            messenger,
            command,
            config.scheduler.clone(),
        );
        let handler = Arc::new(ControlHandler::new(
            registry,
            sink,
            &config.scheduler,
            shutdown_tx.clone(),
        ));

        Ok(Self {
            scheduler,
            handler,
            bind_address: config.master.bind_address.clone(),
            shutdown_tx,
        })
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.scheduler.registry()
    }

    /// 放置、启动、连线后进入动态调度，直到收到关闭信号，最后终止所有 worker
    pub async fn run(&self) -> PipelineResult<()> {
        self.run_inner().instrument(info_span!("master")).await
    }

    async fn run_inner(&self) -> PipelineResult<()> {
        let server = ControlServer::bind(&self.bind_address, Arc::clone(&self.handler)).await?;
        let server_task = tokio::spawn(
            server
                .run(self.shutdown_tx.subscribe())
                .in_current_span(),
        );
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let bootstrapped = tokio::select! {
            result = self.bootstrap() => Some(result),
            _ = shutdown_rx.recv() => None,
        };

        let outcome = match bootstrapped {
            Some(Ok(())) => {
                self.scheduler.run_dynamic(shutdown_rx).await;
                Ok(())
            }
            Some(Err(e)) => {
                error!("流水线启动失败: {}", e);
                Err(e)
            }
            None => {
                info!("启动完成前收到关闭信号");
                Ok(())
            }
        };

        info!("终止所有worker");
        self.scheduler.terminate_all().await;
        let _ = self.shutdown_tx.send(());
        if let Err(e) = server_task.await {
            error!("控制端口任务异常结束: {}", e);
        }
        outcome
    }

    async fn bootstrap(&self) -> PipelineResult<()> {
        self.scheduler.static_schedule()?;
        self.scheduler.start_all().await;
        self.scheduler.wait_for_all().await?;
        self.scheduler.establish_communication().await?;
        self.scheduler.start_first_stage().await?;
        info!("流水线已启动");
        Ok(())
    }
}
