//! worker 进程运行时
//!
//! 一个 worker 执行流水线中的一个阶段，按位置分为三种角色：
//!
//! - 第0阶段：没有上游，收到 `StartWorker` 后循环执行阶段函数，结果放入输出队列
//! - 中间阶段：从上游连接读取结果放入输入队列，执行后放入输出队列
//! - 最后阶段：执行后不再转发，而是向 master 发送带时间戳的 `EndExecution`
//!
//! 输出队列由发送任务取出，按轮询分发到当前所有下游连接。
//! 控制消息（新增/断开下游、启动）在整个运行期间都会处理。
//!
//! 状态变化：`Registering → AwaitingTopology → (第0阶段: AwaitingStart) → Running → Draining → Exited`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use pipeline_core::traits::perf;
use pipeline_core::{
    DynStage, Message, MessageKind, Pipeline, PipelineError, PipelineResult, TelemetrySink,
    WorkerConfig, WorkerId,
};
use pipeline_infrastructure::transport::read_message;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use crate::components::{MasterClient, StatsReporter, StatsTracker};
use crate::connections::Connections;
use crate::queue::WorkQueue;

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub worker_id: WorkerId,
    pub position: usize,
    pub master_address: String,
    pub queue_capacity: usize,
    pub stats_interval: Duration,
    pub registration_timeout: Duration,
    pub bind_host: String,
    pub advertise_host: Option<String>,
}

impl WorkerOptions {
    pub fn new(worker_id: impl Into<WorkerId>, position: usize, master_address: impl Into<String>) -> Self {
        Self::from_config(worker_id, position, master_address, &WorkerConfig::default())
    }

    pub fn from_config(
        worker_id: impl Into<WorkerId>,
        position: usize,
        master_address: impl Into<String>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            position,
            master_address: master_address.into(),
            queue_capacity: config.queue_capacity,
            stats_interval: config.stats_interval(),
            registration_timeout: config.registration_timeout(),
            bind_host: config.bind_host.clone(),
            advertise_host: config.advertise_host.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorkerPhase {
    Registering,
    AwaitingTopology,
    AwaitingStart,
    Running,
    Draining,
    Exited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// 队列清空后正常退出
    Drained,
    /// 收到终止请求立即退出
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopRequest {
    Drain,
    Terminate,
}

/// 在进程内请求 worker 退出
#[derive(Debug, Clone)]
pub struct DrainHandle {
    tx: mpsc::UnboundedSender<StopRequest>,
}

impl DrainHandle {
    /// 等待输入输出队列清空后退出，并通知 master
    pub fn drain(&self) {
        let _ = self.tx.send(StopRequest::Drain);
    }

    /// 关闭所有连接后立即退出
    pub fn terminate(&self) {
        let _ = self.tx.send(StopRequest::Terminate);
    }
}

struct Shared {
    worker_id: WorkerId,
    position: usize,
    forwards: bool,
    stage: Arc<dyn DynStage>,
    input: WorkQueue<Value>,
    output: WorkQueue<Value>,
    connections: Connections,
    stats: StatsTracker,
    client: MasterClient,
    sink: Arc<dyn TelemetrySink>,
    phase: watch::Sender<WorkerPhase>,
    started: watch::Sender<bool>,
    stopping: watch::Sender<bool>,
    announced_start: AtomicBool,
}

impl Shared {
    fn advance_phase(&self, next: WorkerPhase) {
        self.phase.send_if_modified(|phase| {
            if *phase < next {
                debug!("状态变化: {:?} -> {:?}", *phase, next);
                *phase = next;
                true
            } else {
                false
            }
        });
    }

    async fn execute(&self, input: Option<Value>) -> Option<Value> {
        let stage = Arc::clone(&self.stage);
        self.sink.record(perf::STAGE_EXECUTION_STARTED, "");
        let started = Instant::now();
        let result = tokio::task::spawn_blocking(move || stage.call(input)).await;
        let elapsed = started.elapsed();

        self.stats.record_execution(elapsed);
        self.sink.record(
            perf::STAGE_EXECUTION_ENDED,
            &format!("{:.3}", elapsed.as_secs_f64() * 1000.0),
        );

        match result {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                error!("阶段执行失败: {}", e);
                None
            }
            Err(e) => {
                error!("阶段执行任务异常退出: {}", e);
                None
            }
        }
    }

    /// 转发阶段把结果放入输出队列，最后阶段放入完成时间
    async fn finish(&self, value: Value) {
        let item = if self.forwards {
            value
        } else {
            serde_json::json!(Utc::now())
        };
        if self.output.push(item).await.is_err() {
            debug!("输出队列已关闭，丢弃结果");
        }
    }

    async fn handle_message(&self, message: Message) {
        match message.description {
            MessageKind::StageResult => {
                if self.position == 0 {
                    warn!("第0阶段收到来自 {} 的阶段结果，忽略", message.sender);
                    return;
                }
                if self.input.push(message.contents).await.is_err() {
                    debug!("输入队列已关闭，丢弃输入");
                    return;
                }
                self.stats.set_backlog(self.input.len());
                self.advance_phase(WorkerPhase::Running);
            }
            MessageKind::AddNextStageAddr => {
                let address = match message.address() {
                    Ok(address) => address,
                    Err(e) => {
                        warn!("{}", e);
                        return;
                    }
                };
                if !self.forwards {
                    warn!("最后阶段不需要下游地址，忽略: {}", address);
                    return;
                }
                if let Err(e) = self.connections.connect(&address).await {
                    error!("连接下游 {} 失败: {}", address, e);
                    return;
                }
                if self.position == 0 {
                    self.advance_phase(WorkerPhase::AwaitingStart);
                }
            }
            MessageKind::BreakConnection => match message.address() {
                Ok(address) => {
                    if !self.connections.remove(&address).await {
                        debug!("要断开的连接不存在: {}", address);
                    }
                }
                Err(e) => warn!("{}", e),
            },
            MessageKind::StartWorker => {
                if self.position == 0 {
                    info!("收到启动命令");
                    self.started.send_replace(true);
                } else {
                    warn!("非第0阶段收到启动命令，忽略");
                }
            }
            kind => {
                warn!("收到未预期的消息: {} (sender={})", kind, message.sender);
            }
        }
    }
}

/// 单个 worker 进程的运行时
pub struct WorkerRuntime {
    shared: Arc<Shared>,
    options: WorkerOptions,
    stop_tx: mpsc::UnboundedSender<StopRequest>,
    stop_rx: mpsc::UnboundedReceiver<StopRequest>,
}

impl WorkerRuntime {
    pub fn new(
        pipeline: &Pipeline,
        options: WorkerOptions,
        sink: Arc<dyn TelemetrySink>,
    ) -> PipelineResult<Self> {
        let stage = pipeline.stage(options.position)?;
        let max_position = pipeline.max_position().ok_or(PipelineError::StageNotFound {
            position: options.position,
        })?;
        if options.queue_capacity == 0 {
            return Err(PipelineError::Configuration("队列容量必须大于0".to_string()));
        }

        let client = MasterClient::new(
            options.master_address.clone(),
            options.worker_id.clone(),
            options.registration_timeout,
        );
        let (stop_tx, stop_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            worker_id: options.worker_id.clone(),
            position: options.position,
            forwards: options.position < max_position,
            stage,
            input: WorkQueue::new(options.queue_capacity),
            output: WorkQueue::new(options.queue_capacity),
            connections: Connections::new(options.registration_timeout),
            stats: StatsTracker::new(),
            client,
            sink,
            phase: watch::Sender::new(WorkerPhase::Registering),
            started: watch::Sender::new(false),
            stopping: watch::Sender::new(false),
            announced_start: AtomicBool::new(false),
        });

        Ok(Self {
            shared,
            options,
            stop_tx,
            stop_rx,
        })
    }

    pub fn drain_handle(&self) -> DrainHandle {
        DrainHandle {
            tx: self.stop_tx.clone(),
        }
    }

    pub fn phase(&self) -> watch::Receiver<WorkerPhase> {
        self.shared.phase.subscribe()
    }

    pub fn stats(&self) -> StatsTracker {
        self.shared.stats.clone()
    }

    /// 注册到 master 并运行，直到收到退出请求
    pub async fn run(self) -> PipelineResult<ExitReason> {
        let span = info_span!(
            "worker",
            worker_id = %self.shared.worker_id,
            position = self.shared.position
        );
        self.run_inner().instrument(span).await
    }

    async fn run_inner(mut self) -> PipelineResult<ExitReason> {
        let shared = Arc::clone(&self.shared);

        let listener = TcpListener::bind((self.options.bind_host.as_str(), 0)).await?;
        let port = listener.local_addr()?.port();
        let address = shared
            .client
            .register(port, self.options.advertise_host.as_deref())
            .await?;
        shared.sink.record(perf::WORKER_STARTED, &address);
        info!("worker已启动: address={}, forwards={}", address, shared.forwards);
        shared.advance_phase(WorkerPhase::AwaitingTopology);

        let (shutdown_tx, _) = broadcast::channel(1);
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        tasks.push(tokio::spawn(
            accept_loop(Arc::clone(&shared), listener).in_current_span(),
        ));

        let reporter = StatsReporter::new(
            shared.worker_id.clone(),
            shared.stats.clone(),
            shared.client.clone(),
            self.options.stats_interval,
        );
        tasks.push(tokio::spawn(
            reporter.run(shutdown_tx.subscribe()).in_current_span(),
        ));

        let producer = if shared.position == 0 {
            if !shared.forwards {
                shared.advance_phase(WorkerPhase::AwaitingStart);
            }
            Some(tokio::spawn(
                produce_loop(Arc::clone(&shared)).in_current_span(),
            ))
        } else {
            tasks.push(tokio::spawn(
                execute_loop(Arc::clone(&shared)).in_current_span(),
            ));
            None
        };

        if shared.forwards {
            tasks.push(tokio::spawn(send_loop(Arc::clone(&shared)).in_current_span()));
        } else {
            tasks.push(tokio::spawn(
                completion_loop(Arc::clone(&shared)).in_current_span(),
            ));
        }

        let request = self.stop_rx.recv().await.unwrap_or(StopRequest::Terminate);
        let outcome = match request {
            StopRequest::Drain => {
                tokio::select! {
                    result = drain(Arc::clone(&shared), producer) => {
                        result.map(|_| ExitReason::Drained)
                    }
                    _ = wait_for_terminate(&mut self.stop_rx) => {
                        warn!("清空队列期间收到终止请求");
                        shared.connections.close_all().await;
                        Ok(ExitReason::Terminated)
                    }
                }
            }
            StopRequest::Terminate => {
                info!("终止worker");
                if let Some(producer) = producer {
                    producer.abort();
                }
                shared.connections.close_all().await;
                Ok(ExitReason::Terminated)
            }
        };

        let _ = shutdown_tx.send(());
        shared.input.close();
        shared.output.close();
        for task in tasks {
            task.abort();
        }
        shared.advance_phase(WorkerPhase::Exited);
        match outcome {
            Ok(reason) => info!("worker退出: {:?}", reason),
            Err(ref e) => error!("worker退出时出错: {}", e),
        }
        outcome
    }
}

async fn wait_for_terminate(stop_rx: &mut mpsc::UnboundedReceiver<StopRequest>) {
    loop {
        match stop_rx.recv().await {
            Some(StopRequest::Terminate) | None => return,
            Some(StopRequest::Drain) => continue,
        }
    }
}

/// 停止生产，等待队列清空，关闭连接后通知 master
async fn drain(shared: Arc<Shared>, producer: Option<JoinHandle<()>>) -> PipelineResult<()> {
    info!("开始清空队列");
    shared.advance_phase(WorkerPhase::Draining);
    shared.stopping.send_replace(true);
    if let Some(producer) = producer {
        if let Err(e) = producer.await {
            warn!("生产任务异常结束: {}", e);
        }
    }

    loop {
        shared.input.wait_until_drained().await;
        shared.output.wait_until_drained().await;
        if shared.input.pending() == 0 && shared.output.pending() == 0 {
            break;
        }
    }

    shared.connections.close_all().await;
    shared.client.notify_exit().await?;
    info!("队列已清空，已通知master退出");
    Ok(())
}

async fn accept_loop(shared: Arc<Shared>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                trace!("接受连接: {}", peer);
                tokio::spawn(handle_connection(Arc::clone(&shared), stream).in_current_span());
            }
            Err(e) => {
                warn!("接受连接失败: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn handle_connection(shared: Arc<Shared>, mut stream: TcpStream) {
    loop {
        match read_message(&mut stream).await {
            Ok(Some(message)) => shared.handle_message(message).await,
            Ok(None) => break,
            Err(e) => {
                warn!("读取消息失败，关闭连接: {}", e);
                break;
            }
        }
    }
}

async fn produce_loop(shared: Arc<Shared>) {
    let mut started = shared.started.subscribe();
    let mut stopping = shared.stopping.subscribe();

    tokio::select! {
        result = async { started.wait_for(|s| *s).await.map(|_| ()) } => {
            if result.is_err() {
                return;
            }
        }
        _ = async { stopping.wait_for(|s| *s).await.map(|_| ()) } => return,
    }

    if !shared.announced_start.swap(true, Ordering::SeqCst) {
        if let Err(e) = shared.client.start_first_stage(Utc::now()).await {
            warn!("发送开始时间失败: {}", e);
        }
    }
    shared.advance_phase(WorkerPhase::Running);
    info!("开始生产");

    while !*stopping.borrow() {
        if let Some(value) = shared.execute(None).await {
            shared.finish(value).await;
        }
    }
    info!("生产已停止");
}

async fn execute_loop(shared: Arc<Shared>) {
    while let Some(input) = shared.input.pop().await {
        shared.stats.set_backlog(shared.input.len());
        if let Some(value) = shared.execute(Some(input)).await {
            shared.finish(value).await;
        }
        shared.input.task_done();
    }
}

async fn send_loop(shared: Arc<Shared>) {
    while let Some(value) = shared.output.pop().await {
        let message = Message::stage_result(shared.worker_id.clone(), value);
        match shared.connections.send_round_robin(&message).await {
            Ok(address) => trace!("结果已发送到 {}", address),
            Err(e) => warn!("结果发送失败: {}", e),
        }
        shared.output.task_done();
    }
}

async fn completion_loop(shared: Arc<Shared>) {
    while let Some(value) = shared.output.pop().await {
        let at: DateTime<Utc> = serde_json::from_value(value).unwrap_or_else(|_| Utc::now());
        if let Err(e) = shared.client.end_execution(at).await {
            warn!("发送完成时间失败: {}", e);
        }
        shared.output.task_done();
    }
}
