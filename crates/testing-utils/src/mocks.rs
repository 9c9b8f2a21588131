//! 核心 trait 的内存实现
//!
//! 不启动任何进程、不建立任何连接，只记录调用，供测试断言。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pipeline_core::{
    FailureCallback, LaunchRequest, LaunchSignal, Message, MessageKind, PipelineError,
    PipelineResult, RemoteLauncher, TelemetrySink, WorkerMessenger,
};
use tokio::sync::mpsc;

/// 一次信号发送记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentSignal {
    pub node: String,
    pub pid: u32,
    pub signal: LaunchSignal,
}

/// 记录启动请求的启动器
///
/// 每次启动都会把请求推送到 [`MockLauncher::subscribe`] 返回的通道中，
/// 测试可以据此模拟 worker 注册。通过 [`MockLauncher::fail_worker`] 指定的
/// worker 会立即触发失败回调。
#[derive(Debug, Clone)]
pub struct MockLauncher {
    launches: Arc<Mutex<Vec<LaunchRequest>>>,
    signals: Arc<Mutex<Vec<SentSignal>>>,
    failing: Arc<Mutex<HashSet<String>>>,
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<LaunchRequest>>>>,
    next_pid: Arc<AtomicU32>,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self {
            launches: Arc::new(Mutex::new(Vec::new())),
            signals: Arc::new(Mutex::new(Vec::new())),
            failing: Arc::new(Mutex::new(HashSet::new())),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_pid: Arc::new(AtomicU32::new(1000)),
        }
    }

    /// 之后的每次启动请求都会发送到返回的通道
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<LaunchRequest> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// 该 worker 启动时调用失败回调
    pub fn fail_worker(&self, worker_id: &str) {
        self.failing.lock().unwrap().insert(worker_id.to_string());
    }

    pub fn launches(&self) -> Vec<LaunchRequest> {
        self.launches.lock().unwrap().clone()
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }

    pub fn signals(&self) -> Vec<SentSignal> {
        self.signals.lock().unwrap().clone()
    }

    pub fn signals_of(&self, signal: LaunchSignal) -> Vec<SentSignal> {
        self.signals()
            .into_iter()
            .filter(|s| s.signal == signal)
            .collect()
    }

    pub fn clear(&self) {
        self.launches.lock().unwrap().clear();
        self.signals.lock().unwrap().clear();
    }
}

impl Default for MockLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteLauncher for MockLauncher {
    async fn launch(
        &self,
        request: LaunchRequest,
        on_failure: FailureCallback,
    ) -> PipelineResult<u32> {
        self.launches.lock().unwrap().push(request.clone());

        if self.failing.lock().unwrap().contains(&request.worker_id) {
            on_failure(format!("模拟启动失败: worker {}", request.worker_id));
            return Ok(0);
        }

        self.subscribers
            .lock()
            .unwrap()
            .retain(|tx| tx.send(request.clone()).is_ok());
        Ok(self.next_pid.fetch_add(1, Ordering::SeqCst))
    }

    async fn signal(&self, node: &str, pid: u32, signal: LaunchSignal) -> PipelineResult<()> {
        self.signals.lock().unwrap().push(SentSignal {
            node: node.to_string(),
            pid,
            signal,
        });
        Ok(())
    }
}

/// 按目标地址记录控制消息
#[derive(Debug, Clone, Default)]
pub struct MockMessenger {
    sent: Arc<Mutex<Vec<(String, Message)>>>,
    unreachable: Arc<Mutex<HashSet<String>>>,
}

impl MockMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 发往该地址的消息返回网络错误
    pub fn set_unreachable(&self, address: &str) {
        self.unreachable.lock().unwrap().insert(address.to_string());
    }

    /// 按发送顺序排列的全部消息
    pub fn sent(&self) -> Vec<(String, Message)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, address: &str) -> Vec<Message> {
        self.sent()
            .into_iter()
            .filter(|(to, _)| to == address)
            .map(|(_, message)| message)
            .collect()
    }

    pub fn sent_of_kind(&self, kind: MessageKind) -> Vec<(String, Message)> {
        self.sent()
            .into_iter()
            .filter(|(_, message)| message.description == kind)
            .collect()
    }

    /// 每个地址最终的下游集合，按消息顺序重放 AddNextStageAddr / BreakConnection
    pub fn downstream_sets(&self) -> HashMap<String, HashSet<String>> {
        let mut sets: HashMap<String, HashSet<String>> = HashMap::new();
        for (to, message) in self.sent() {
            let Ok(address) = message.address() else {
                continue;
            };
            match message.description {
                MessageKind::AddNextStageAddr => {
                    sets.entry(to).or_default().insert(address);
                }
                MessageKind::BreakConnection => {
                    sets.entry(to).or_default().remove(&address);
                }
                _ => {}
            }
        }
        sets
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl WorkerMessenger for MockMessenger {
    async fn send(&self, address: &str, message: Message) -> PipelineResult<()> {
        if self.unreachable.lock().unwrap().contains(address) {
            return Err(PipelineError::Network(format!("模拟连接失败: {address}")));
        }
        self.sent.lock().unwrap().push((address.to_string(), message));
        Ok(())
    }
}

/// 在内存中收集性能日志
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    records: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(String, String)> {
        self.records.lock().unwrap().clone()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k == kind)
            .count()
    }
}

impl TelemetrySink for RecordingSink {
    fn record(&self, kind: &str, detail: &str) {
        self.records
            .lock()
            .unwrap()
            .push((kind.to_string(), detail.to_string()));
    }
}
