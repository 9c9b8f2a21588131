use async_trait::async_trait;

use crate::{PipelineResult, WorkerId};

/// 启动失败回调，参数为失败原因
pub type FailureCallback = Box<dyn FnOnce(String) + Send + 'static>;

/// 在某个节点上启动一个 worker 进程的请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub node: String,
    pub worker_id: WorkerId,
    pub position: usize,
    pub command: String,
}

/// 发送给远程 worker 进程的信号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchSignal {
    /// 清空队列后退出 (SIGUSR1)
    Flush,
    /// 立即终止 (SIGTERM)
    Terminate,
}

impl LaunchSignal {
    pub fn as_kill_arg(&self) -> &'static str {
        match self {
            LaunchSignal::Flush => "-USR1",
            LaunchSignal::Terminate => "-TERM",
        }
    }
}

/// 远程进程启动器
#[async_trait]
pub trait RemoteLauncher: Send + Sync {
    /// 启动命令并返回本地句柄的进程号。
    /// 启动失败或远程命令异常退出时调用 `on_failure`。
    async fn launch(&self, request: LaunchRequest, on_failure: FailureCallback)
        -> PipelineResult<u32>;

    /// 向指定节点上的进程发送信号
    async fn signal(&self, node: &str, pid: u32, signal: LaunchSignal) -> PipelineResult<()>;
}
