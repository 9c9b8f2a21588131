use serde::{Deserialize, Serialize};

use crate::{WorkerId, WorkerStats};

/// worker 进程的生命周期状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    /// 已分配，尚未调用启动器
    Unstarted,
    /// 启动命令已发出，等待注册
    Starting,
    /// 已注册，地址和进程号都已知
    Running { pid: u32 },
    /// 启动失败，终态
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub host: String,
    /// 执行的阶段位置
    pub position: usize,
    /// 监听地址，注册前为空
    pub address: Option<String>,
    pub state: WorkerState,
    pub stats: WorkerStats,
    /// 正在退出的 worker 不再参与连线
    pub exiting: bool,
}

impl Worker {
    pub fn new(id: WorkerId, host: impl Into<String>, position: usize) -> Self {
        Self {
            id,
            host: host.into(),
            position,
            address: None,
            state: WorkerState::Unstarted,
            stats: WorkerStats::default(),
            exiting: false,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        match self.state {
            WorkerState::Running { pid } => Some(pid),
            _ => None,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.pid().is_some() && self.address.is_some()
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, WorkerState::Failed { .. })
    }

    /// 已注册且未退出
    pub fn is_live(&self) -> bool {
        self.is_registered() && !self.exiting
    }

    pub fn live_address(&self) -> Option<&str> {
        if self.is_live() {
            self.address.as_deref()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_flags() {
        let mut worker = Worker::new("1".to_string(), "node-a", 0);
        assert!(!worker.is_registered());
        assert_eq!(worker.live_address(), None);

        worker.state = WorkerState::Running { pid: 42 };
        assert!(!worker.is_registered());

        worker.address = Some("node-a:5000".to_string());
        assert!(worker.is_live());
        assert_eq!(worker.pid(), Some(42));

        worker.exiting = true;
        assert!(worker.is_registered());
        assert!(!worker.is_live());
    }

    #[test]
    fn test_failed_state() {
        let mut worker = Worker::new("2".to_string(), "node-b", 1);
        worker.state = WorkerState::Failed {
            reason: "ssh exited with 255".to_string(),
        };
        assert!(worker.is_failed());
        assert_eq!(worker.pid(), None);
    }
}
