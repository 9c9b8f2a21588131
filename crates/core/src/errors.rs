use thiserror::Error;

/// 流水线系统错误类型定义
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("消息帧过大: {size} 字节 (上限 {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("网络错误: {0}")]
    Network(String),

    #[error("注册到master超时: {0}")]
    RegistrationTimeout(String),

    #[error("没有可用的空闲节点")]
    NoFreeNodes,

    #[error("Worker未找到: {id}")]
    WorkerNotFound { id: String },

    #[error("流水线阶段未找到: {position}")]
    StageNotFound { position: usize },

    #[error("Worker启动失败: {id} - {reason}")]
    WorkerStartFailed { id: String, reason: String },

    #[error("远程启动错误: {0}")]
    Launch(String),

    #[error("阶段执行错误: {0}")]
    StageExecution(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn worker_not_found<S: Into<String>>(id: S) -> Self {
        Self::WorkerNotFound { id: id.into() }
    }

    pub fn start_failed<S: Into<String>, R: Into<String>>(id: S, reason: R) -> Self {
        Self::WorkerStartFailed {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// 对端关闭或帧损坏，只影响当前连接
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Serialization(_) | Self::FrameTooLarge { .. } | Self::Network(_)
        )
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
