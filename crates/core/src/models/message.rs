use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{PipelineError, PipelineResult};

/// Worker 标识，由 master 单调递增分配
pub type WorkerId = String;

/// master 发出的消息统一使用的发送者标识
pub const MASTER_SENDER_ID: &str = "0";

/// 消息类型
///
/// 未识别的类型反序列化为 `Unknown`，接收方记录日志后忽略，不断开连接。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// worker → master: 监听地址和进程号
    StageInfo,
    /// master → worker: 新的下游地址
    AddNextStageAddr,
    /// worker → worker: 阶段输出
    StageResult,
    /// worker → master: 性能统计快照
    StageStats,
    /// master → worker (仅第0阶段): 开始生产
    StartWorker,
    /// master → worker: 需要断开的下游地址
    BreakConnection,
    /// worker → master: 即将退出
    NotifyExit,
    /// worker → master: 第0阶段开始生产的时间
    StartFirstStage,
    /// worker → master: 最后阶段完成一次执行的时间
    EndExecution,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageKind::StageInfo => "StageInfo",
            MessageKind::AddNextStageAddr => "AddNextStageAddr",
            MessageKind::StageResult => "StageResult",
            MessageKind::StageStats => "StageStats",
            MessageKind::StartWorker => "StartWorker",
            MessageKind::BreakConnection => "BreakConnection",
            MessageKind::NotifyExit => "NotifyExit",
            MessageKind::StartFirstStage => "StartFirstStage",
            MessageKind::EndExecution => "EndExecution",
            MessageKind::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// StageInfo 消息的内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageInfo {
    pub address: String,
    pub pid: u32,
}

/// 线路上传输的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub sender: String,
    pub description: MessageKind,
    #[serde(default)]
    pub contents: serde_json::Value,
}

impl Message {
    pub fn new<T: Serialize>(
        sender: impl Into<String>,
        description: MessageKind,
        contents: &T,
    ) -> PipelineResult<Self> {
        Ok(Self {
            sender: sender.into(),
            description,
            contents: serde_json::to_value(contents)?,
        })
    }

    /// 不带内容的控制消息
    pub fn signal(sender: impl Into<String>, description: MessageKind) -> Self {
        Self {
            sender: sender.into(),
            description,
            contents: serde_json::Value::Null,
        }
    }

    pub fn stage_info(sender: impl Into<String>, address: impl Into<String>, pid: u32) -> Self {
        let info = StageInfo {
            address: address.into(),
            pid,
        };
        Self {
            sender: sender.into(),
            description: MessageKind::StageInfo,
            contents: serde_json::json!({ "address": info.address, "pid": info.pid }),
        }
    }

    pub fn add_next_stage_addr(address: impl Into<String>) -> Self {
        Self {
            sender: MASTER_SENDER_ID.to_string(),
            description: MessageKind::AddNextStageAddr,
            contents: serde_json::Value::String(address.into()),
        }
    }

    pub fn break_connection(address: impl Into<String>) -> Self {
        Self {
            sender: MASTER_SENDER_ID.to_string(),
            description: MessageKind::BreakConnection,
            contents: serde_json::Value::String(address.into()),
        }
    }

    pub fn start_worker() -> Self {
        Self::signal(MASTER_SENDER_ID, MessageKind::StartWorker)
    }

    pub fn stage_result(sender: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            sender: sender.into(),
            description: MessageKind::StageResult,
            contents: payload,
        }
    }

    pub fn notify_exit(worker_id: impl Into<String>) -> Self {
        let worker_id = worker_id.into();
        Self {
            sender: worker_id.clone(),
            description: MessageKind::NotifyExit,
            contents: serde_json::Value::String(worker_id),
        }
    }

    pub fn timestamped(
        sender: impl Into<String>,
        description: MessageKind,
        at: DateTime<Utc>,
    ) -> PipelineResult<Self> {
        Self::new(sender, description, &at)
    }

    /// 将内容解码为指定类型
    pub fn contents_as<T: DeserializeOwned>(&self) -> PipelineResult<T> {
        serde_json::from_value(self.contents.clone()).map_err(|e| {
            PipelineError::Serialization(format!(
                "{} 消息内容解码失败: {e}",
                self.description
            ))
        })
    }

    /// 地址类消息 (AddNextStageAddr / BreakConnection) 的内容
    pub fn address(&self) -> PipelineResult<String> {
        self.contents_as::<String>()
    }

    pub fn timestamp(&self) -> PipelineResult<DateTime<Utc>> {
        self.contents_as::<DateTime<Utc>>()
    }
}
