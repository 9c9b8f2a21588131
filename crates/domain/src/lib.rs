//! 拓扑注册表
//!
//! 记录哪个 worker 在哪个节点上执行哪个阶段。master 独占持有一份 [`Topology`]，
//! 所有修改都在同一把锁内完成。

pub mod node;
pub mod stage;
pub mod stats;
pub mod topology;
pub mod worker;

pub use node::{Node, NodeList};
pub use pipeline_core::{PipelineError, PipelineResult, WorkerId};
pub use stage::{Stage, StageList};
pub use stats::WorkerStats;
pub use topology::Topology;
pub use worker::{Worker, WorkerState};
