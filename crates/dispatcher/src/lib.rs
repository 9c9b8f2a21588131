//! # Pipeline Dispatcher
//!
//! master 端的调度逻辑：
//!
//! - [`placement`]: 按密度把连续阶段分配给节点
//! - [`bottleneck`]: 比较相邻阶段的平均执行时间，找出最严重的瓶颈
//! - [`consolidation`]: 把 worker 迁移到内存有余量的靠前节点上
//! - [`wiring`]: 新增、断开下游地址的连线协议
//! - [`controller`]: 接收 worker 上报的控制端口
//! - [`scheduler`] / [`master`]: 把以上部分组装成完整的 master 流程

pub mod bottleneck;
pub mod command;
pub mod consolidation;
pub mod controller;
pub mod master;
pub mod placement;
pub mod registry;
pub mod scheduler;
pub mod throughput;
pub mod wiring;

pub use bottleneck::{find_bottleneck, Bottleneck};
pub use command::WorkerCommand;
pub use consolidation::{find_migration, Migration};
pub use controller::{ControlHandler, ControlServer};
pub use master::Master;
pub use registry::Registry;
pub use scheduler::Scheduler;
pub use throughput::{ThroughputReport, ThroughputTracker};
