//! # Pipeline Testing Utils
//!
//! 工作区各 crate 共用的测试工具。
//!
//! ## 内容
//!
//! - **Mock 启动器**: 记录启动请求和信号，可以模拟启动失败
//! - **Mock 消息通道**: 按地址记录 master 发出的控制消息
//! - **性能日志记录器**: 在内存中收集性能日志
//! - **消息收集器**: 监听本地端口，解码收到的每一条消息
//! - **拓扑构建器**: 快速构造带统计数据的拓扑
//!
//! ## 使用方法
//!
//! ```toml
//! [dev-dependencies]
//! pipeline-testing-utils = { path = "../testing-utils" }
//! ```
//!
//! ```rust
//! use pipeline_testing_utils::{MockLauncher, MockMessenger, TopologyBuilder};
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
