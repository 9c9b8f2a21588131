//! 配置管理
//!
//! 配置按以下顺序加载，后者覆盖前者：
//!
//! 1. 内置默认值
//! 2. TOML 配置文件
//! 3. 环境变量（前缀 `PIPELINE`，层级分隔符 `__`，如 `PIPELINE_SCHEDULER__TICK_INTERVAL_MS`）
//!
//! 加载完成后统一执行 `validate()`，任何一节校验失败都会带上下文返回。

pub mod models;

pub use models::{
    AppConfig, ClusterConfig, LauncherKind, MasterConfig, ObservabilityConfig, SchedulerConfig,
    WorkerConfig,
};
