pub mod config;
pub mod errors;
pub mod models;
pub mod pipeline;
pub mod traits;

pub use config::{
    AppConfig, ClusterConfig, LauncherKind, MasterConfig, ObservabilityConfig, SchedulerConfig,
    WorkerConfig,
};
pub use errors::*;
pub use models::{Message, MessageKind, StageInfo, WorkerId, MASTER_SENDER_ID};
pub use pipeline::{DynStage, Pipeline, PipelineBuilder};
pub use traits::{
    FailureCallback, LaunchRequest, LaunchSignal, RemoteLauncher, TelemetrySink, WorkerMessenger,
};
