pub mod app_config;
pub mod cluster;
pub mod observability;
pub mod scheduler_worker;

// Re-export main types for easier imports
pub use app_config::AppConfig;
pub use cluster::{ClusterConfig, LauncherKind, MasterConfig};
pub use observability::ObservabilityConfig;
pub use scheduler_worker::{SchedulerConfig, WorkerConfig};
