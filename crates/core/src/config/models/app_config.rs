use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    cluster::{ClusterConfig, MasterConfig},
    observability::ObservabilityConfig,
    scheduler_worker::{SchedulerConfig, WorkerConfig},
};

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cluster: ClusterConfig,
    pub master: MasterConfig,
    pub scheduler: SchedulerConfig,
    pub worker: WorkerConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: PIPELINE_, nesting: __)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/pipeline.toml", "pipeline.toml"];
            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("PIPELINE")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("cluster.nodes")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// Validate configuration effectiveness
    pub fn validate(&self) -> Result<()> {
        self.cluster.validate().context("集群配置验证失败")?;

        self.master.validate().context("Master配置验证失败")?;

        self.scheduler
            .validate()
            .context("调度器配置验证失败")?;

        self.worker.validate().context("Worker配置验证失败")?;

        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LauncherKind;

    const SAMPLE: &str = r#"
[cluster]
ssh_user = "pipe"
ssh_port = 2222
nodes = ["node-1", "node-2", "node-3"]
remote_binary_path = "/home/pipe/bin/"
launcher = "ssh"

[scheduler]
bottleneck_threshold = 2.0
target_executions = 500

[worker]
queue_capacity = 64
"#;

    #[test]
    fn test_from_toml_applies_defaults() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.cluster.ssh_port, 2222);
        assert_eq!(config.cluster.nodes.len(), 3);
        assert_eq!(config.cluster.launcher, LauncherKind::Ssh);
        assert_eq!(config.scheduler.bottleneck_threshold, 2.0);
        assert_eq!(config.scheduler.target_executions, Some(500));
        assert_eq!(config.scheduler.tick_interval_ms, 1000);
        assert_eq!(config.worker.queue_capacity, 64);
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_from_toml_requires_nodes() {
        let err = AppConfig::from_toml("[cluster]\nssh_user = \"a\"\n").unwrap_err();
        assert!(format!("{err:#}").contains("节点列表不能为空"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = AppConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.cluster.ssh_user, "pipe");
        assert_eq!(config.worker.queue_capacity, 64);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/definitely/not/here.toml")).is_err());
    }

    #[test]
    fn test_toml_round_trip_keeps_values() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        let text = config.to_toml().unwrap();
        let again = AppConfig::from_toml(&text).unwrap();
        assert_eq!(again.cluster.nodes, config.cluster.nodes);
        assert_eq!(again.scheduler.target_executions, Some(500));
    }
}
