use pipeline_core::{AppConfig, PipelineError, PipelineResult};

/// 远程启动 worker 的命令行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: String,
    pub master_address: String,
    pub log_level: String,
    pub log_format: String,
    pub queue_capacity: usize,
    pub stats_interval_ms: u64,
    pub perf_log_dir: Option<String>,
}

impl WorkerCommand {
    pub fn from_config(config: &AppConfig) -> PipelineResult<Self> {
        let program = config
            .cluster
            .program_path()
            .map_err(|e| PipelineError::Configuration(format!("无法确定worker程序路径: {e:#}")))?;
        Ok(Self {
            program,
            master_address: config.master.advertise_address.clone(),
            log_level: config.observability.log_level.clone(),
            log_format: config.observability.log_format.clone(),
            queue_capacity: config.worker.queue_capacity,
            stats_interval_ms: config.worker.stats_interval_ms,
            perf_log_dir: config.observability.perf_log_dir.clone(),
        })
    }

    pub fn build(&self, worker_id: &str, position: usize) -> String {
        let mut command = format!(
            "{} --log-level {} --log-format {} worker --master {} --worker-id {} --position {} \
             --queue-capacity {} --stats-interval-ms {}",
            self.program,
            self.log_level,
            self.log_format,
            self.master_address,
            worker_id,
            position,
            self.queue_capacity,
            self.stats_interval_ms
        );
        if let Some(dir) = &self.perf_log_dir {
            command.push_str(&format!(" --perf-log-dir {dir}"));
        }
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_worker_command() {
        let command = WorkerCommand {
            program: "/opt/pipeline/demo".to_string(),
            master_address: "10.0.0.1:7070".to_string(),
            log_level: "debug".to_string(),
            log_format: "json".to_string(),
            queue_capacity: 64,
            stats_interval_ms: 500,
            perf_log_dir: Some("/tmp/perf".to_string()),
        };
        assert_eq!(
            command.build("12", 3),
            "/opt/pipeline/demo --log-level debug --log-format json worker --master 10.0.0.1:7070 \
             --worker-id 12 --position 3 --queue-capacity 64 --stats-interval-ms 500 \
             --perf-log-dir /tmp/perf"
        );
    }

    #[test]
    fn test_from_config_uses_advertise_address() {
        let mut config = AppConfig::default();
        config.cluster.nodes = vec!["n1".to_string()];
        config.cluster.remote_binary_path = "/srv/bin/".to_string();
        config.cluster.program = Some("demo".to_string());
        config.master.advertise_address = "192.168.1.5:7070".to_string();

        let command = WorkerCommand::from_config(&config).unwrap();
        assert_eq!(command.program, "/srv/bin/demo");
        assert_eq!(command.master_address, "192.168.1.5:7070");
        assert!(!command.build("1", 0).contains("--perf-log-dir"));
    }
}
