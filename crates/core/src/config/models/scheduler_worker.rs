use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 动态调度循环间隔
    pub tick_interval_ms: u64,
    /// 瓶颈判定倍数：平均执行时间超过相邻阶段的该倍数即视为瓶颈
    pub bottleneck_threshold: f64,
    /// 等待 worker 注册时单次检查的最长等待时间
    pub registration_poll_interval_ms: u64,
    pub registration_timeout_seconds: u64,
    pub scaling_enabled: bool,
    pub consolidation_enabled: bool,
    /// 达到该完成次数后输出吞吐量统计
    pub target_executions: Option<u64>,
    /// 达到 target_executions 后停止整个流水线
    pub stop_on_target: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            bottleneck_threshold: 1.5,
            registration_poll_interval_ms: 10,
            registration_timeout_seconds: 30,
            scaling_enabled: true,
            consolidation_enabled: true,
            target_executions: None,
            stop_on_target: false,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(anyhow::anyhow!("调度间隔必须大于0"));
        }

        if !self.bottleneck_threshold.is_finite() || self.bottleneck_threshold <= 1.0 {
            return Err(anyhow::anyhow!(
                "瓶颈判定倍数必须大于1: {}",
                self.bottleneck_threshold
            ));
        }

        if self.registration_poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("注册检查间隔必须大于0"));
        }

        if self.registration_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("注册超时时间必须大于0"));
        }

        if self.target_executions == Some(0) {
            return Err(anyhow::anyhow!("目标执行次数必须大于0"));
        }

        if self.stop_on_target && self.target_executions.is_none() {
            return Err(anyhow::anyhow!("stop_on_target 需要同时设置 target_executions"));
        }

        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn registration_poll_interval(&self) -> Duration {
        Duration::from_millis(self.registration_poll_interval_ms)
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_secs(self.registration_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub queue_capacity: usize,
    pub stats_interval_ms: u64,
    pub registration_timeout_seconds: u64,
    pub bind_host: String,
    /// 通告给 master 的主机地址，缺省为连接 master 时使用的本地地址
    pub advertise_host: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            stats_interval_ms: 1000,
            registration_timeout_seconds: 5,
            bind_host: "0.0.0.0".to_string(),
            advertise_host: None,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.queue_capacity == 0 {
            return Err(anyhow::anyhow!("队列容量必须大于0"));
        }

        if self.stats_interval_ms == 0 {
            return Err(anyhow::anyhow!("统计上报间隔必须大于0"));
        }

        if self.registration_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("注册超时时间必须大于0"));
        }

        if self.bind_host.is_empty() {
            return Err(anyhow::anyhow!("监听地址不能为空"));
        }

        Ok(())
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_secs(self.registration_timeout_seconds)
    }
}
