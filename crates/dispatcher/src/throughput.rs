use std::time::Duration;

use chrono::{DateTime, Utc};

/// 达到目标完成数时的吞吐量统计
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputReport {
    pub executions: u64,
    pub elapsed: Duration,
    pub per_second: f64,
}

impl std::fmt::Display for ThroughputReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "executions={} elapsed_ms={} per_second={:.3}",
            self.executions,
            self.elapsed.as_millis(),
            self.per_second
        )
    }
}

/// 从第0阶段开始生产起统计完成数
#[derive(Debug, Clone, Default)]
pub struct ThroughputTracker {
    target: Option<u64>,
    started_at: Option<DateTime<Utc>>,
    completed: u64,
    reported: bool,
}

impl ThroughputTracker {
    pub fn new(target: Option<u64>) -> Self {
        Self {
            target,
            ..Self::default()
        }
    }

    /// 只记录最早的开始时间
    pub fn record_start(&mut self, at: DateTime<Utc>) {
        match self.started_at {
            Some(started) if started <= at => {}
            _ => self.started_at = Some(at),
        }
    }

    /// 记录一次完成，首次达到目标时返回统计结果
    pub fn record_completion(&mut self, at: DateTime<Utc>) -> Option<ThroughputReport> {
        self.completed += 1;
        let target = self.target?;
        if self.reported || self.completed < target {
            return None;
        }
        self.reported = true;

        let started = self.started_at.unwrap_or(at);
        let elapsed = (at - started).to_std().unwrap_or_default();
        let seconds = elapsed.as_secs_f64();
        let per_second = if seconds > 0.0 {
            self.completed as f64 / seconds
        } else {
            0.0
        };

        Some(ThroughputReport {
            executions: self.completed,
            elapsed,
            per_second,
        })
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }
}
