use std::time::Duration;

use serde::{Deserialize, Serialize};

const NEW_SAMPLE_WEIGHT: f64 = 2.0 / 3.0;
const PREVIOUS_WEIGHT: f64 = 1.0 / 3.0;

/// 指数加权移动平均。平均值为0时直接取样本值
pub fn ewma(previous: f64, sample: f64) -> f64 {
    if previous == 0.0 {
        sample
    } else {
        previous * PREVIOUS_WEIGHT + sample * NEW_SAMPLE_WEIGHT
    }
}

/// 单个 worker 的性能快照
///
/// 只由 worker 自身更新，通过 `StageStats` 消息把副本发送给 master。
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
    /// 节点可用内存（字节）
    pub node_available_memory: u64,
    /// 进程内存占用的加权平均（字节）
    pub worker_memory_usage: u64,
    pub max_worker_memory_usage: u64,
    /// 阶段执行时间的加权平均（毫秒）
    pub execution_time_ms: f64,
    pub executions: u64,
    /// 输入队列中未处理的数量
    pub backlog: usize,
}

impl WorkerStats {
    pub fn update_execution_time(&mut self, elapsed: Duration) {
        let sample = elapsed.as_secs_f64() * 1000.0;
        self.execution_time_ms = ewma(self.execution_time_ms, sample);
        self.executions += 1;
    }

    pub fn update_memory_usage(&mut self, usage: u64, available: u64) {
        let average = ewma(self.worker_memory_usage as f64, usage as f64);
        self.worker_memory_usage = average.round() as u64;
        self.max_worker_memory_usage = self.max_worker_memory_usage.max(usage);
        self.node_available_memory = available;
    }

    pub fn update_backlog(&mut self, backlog: usize) {
        self.backlog = backlog;
    }

    pub fn has_executed(&self) -> bool {
        self.executions > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_is_taken_exactly() {
        let mut stats = WorkerStats::default();
        stats.update_execution_time(Duration::from_millis(100));
        assert!((stats.execution_time_ms - 100.0).abs() < 1e-9);
        assert_eq!(stats.executions, 1);
    }

    #[test]
    fn test_execution_time_converges_monotonically() {
        let mut stats = WorkerStats {
            execution_time_ms: 10.0,
            ..WorkerStats::default()
        };
        let mut previous_gap = (100.0 - stats.execution_time_ms).abs();
        for _ in 0..3 {
            stats.update_execution_time(Duration::from_millis(100));
            let gap = (100.0 - stats.execution_time_ms).abs();
            assert!(gap < previous_gap);
            previous_gap = gap;
        }
        assert!(stats.execution_time_ms <= 100.0);
    }

    #[test]
    fn test_constant_samples_stay_constant() {
        let mut stats = WorkerStats::default();
        for _ in 0..3 {
            stats.update_execution_time(Duration::from_millis(100));
            assert!((stats.execution_time_ms - 100.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_weighting() {
        assert!((ewma(30.0, 60.0) - 50.0).abs() < 1e-9);
        assert_eq!(ewma(0.0, 42.0), 42.0);
    }

    #[test]
    fn test_memory_usage_tracks_maximum() {
        let mut stats = WorkerStats::default();
        stats.update_memory_usage(300, 1_000);
        assert_eq!(stats.worker_memory_usage, 300);
        stats.update_memory_usage(600, 900);
        assert_eq!(stats.worker_memory_usage, 500);
        stats.update_memory_usage(150, 800);
        assert_eq!(stats.max_worker_memory_usage, 600);
        assert_eq!(stats.node_available_memory, 800);
    }

    #[test]
    fn test_serialized_field_names() {
        let value = serde_json::to_value(WorkerStats::default()).unwrap();
        assert!(value.get("execution_time_ms").is_some());
        assert!(value.get("node_available_memory").is_some());
    }
}
