/// 性能日志的记录类型
pub mod perf {
    pub const WORKER_STARTED: &str = "Worker_started";
    pub const STAGE_EXECUTION_STARTED: &str = "Stage_execution_started";
    pub const STAGE_EXECUTION_ENDED: &str = "Stage_execution_ended";
    pub const THROUGHPUT: &str = "Throughput";
}

/// 只追加的按行性能日志
pub trait TelemetrySink: Send + Sync {
    fn record(&self, kind: &str, detail: &str);
}

/// 丢弃所有记录
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn record(&self, _kind: &str, _detail: &str) {}
}
