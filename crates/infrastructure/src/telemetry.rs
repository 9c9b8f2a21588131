use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use pipeline_core::{PipelineResult, TelemetrySink};
use tracing::warn;

/// 按行写入的性能日志文件，启动时截断上次运行留下的内容
#[derive(Debug)]
pub struct PerfLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl PerfLog {
    pub fn create(dir: impl AsRef<Path>, file_name: &str) -> PipelineResult<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(file_name);
        let file = File::create(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// `pipeline<position>.<worker_id>.log`
    pub fn for_worker(
        dir: impl AsRef<Path>,
        position: usize,
        worker_id: &str,
    ) -> PipelineResult<Self> {
        Self::create(dir, &format!("pipeline{position}.{worker_id}.log"))
    }

    pub fn for_master(dir: impl AsRef<Path>) -> PipelineResult<Self> {
        Self::create(dir, "master.log")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TelemetrySink for PerfLog {
    fn record(&self, kind: &str, detail: &str) {
        let line = format!("{} {} {}\n", Utc::now().to_rfc3339(), kind, detail);
        match self.file.lock() {
            Ok(mut file) => {
                if let Err(e) = file.write_all(line.as_bytes()) {
                    warn!("写入性能日志失败: {}: {}", self.path.display(), e);
                }
            }
            Err(_) => warn!("性能日志锁已损坏: {}", self.path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_core::traits::perf;

    #[test]
    fn test_worker_file_name_and_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = PerfLog::for_worker(dir.path(), 2, "17").unwrap();
        assert!(log.path().ends_with("pipeline2.17.log"));

        log.record(perf::WORKER_STARTED, "");
        log.record(perf::STAGE_EXECUTION_ENDED, "3");

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("Worker_started"));
        assert!(lines[1].ends_with("Stage_execution_ended 3"));
    }

    #[test]
    fn test_previous_run_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("master.log"), "old line\n").unwrap();

        let log = PerfLog::for_master(dir.path()).unwrap();
        log.record(perf::THROUGHPUT, "100");
        let contents = std::fs::read_to_string(log.path()).unwrap();
        assert!(!contents.contains("old line"));
        assert!(contents.contains("Throughput 100"));
    }
}
