//! # Pipeline
//!
//! 分布式流水线执行系统。用户程序定义一条类型化的流水线并调用 [`run`]，
//! 同一个可执行文件既作为 master 运行，也被 master 远程启动为各阶段的 worker。
//!
//! ```no_run
//! use pipeline::Pipeline;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<std::process::ExitCode> {
//!     let pipeline = Pipeline::source(|| 21_u64)
//!         .then(|n: u64| n * 2)
//!         .then(|n: u64| println!("{n}"))
//!         .build();
//!     pipeline::run(pipeline).await
//! }
//! ```

pub mod app;
pub mod common;
pub mod shutdown;

use std::process::ExitCode;

pub use pipeline_core::{DynStage, Pipeline, PipelineBuilder, PipelineError, PipelineResult};

use crate::app::{parse_args, Application};

/// 按进程命令行参数以 master 或 worker 身份运行流水线
///
/// worker 清空队列后退出返回成功，被终止时返回失败。
pub async fn run(pipeline: Pipeline) -> anyhow::Result<ExitCode> {
    let args = match parse_args(std::env::args_os()) {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return Ok(if e.use_stderr() {
                ExitCode::from(2)
            } else {
                ExitCode::SUCCESS
            });
        }
    };
    Application::new(pipeline, args).run().await
}
