use std::process::ExitCode;
use std::time::Duration;

use pipeline::Pipeline;

/// 示例流水线：生成数字、计算平方、累加统计
#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let counter = std::sync::atomic::AtomicU64::new(0);

    let pipeline = Pipeline::source(move || {
        std::thread::sleep(Duration::from_millis(10));
        counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    })
    .then(|n: u64| {
        std::thread::sleep(Duration::from_millis(25));
        n * n
    })
    .then(|square: u64| format!("{}", square % 1000))
    .build();

    pipeline::run(pipeline).await
}
