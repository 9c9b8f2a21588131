use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use pipeline_core::{Pipeline, WorkerConfig};
use pipeline_dispatcher::Master;
use pipeline_infrastructure::{PerfLog, TcpMessenger};
use pipeline_worker::{spawn_signal_listener, ExitReason, WorkerOptions, WorkerRuntime};
use tracing::{error, info};

use crate::common::{create_launcher, create_sink, init_logging, load_config};
use crate::shutdown::{wait_for_shutdown_signal, ShutdownManager};

/// worker 模式的启动参数，由 master 生成
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerArgs {
    pub master: String,
    pub worker_id: String,
    pub position: usize,
    pub queue_capacity: Option<usize>,
    pub stats_interval_ms: Option<u64>,
    pub perf_log_dir: Option<String>,
    pub advertise_host: Option<String>,
}

impl WorkerArgs {
    fn options(&self) -> Result<WorkerOptions> {
        let mut config = WorkerConfig::default();
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if let Some(interval) = self.stats_interval_ms {
            config.stats_interval_ms = interval;
        }
        if self.advertise_host.is_some() {
            config.advertise_host = self.advertise_host.clone();
        }
        config.validate().context("Worker参数无效")?;

        Ok(WorkerOptions::from_config(
            self.worker_id.clone(),
            self.position,
            self.master.clone(),
            &config,
        ))
    }
}

/// 应用运行模式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppMode {
    Master { config_path: Option<String> },
    Worker(WorkerArgs),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub log_level: String,
    pub log_format: String,
    pub mode: AppMode,
}

pub fn build_cli() -> Command {
    Command::new("pipeline")
        .version(env!("CARGO_PKG_VERSION"))
        .about("分布式流水线执行系统")
        .subcommand_required(true)
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .default_value("info")
                .global(true),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"])
                .default_value("pretty")
                .global(true),
        )
        .subcommand(
            Command::new("master").about("运行master：放置阶段、启动worker并动态调度").arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("配置文件路径，缺省时查找 config/pipeline.toml"),
            ),
        )
        .subcommand(
            Command::new("worker")
                .about("运行一个流水线阶段（由master远程启动）")
                .arg(
                    Arg::new("master")
                        .long("master")
                        .value_name("ADDR")
                        .help("master 控制端口地址")
                        .required(true),
                )
                .arg(
                    Arg::new("worker-id")
                        .long("worker-id")
                        .value_name("ID")
                        .help("master 分配的 worker 编号")
                        .required(true),
                )
                .arg(
                    Arg::new("position")
                        .long("position")
                        .value_name("P")
                        .help("执行的阶段位置")
                        .value_parser(clap::value_parser!(usize))
                        .required(true),
                )
                .arg(
                    Arg::new("queue-capacity")
                        .long("queue-capacity")
                        .value_name("N")
                        .help("输入、输出队列容量")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    Arg::new("stats-interval-ms")
                        .long("stats-interval-ms")
                        .value_name("MS")
                        .help("统计上报间隔")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    Arg::new("perf-log-dir")
                        .long("perf-log-dir")
                        .value_name("DIR")
                        .help("性能日志目录"),
                )
                .arg(
                    Arg::new("advertise-host")
                        .long("advertise-host")
                        .value_name("HOST")
                        .help("通告给master的主机名，缺省使用连接master的本地地址"),
                ),
        )
}

fn string_arg(matches: &ArgMatches, id: &str) -> Option<String> {
    matches.get_one::<String>(id).cloned()
}

/// 解析命令行参数
pub fn parse_args<I, T>(args: I) -> Result<CliArgs, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let matches = build_cli().try_get_matches_from(args)?;

    let log_level = string_arg(&matches, "log-level").unwrap_or_else(|| "info".to_string());
    let log_format = string_arg(&matches, "log-format").unwrap_or_else(|| "pretty".to_string());

    let mode = match matches.subcommand() {
        Some(("worker", sub)) => AppMode::Worker(WorkerArgs {
            master: string_arg(sub, "master").unwrap_or_default(),
            worker_id: string_arg(sub, "worker-id").unwrap_or_default(),
            position: sub.get_one::<usize>("position").copied().unwrap_or_default(),
            queue_capacity: sub.get_one::<usize>("queue-capacity").copied(),
            stats_interval_ms: sub.get_one::<u64>("stats-interval-ms").copied(),
            perf_log_dir: string_arg(sub, "perf-log-dir"),
            advertise_host: string_arg(sub, "advertise-host"),
        }),
        Some(("master", sub)) => AppMode::Master {
            config_path: string_arg(sub, "config"),
        },
        _ => {
            return Err(build_cli().error(
                clap::error::ErrorKind::MissingSubcommand,
                "需要指定 master 或 worker",
            ))
        }
    };

    Ok(CliArgs {
        log_level,
        log_format,
        mode,
    })
}

/// 同一个程序既可以作为 master，也可以作为 worker 运行
pub struct Application {
    pipeline: Pipeline,
    args: CliArgs,
}

impl Application {
    pub fn new(pipeline: Pipeline, args: CliArgs) -> Self {
        Self { pipeline, args }
    }

    pub async fn run(self) -> Result<ExitCode> {
        init_logging(&self.args.log_level, &self.args.log_format)?;

        match self.args.mode {
            AppMode::Master { config_path } => {
                run_master(&self.pipeline, config_path.as_deref()).await?;
                Ok(ExitCode::SUCCESS)
            }
            AppMode::Worker(worker_args) => {
                match run_worker(&self.pipeline, &worker_args).await? {
                    ExitReason::Drained => Ok(ExitCode::SUCCESS),
                    ExitReason::Terminated => Ok(ExitCode::FAILURE),
                }
            }
        }
    }
}

async fn run_master(pipeline: &Pipeline, config_path: Option<&str>) -> Result<()> {
    anyhow::ensure!(!pipeline.is_empty(), "流水线至少需要一个阶段");
    info!("启动master: {} 个阶段", pipeline.len());
    let config = load_config(config_path)?;

    let sink = create_sink(config.observability.perf_log_dir.as_deref(), |dir| {
        PerfLog::for_master(dir)
    })?;
    let shutdown_manager = ShutdownManager::new();
    let master = Master::new(
        pipeline.len(),
        &config,
        create_launcher(&config),
        Arc::new(TcpMessenger::new(Duration::from_secs(
            config.worker.registration_timeout_seconds,
        ))),
        sink,
        shutdown_manager.sender(),
    )
    .context("创建master失败")?;

    let signal_task = {
        let shutdown_manager = shutdown_manager.clone();
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            shutdown_manager.shutdown();
        })
    };

    let result = master.run().await;
    signal_task.abort();

    match result {
        Ok(()) => {
            info!("master已退出");
            Ok(())
        }
        Err(e) => {
            error!("master运行失败: {}", e);
            Err(e).context("master运行失败")
        }
    }
}

async fn run_worker(pipeline: &Pipeline, args: &WorkerArgs) -> Result<ExitReason> {
    let options = args.options()?;
    let sink = create_sink(args.perf_log_dir.as_deref(), |dir| {
        PerfLog::for_worker(dir, args.position, &args.worker_id)
    })?;

    let runtime = WorkerRuntime::new(pipeline, options, sink)
        .with_context(|| format!("创建worker {} 失败", args.worker_id))?;
    spawn_signal_listener(runtime.drain_handle());

    runtime
        .run()
        .await
        .with_context(|| format!("worker {} 运行失败", args.worker_id))
}
