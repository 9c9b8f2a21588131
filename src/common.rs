use std::sync::Arc;

use anyhow::{Context, Result};
use pipeline_core::traits::NullSink;
use pipeline_core::{AppConfig, LauncherKind, RemoteLauncher, TelemetrySink};
use pipeline_infrastructure::{LocalLauncher, PerfLog, SshLauncher};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 初始化日志系统，`RUST_LOG` 优先于命令行级别
pub fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 加载 master 配置，未指定路径时按默认位置查找
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    let config = AppConfig::load(config_path).with_context(|| match config_path {
        Some(path) => format!("加载配置文件失败: {path}"),
        None => "加载默认配置失败".to_string(),
    })?;
    info!(
        "配置已加载: 节点 {} 个, 启动方式 {:?}",
        config.cluster.nodes.len(),
        config.cluster.launcher
    );
    Ok(config)
}

pub fn create_launcher(config: &AppConfig) -> Arc<dyn RemoteLauncher> {
    match config.cluster.launcher {
        LauncherKind::Ssh => Arc::new(SshLauncher::new(
            config.cluster.ssh_user.clone(),
            config.cluster.ssh_port,
        )),
        LauncherKind::Local => Arc::new(LocalLauncher::new()),
    }
}

/// 配置了性能日志目录时写文件，否则丢弃
pub fn create_sink(
    perf_log_dir: Option<&str>,
    open: impl FnOnce(&str) -> pipeline_core::PipelineResult<PerfLog>,
) -> Result<Arc<dyn TelemetrySink>> {
    match perf_log_dir {
        Some(dir) => {
            let log = open(dir).with_context(|| format!("创建性能日志失败: {dir}"))?;
            info!("性能日志: {}", log.path().display());
            Ok(Arc::new(log))
        }
        None => Ok(Arc::new(NullSink)),
    }
}
