use std::process::Stdio;

use async_trait::async_trait;
use pipeline_core::{
    FailureCallback, LaunchRequest, LaunchSignal, PipelineError, PipelineResult, RemoteLauncher,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

/// 通过 ssh 在远程节点上启动 worker
#[derive(Debug, Clone)]
pub struct SshLauncher {
    user: String,
    port: u16,
}

impl SshLauncher {
    pub fn new(user: impl Into<String>, port: u16) -> Self {
        Self {
            user: user.into(),
            port,
        }
    }

    fn ssh_command(&self, node: &str, remote_command: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-p")
            .arg(self.port.to_string())
            .arg("-o")
            .arg("BatchMode=yes")
            .arg(format!("{}@{}", self.user, node))
            .arg(remote_command);
        cmd
    }
}

#[async_trait]
impl RemoteLauncher for SshLauncher {
    async fn launch(
        &self,
        request: LaunchRequest,
        on_failure: FailureCallback,
    ) -> PipelineResult<u32> {
        info!(
            "启动worker: worker_id={}, node={}, command={}",
            request.worker_id, request.node, request.command
        );
        let cmd = self.ssh_command(&request.node, &request.command);
        spawn_supervised(cmd, &request, on_failure)
    }

    async fn signal(&self, node: &str, pid: u32, signal: LaunchSignal) -> PipelineResult<()> {
        let remote = kill_command(pid, signal);
        info!("发送信号: node={}, command={}", node, remote);
        let cmd = self.ssh_command(node, &remote);
        run_to_completion(cmd, &remote).await
    }
}

/// 在本机上启动 worker，用于单机运行
#[derive(Debug, Clone, Default)]
pub struct LocalLauncher;

impl LocalLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RemoteLauncher for LocalLauncher {
    async fn launch(
        &self,
        request: LaunchRequest,
        on_failure: FailureCallback,
    ) -> PipelineResult<u32> {
        info!(
            "本地启动worker: worker_id={}, command={}",
            request.worker_id, request.command
        );
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&request.command);
        spawn_supervised(cmd, &request, on_failure)
    }

    async fn signal(&self, _node: &str, pid: u32, signal: LaunchSignal) -> PipelineResult<()> {
        let command = kill_command(pid, signal);
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&command);
        run_to_completion(cmd, &command).await
    }
}

fn kill_command(pid: u32, signal: LaunchSignal) -> String {
    format!("kill {} {}", signal.as_kill_arg(), pid)
}

/// 启动进程并在后台等待其结束。启动失败或异常退出时调用 `on_failure`
fn spawn_supervised(
    mut cmd: Command,
    request: &LaunchRequest,
    on_failure: FailureCallback,
) -> PipelineResult<u32> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(false);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            let reason = format!("启动命令失败: {e}");
            error!("worker {} {}", request.worker_id, reason);
            on_failure(reason.clone());
            return Err(PipelineError::Launch(reason));
        }
    };

    let pid = child.id().unwrap_or_default();
    forward_output(&mut child, &request.worker_id);

    let worker_id = request.worker_id.clone();
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) if status.success() => {
                debug!("worker {} 的启动进程已正常退出", worker_id);
            }
            Ok(status) => {
                warn!("worker {} 的启动进程异常退出: {}", worker_id, status);
                on_failure(format!("进程退出状态: {status}"));
            }
            Err(e) => {
                error!("等待worker {} 的启动进程失败: {}", worker_id, e);
                on_failure(format!("等待进程结束失败: {e}"));
            }
        }
    });

    Ok(pid)
}

/// 将子进程的输出转发到日志
fn forward_output(child: &mut Child, worker_id: &str) {
    if let Some(stdout) = child.stdout.take() {
        spawn_line_forwarder(stdout, worker_id.to_string(), false);
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_line_forwarder(stderr, worker_id.to_string(), true);
    }
}

fn spawn_line_forwarder<R>(stream: R, worker_id: String, is_stderr: bool)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if is_stderr {
                warn!(worker_id = %worker_id, "{}", line);
            } else {
                info!(worker_id = %worker_id, "{}", line);
            }
        }
    });
}

async fn run_to_completion(mut cmd: Command, description: &str) -> PipelineResult<()> {
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| PipelineError::Launch(format!("执行命令失败: {description}: {e}")))?;

    if output.status.success() {
        Ok(())
    } else {
        Err(PipelineError::Launch(format!(
            "命令执行失败: {description}: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn request(command: &str) -> LaunchRequest {
        LaunchRequest {
            node: "localhost".to_string(),
            worker_id: "1".to_string(),
            position: 0,
            command: command.to_string(),
        }
    }

    #[test]
    fn test_kill_command() {
        assert_eq!(kill_command(42, LaunchSignal::Flush), "kill -USR1 42");
        assert_eq!(kill_command(7, LaunchSignal::Terminate), "kill -TERM 7");
    }

    #[tokio::test]
    async fn test_local_failure_callback_fires_on_nonzero_exit() {
        let (tx, rx) = oneshot::channel();
        let launcher = LocalLauncher::new();
        let pid = launcher
            .launch(
                request("exit 3"),
                Box::new(move |reason| {
                    let _ = tx.send(reason);
                }),
            )
            .await
            .unwrap();
        assert!(pid > 0);

        let reason = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert!(reason.contains("退出状态"));
    }

    #[tokio::test]
    async fn test_local_success_does_not_fire_callback() {
        let (tx, mut rx) = oneshot::channel::<String>();
        let launcher = LocalLauncher::new();
        launcher
            .launch(
                request("true"),
                Box::new(move |reason| {
                    let _ = tx.send(reason);
                }),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_signal_unknown_pid_is_error() {
        let launcher = LocalLauncher::new();
        let result = launcher
            .signal("localhost", 999_999_999, LaunchSignal::Terminate)
            .await;
        assert!(matches!(result, Err(PipelineError::Launch(_))));
    }
}
