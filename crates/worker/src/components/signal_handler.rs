use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

use crate::runtime::DrainHandle;

/// SIGUSR1 清空队列后退出；SIGINT / SIGTERM 立即退出
pub fn spawn_signal_listener(handle: DrainHandle) {
    tokio::spawn(async move {
        let (mut usr1, mut term, mut int) = match (
            signal(SignalKind::user_defined1()),
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(usr1), Ok(term), Ok(int)) => (usr1, term, int),
            _ => {
                error!("注册信号处理器失败");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = usr1.recv() => {
                    info!("收到 SIGUSR1，开始清空队列");
                    handle.drain();
                }
                _ = term.recv() => {
                    info!("收到 SIGTERM");
                    handle.terminate();
                    break;
                }
                _ = int.recv() => {
                    info!("收到 SIGINT");
                    handle.terminate();
                    break;
                }
            }
        }
    });
}
