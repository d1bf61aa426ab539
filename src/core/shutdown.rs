//! 进程退出
//!
//! Ctrl+C（unix 下还有 SIGTERM）与 REPL 的 exit/quit 都走 `Shutdown::trigger`：
//! 先取消 supervisor 上所有进行中的 turn，再唤醒等待退出的主循环。

use tokio_util::sync::CancellationToken;

use crate::core::SessionSupervisor;

#[derive(Debug, Clone)]
pub struct Shutdown {
    exit: CancellationToken,
    supervisor: SessionSupervisor,
}

impl Shutdown {
    pub fn new(supervisor: SessionSupervisor) -> Self {
        Self {
            exit: CancellationToken::new(),
            supervisor,
        }
    }

    /// source 仅用于日志（"ctrl-c" / "sigterm" / "repl"）
    pub fn trigger(&self, source: &'static str) {
        if self.exit.is_cancelled() {
            return;
        }
        tracing::info!(
            source,
            active_turns = self.supervisor.active_turns(),
            "shutting down"
        );
        self.supervisor.cancel_all();
        self.exit.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.exit.is_cancelled()
    }

    pub async fn triggered(&self) {
        self.exit.cancelled().await;
    }

    /// 后台等待系统信号，收到后 trigger
    pub fn listen_for_signals(&self) {
        let shutdown = self.clone();
        tokio::spawn(async move {
            let source = os_signal().await;
            shutdown.trigger(source);
        });
    }
}

/// 平台不支持时永远挂起，而不是立即触发退出
async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn os_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => tokio::select! {
            _ = ctrl_c() => "ctrl-c",
            _ = term.recv() => "sigterm",
        },
        Err(_) => {
            ctrl_c().await;
            "ctrl-c"
        }
    }
}

#[cfg(not(unix))]
async fn os_signal() -> &'static str {
    ctrl_c().await;
    "ctrl-c"
}
