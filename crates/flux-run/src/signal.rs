use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 关闭信号类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGTERM - 优雅关闭
    Term,

    /// SIGINT - Ctrl+C
    Interrupt,

    /// 手动触发
    Manual,

    /// 到达截止时间
    Deadline,
}

/// 信号处理器
///
/// 把系统信号、手动触发和截止时间统一成一个 `CancellationToken`，交给 `Group::wait`。
#[derive(Clone)]
pub struct SignalHandler {
    token: CancellationToken,
    fired: Arc<Mutex<Option<ShutdownSignal>>>,
}

impl SignalHandler {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            fired: Arc::new(Mutex::new(None)),
        }
    }

    /// 外部取消信号
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 第一个触发的信号
    pub fn last_signal(&self) -> Option<ShutdownSignal> {
        *self.fired.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fire(&self, signal: ShutdownSignal) {
        {
            let mut fired = self.fired.lock().unwrap_or_else(PoisonError::into_inner);
            if fired.is_none() {
                *fired = Some(signal);
            }
        }
        self.token.cancel();
    }

    /// 手动触发关闭
    pub fn trigger_shutdown(&self) {
        info!("Manual shutdown triggered");
        self.fire(ShutdownSignal::Manual);
    }

    /// 在 `deadline` 之后触发关闭
    pub fn cancel_after(&self, deadline: Duration) {
        let handler = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = handler.token.cancelled() => {}
                _ = tokio::time::sleep(deadline) => {
                    info!("Shutdown deadline of {:?} reached", deadline);
                    handler.fire(ShutdownSignal::Deadline);
                }
            }
        });
    }

    /// 等待系统信号
    #[cfg(unix)]
    pub async fn wait_for_system_signal(&self) -> std::io::Result<ShutdownSignal> {
        use signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        let received = tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
                ShutdownSignal::Term
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
                ShutdownSignal::Interrupt
            }
            _ = self.token.cancelled() => {
                return Ok(self.last_signal().unwrap_or(ShutdownSignal::Manual));
            }
        };

        self.fire(received);
        Ok(received)
    }

    /// 等待系统信号（Windows 版本）
    #[cfg(not(unix))]
    pub async fn wait_for_system_signal(&self) -> std::io::Result<ShutdownSignal> {
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C");
                self.fire(ShutdownSignal::Interrupt);
                Ok(ShutdownSignal::Interrupt)
            }
            _ = self.token.cancelled() => {
                Ok(self.last_signal().unwrap_or(ShutdownSignal::Manual))
            }
        }
    }

    /// 后台监听系统信号
    pub fn listen_for_system_signals(&self) {
        let handler = self.clone();
        tokio::spawn(async move {
            if let Err(e) = handler.wait_for_system_signal().await {
                warn!("Failed to install signal handlers: {}", e);
            }
        });
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}
