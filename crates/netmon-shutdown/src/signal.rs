use tokio::sync::broadcast;
use tracing::{error, info};

/// 关闭信号类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGTERM
    Term,
    /// SIGINT / Ctrl+C
    Interrupt,
    /// 程序内部触发（单次任务完成、致命错误）
    Manual,
}

/// 信号处理器
///
/// 克隆后共享同一个广播通道；任何一处触发，所有订阅者都会收到。
#[derive(Clone)]
pub struct SignalHandler {
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
}

impl SignalHandler {
    pub fn new() -> (Self, broadcast::Receiver<ShutdownSignal>) {
        let (tx, rx) = broadcast::channel(16);
        (Self { shutdown_tx: tx }, rx)
    }

    /// 监听系统信号，收到后广播
    #[cfg(unix)]
    pub async fn listen_system_signals(&self) -> ShutdownSignal {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    error!(error = %e, "Failed to install unix signal handlers, falling back to Ctrl+C");
                    return self.listen_ctrl_c().await;
                }
            };

        let received = tokio::select! {
            _ = sigterm.recv() => ShutdownSignal::Term,
            _ = sigint.recv() => ShutdownSignal::Interrupt,
        };
        info!(signal = ?received, "Received shutdown signal");
        self.trigger(received);
        received
    }

    #[cfg(not(unix))]
    pub async fn listen_system_signals(&self) -> ShutdownSignal {
        self.listen_ctrl_c().await
    }

    async fn listen_ctrl_c(&self) -> ShutdownSignal {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return std::future::pending().await;
        }
        info!("Received Ctrl+C");
        self.trigger(ShutdownSignal::Interrupt);
        ShutdownSignal::Interrupt
    }

    /// 手动触发关闭
    pub fn trigger_shutdown(&self) {
        info!("Manual shutdown triggered");
        self.trigger(ShutdownSignal::Manual);
    }

    fn trigger(&self, signal: ShutdownSignal) {
        let _ = self.shutdown_tx.send(signal);
    }

    /// 订阅关闭信号
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.shutdown_tx.subscribe()
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_trigger() {
        let (handler, mut rx) = SignalHandler::new();
        handler.trigger_shutdown();
        assert_eq!(rx.recv().await.unwrap(), ShutdownSignal::Manual);
    }

    #[tokio::test]
    async fn test_clones_share_channel() {
        let (handler, _rx) = SignalHandler::new();
        let mut rx = handler.subscribe();
        let clone = handler.clone();

        // 从克隆触发，原句柄的订阅者也能收到
        clone.trigger_shutdown();
        assert_eq!(rx.recv().await.unwrap(), ShutdownSignal::Manual);
    }
}
