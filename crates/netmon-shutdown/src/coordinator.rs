use crate::inflight::InFlightTracker;
use crate::resource::ResourceManager;
use crate::signal::{ShutdownSignal, SignalHandler};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{timeout, Instant};
use tracing::{info, warn};

/// 关闭结果
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub signal: ShutdownSignal,
    pub elapsed: Duration,
    /// 在途任务是否全部完成
    pub drained: bool,
    pub failed_resources: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.drained && self.failed_resources.is_empty()
    }
}

/// 关闭协调器
///
/// 收到信号后：排空在途任务，再按优先级清理资源（停止轮询、冲刷告警、
/// 等待通知投递、写检查点）。
pub struct ShutdownCoordinator {
    signal_handler: SignalHandler,
    signal_rx: broadcast::Receiver<ShutdownSignal>,
    in_flight: Option<InFlightTracker>,
    resources: ResourceManager,
    shutdown_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn builder() -> ShutdownCoordinatorBuilder {
        ShutdownCoordinatorBuilder::new()
    }

    pub fn signal_handler(&self) -> &SignalHandler {
        &self.signal_handler
    }

    /// 等待关闭信号并执行关闭流程
    pub async fn run(mut self) -> ShutdownReport {
        info!("Shutdown coordinator waiting for signal");
        let signal = self
            .signal_rx
            .recv()
            .await
            .unwrap_or(ShutdownSignal::Manual);
        self.shutdown(signal).await
    }

    /// 立即执行关闭流程
    pub async fn shutdown(mut self, signal: ShutdownSignal) -> ShutdownReport {
        info!(signal = ?signal, "Shutting down");
        let start = Instant::now();

        let drained = match &self.in_flight {
            Some(tracker) => tracker.drain().await,
            None => true,
        };

        let failed_resources =
            match timeout(self.shutdown_timeout, self.resources.cleanup_all()).await {
                Ok(failed) => failed,
                Err(_) => {
                    warn!(timeout = ?self.shutdown_timeout, "Resource cleanup exceeded shutdown timeout");
                    vec!["<shutdown timeout>".to_string()]
                }
            };

        let report = ShutdownReport {
            signal,
            elapsed: start.elapsed(),
            drained,
            failed_resources,
        };
        info!(
            elapsed = ?report.elapsed,
            clean = report.is_clean(),
            "Shutdown complete"
        );
        report
    }
}

/// 关闭协调器构建器
pub struct ShutdownCoordinatorBuilder {
    signal_handler: Option<SignalHandler>,
    in_flight: Option<InFlightTracker>,
    resources: ResourceManager,
    shutdown_timeout: Duration,
}

impl ShutdownCoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            signal_handler: None,
            in_flight: None,
            resources: ResourceManager::new(),
            shutdown_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_signal_handler(mut self, handler: SignalHandler) -> Self {
        self.signal_handler = Some(handler);
        self
    }

    pub fn with_in_flight_tracker(mut self, tracker: InFlightTracker) -> Self {
        self.in_flight = Some(tracker);
        self
    }

    pub fn with_resource_manager(mut self, manager: ResourceManager) -> Self {
        self.resources = manager;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn build(self) -> ShutdownCoordinator {
        let signal_handler = self.signal_handler.unwrap_or_default();
        let signal_rx = signal_handler.subscribe();

        ShutdownCoordinator {
            signal_handler,
            signal_rx,
            in_flight: self.in_flight,
            resources: self.resources,
            shutdown_timeout: self.shutdown_timeout,
        }
    }
}

impl Default for ShutdownCoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
