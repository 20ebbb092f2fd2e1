use crate::{MetricsStore, PruneStats};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};

/// 保留期清理任务
pub struct RetentionSweeper {
    store: Arc<dyn MetricsStore>,
    retention: chrono::Duration,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn MetricsStore>, retention_days: u32, interval: Duration) -> Self {
        Self {
            store,
            retention: chrono::Duration::days(i64::from(retention_days)),
            interval,
        }
    }

    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.retention
    }

    /// 执行一次清理
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> netmon_core::Result<PruneStats> {
        self.store.prune_before(self.cutoff(now)).await
    }

    /// 周期性清理直到收到关闭信号
    pub async fn run<T: Clone>(self, mut shutdown: broadcast::Receiver<T>) {
        let mut ticker = tokio::time::interval(self.interval);
        info!(interval = ?self.interval, retention = %self.retention, "Retention sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once(Utc::now()).await {
                        error!(error = %e, "Retention sweep failed");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Retention sweeper stopped");
                    break;
                }
            }
        }
    }
}
