use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 分发器健康统计
#[derive(Clone, Default)]
pub struct DispatchHealth {
    inner: Arc<HealthInner>,
}

#[derive(Default)]
struct HealthInner {
    delivered: AtomicU64,
    failed_deliveries: AtomicU64,
    retries: AtomicU64,
    duplicates: AtomicU64,
    digests: AtomicU64,
    // 某一级别的所有渠道都失败
    tier_failures: AtomicU64,
    unrouted: AtomicU64,
}

/// 健康统计快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub delivered: u64,
    pub failed_deliveries: u64,
    pub retries: u64,
    pub duplicates: u64,
    pub digests: u64,
    pub tier_failures: u64,
    pub unrouted: u64,
}

impl DispatchHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_delivered(&self) {
        self.inner.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.inner.failed_deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.inner.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.inner.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_digest(&self) {
        self.inner.digests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tier_failure(&self) {
        self.inner.tier_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unrouted(&self) {
        self.inner.unrouted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            failed_deliveries: self.inner.failed_deliveries.load(Ordering::Relaxed),
            retries: self.inner.retries.load(Ordering::Relaxed),
            duplicates: self.inner.duplicates.load(Ordering::Relaxed),
            digests: self.inner.digests.load(Ordering::Relaxed),
            tier_failures: self.inner.tier_failures.load(Ordering::Relaxed),
            unrouted: self.inner.unrouted.load(Ordering::Relaxed),
        }
    }

    /// 是否发生过整级投递失败
    pub fn is_degraded(&self) -> bool {
        self.inner.tier_failures.load(Ordering::Relaxed) > 0
    }
}
