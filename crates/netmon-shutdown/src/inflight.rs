use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// 在途任务跟踪器
///
/// 轮询、通知投递等任务开始前 `acquire`，守卫析构时计数减一。
/// 进入排空阶段后不再接受新任务。
#[derive(Clone)]
pub struct InFlightTracker {
    active: Arc<AtomicUsize>,
    draining: Arc<AtomicBool>,
    max_drain: Duration,
}

impl InFlightTracker {
    pub fn new(max_drain: Duration) -> Self {
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            draining: Arc::new(AtomicBool::new(false)),
            max_drain,
        }
    }

    /// 登记一个在途任务；排空阶段返回 None
    pub fn acquire(&self) -> Option<InFlightGuard> {
        if self.draining.load(Ordering::SeqCst) {
            debug!("Rejecting new work: draining");
            return None;
        }
        self.active.fetch_add(1, Ordering::SeqCst);
        Some(InFlightGuard {
            active: self.active.clone(),
        })
    }

    pub fn begin_drain(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    /// 等待在途任务完成，最多等待 `max_drain`
    ///
    /// 返回是否全部完成。
    pub async fn drain(&self) -> bool {
        self.begin_drain();
        let start = Instant::now();
        let mut last = self.active_count();
        info!(active = last, "Draining in-flight work");

        while self.active_count() > 0 {
            if start.elapsed() >= self.max_drain {
                warn!(
                    remaining = self.active_count(),
                    waited = ?start.elapsed(),
                    "Drain timed out, abandoning in-flight work"
                );
                return false;
            }
            let current = self.active_count();
            if current != last {
                debug!(remaining = current, "Draining in-flight work");
                last = current;
            }
            sleep(Duration::from_millis(100)).await;
        }

        info!(waited = ?start.elapsed(), "In-flight work drained");
        true
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }
}

/// 在途任务守卫
pub struct InFlightGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
