use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// 令牌桶限流器
///
/// 容量为 `capacity`，按 `refill_per_sec` 连续补充。`acquire` 在令牌不足时等待而不是丢弃。
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<TokenState>,
}

struct TokenState {
    current: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// 创建新的令牌桶（初始为满）
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            refill_per_sec: refill_per_sec.max(0.0),
            state: Mutex::new(TokenState {
                current: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// 每 `window` 时间内最多 `limit` 个令牌
    pub fn per_window(limit: u32, window: Duration) -> Self {
        let secs = window.as_secs_f64();
        let rate = if secs > 0.0 {
            f64::from(limit) / secs
        } else {
            f64::from(limit)
        };
        Self::new(limit, rate)
    }

    fn refill(&self, state: &mut TokenState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.current = (state.current + elapsed * self.refill_per_sec).min(self.capacity);
            state.last_refill = now;
        }
    }

    /// 尝试获取一个令牌（非阻塞）
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        if state.current >= 1.0 {
            state.current -= 1.0;
            true
        } else {
            false
        }
    }

    /// 获取一个令牌，不足时等待补充
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                self.refill(&mut state);
                if state.current >= 1.0 {
                    state.current -= 1.0;
                    return;
                }
                if self.refill_per_sec > 0.0 {
                    Duration::from_secs_f64((1.0 - state.current) / self.refill_per_sec)
                } else {
                    Duration::from_millis(100)
                }
            };
            debug!(wait_ms = wait.as_millis() as u64, "Token bucket empty, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// 当前可用令牌数
    pub async fn available(&self) -> f64 {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        state.current
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }
}
