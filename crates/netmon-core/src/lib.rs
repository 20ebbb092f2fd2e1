pub mod backoff;
pub mod error;
pub mod expiring;
pub mod ratelimit;

pub use backoff::Backoff;
pub use error::{ErrorClass, MonitorError, Result};
pub use expiring::{ExpiringStore, TtlMap};
pub use ratelimit::TokenBucket;
