//! 设备轮询
//!
//! 最小堆按到期时间调度设备，固定大小的工作池并发执行轮询，
//! 全局令牌桶限制轮询速率，失败按指数退避重试，重试耗尽后标记设备不可达。

pub mod observer;
pub mod poller;
pub mod schedule;

pub use observer::PollObserver;
pub use poller::{PollOutcome, Poller, PollerSettings};
pub use schedule::PollSchedule;
