//! 指标存储
//!
//! 按设备分片的追加写时序存储：`write` 为 O(1) 追加（乱序样本插入到正确位置），
//! `range` 总是按时间排序返回。样本可选地写入按天分区的 JSON Lines 日志，启动时回放。

pub mod journal;
pub mod report;
pub mod retention;
pub mod store;

pub use journal::Journal;
pub use report::{Report, ReportGenerator, ReportKind, SeriesSummary};
pub use retention::RetentionSweeper;
pub use store::{MetricsStore, PruneStats, SeriesKey, ShardedStore};
