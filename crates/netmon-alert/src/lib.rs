//! 告警引擎
//!
//! 对新样本做阈值判定，管理告警生命周期，按去重窗口折叠重复越限，
//! 结合拓扑影响范围和业务服务把相关告警归入关联组，并按级别限制每小时通知数量。

pub mod correlation;
pub mod engine;
pub mod error;
pub mod history;
pub mod model;
pub mod notification;
pub mod pipeline;
pub mod ratecap;

pub use correlation::{CorrelationContext, CorrelationGroup, Correlator, JoinOutcome};
pub use engine::{AlertEngine, AlertSettings, EngineSnapshot};
pub use error::{AlertError, Result};
pub use history::AlertHistory;
pub use model::{Alert, AlertState, ConditionSignature, Delivery};
pub use notification::{Digest, DigestEntry, DigestKind, Notification, Transition};
pub use pipeline::{EvaluationEvent, EvaluationRouter};
pub use ratecap::RateCap;
