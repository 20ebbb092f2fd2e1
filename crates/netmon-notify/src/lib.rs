//! 通知分发
//!
//! 把告警引擎产生的通知按级别路由到邮件和聊天 Webhook 渠道，
//! 负责幂等、每渠道限流、有界重试和投递健康统计。

pub mod channel;
pub mod dispatcher;
pub mod email;
pub mod error;
pub mod health;
pub mod message;
pub mod webhook;

pub use channel::Channel;
pub use dispatcher::{ChannelOutcome, DispatchReport, Dispatcher, DispatcherSettings};
pub use email::EmailChannel;
pub use error::{ChannelError, Result};
pub use health::{DispatchHealth, HealthSnapshot};
pub use message::NotifyMessage;
pub use webhook::WebhookChannel;
