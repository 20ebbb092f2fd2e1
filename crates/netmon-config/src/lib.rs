//! netmon 配置
//!
//! - 配置文件（JSON）：设备清单、阈值、凭据引用、发现网段、业务服务、通知渠道
//! - 环境变量：超时、重试、窗口和限流参数
//!
//! 两者在启动时各构建一次，之后以不可变引用传给各组件。

pub mod credentials;
pub mod error;
pub mod inventory;
pub mod loader;
pub mod model;
pub mod settings;

pub use credentials::{CredentialResolver, EnvCredentialResolver, StaticCredentialResolver};
pub use error::{ConfigError, Result};
pub use inventory::build_devices;
pub use loader::ConfigLoader;
pub use model::{
    AlertingConfig, CredentialConfig, DeviceConfig, DiscoveryConfig, EmailChannelConfig,
    LogFormat, LoggingConfig, MonitorConfig, NotificationConfig, PollerConfig,
    WebhookChannelConfig,
};
pub use settings::RuntimeSettings;
