//! netmon 共享领域类型
//!
//! 设备、指标样本、阈值、告警级别和业务服务等在各个组件之间传递的数据结构。

pub mod device;
pub mod metric;
pub mod network;
pub mod runbook;
pub mod service;
pub mod severity;

pub use device::{Credentials, Device, DeviceType, Protocol, Reachability};
pub use metric::{Comparison, MetricSample, Threshold};
pub use network::IpNetwork;
pub use runbook::Runbook;
pub use service::BusinessService;
pub use severity::Severity;
