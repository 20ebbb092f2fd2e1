//! 协议适配器
//!
//! 每个协议族一个 [`Adapter`] 实现，由 [`AdapterRegistry`] 按设备的协议元数据选择。
//! 厂商差异只体现在 [`VendorProfiles`] 数据中，调度器不感知厂商。

pub mod adapter;
pub mod command;
pub mod discovery;
pub mod error;
pub mod ping;
pub mod profile;
pub mod registry;
pub mod snmp;
pub mod ssh;

pub use adapter::Adapter;
pub use command::{CommandOutput, CommandRunner, SystemCommandRunner};
pub use discovery::{ArpEntry, DiscoveryReport};
pub use error::{AdapterError, Result};
pub use ping::PingAdapter;
pub use profile::{OidMetric, SshMetric, VendorProfile, VendorProfiles};
pub use registry::AdapterRegistry;
pub use snmp::SnmpAdapter;
pub use ssh::SshAdapter;
