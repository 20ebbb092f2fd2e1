use crate::{
    Adapter, AdapterError, CommandRunner, PingAdapter, Result, SnmpAdapter, SshAdapter,
    VendorProfiles,
};
use netmon_types::{Device, Protocol};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// 适配器注册表
///
/// 按设备的协议列表选择适配器，第一个已注册的协议生效。
pub struct AdapterRegistry {
    adapters: HashMap<Protocol, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// 注册 ICMP、SNMP 和 SSH 三个内置适配器
    pub fn with_defaults(
        runner: Arc<dyn CommandRunner>,
        profiles: Arc<VendorProfiles>,
        ping_timeout: Duration,
        snmp_timeout: Duration,
        ssh_timeout: Duration,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PingAdapter::new(runner.clone(), ping_timeout)));
        registry.register(Arc::new(SnmpAdapter::new(
            runner.clone(),
            profiles.clone(),
            snmp_timeout,
        )));
        registry.register(Arc::new(SshAdapter::new(runner, profiles, ssh_timeout)));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn Adapter>) {
        info!(protocol = %adapter.protocol(), "Registering protocol adapter");
        self.adapters.insert(adapter.protocol(), adapter);
    }

    pub fn get(&self, protocol: Protocol) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(&protocol).cloned()
    }

    /// 已注册的协议
    pub fn supported(&self) -> Vec<Protocol> {
        let mut protocols: Vec<Protocol> = self.adapters.keys().copied().collect();
        protocols.sort_by_key(|p| p.as_str());
        protocols
    }

    /// 选择设备的轮询适配器
    pub fn select(&self, device: &Device) -> Result<Arc<dyn Adapter>> {
        device
            .protocols
            .iter()
            .find_map(|p| self.get(*p))
            .ok_or_else(|| {
                AdapterError::Unsupported(format!(
                    "no adapter registered for {} protocols {:?}",
                    device.id, device.protocols
                ))
            })
    }

    /// 选择设备的拓扑发现适配器
    pub fn select_discovery(&self, device: &Device) -> Option<Arc<dyn Adapter>> {
        device
            .protocols
            .iter()
            .filter_map(|p| self.get(*p))
            .find(|a| a.supports_discovery())
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
