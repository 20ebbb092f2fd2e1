use crate::{DeviceError, Result};
use chrono::{DateTime, Utc};
use netmon_types::{Device, Reachability};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// 可达性变化
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReachabilityChange {
    Unchanged,
    BecameReachable,
    BecameUnreachable,
}

/// 设备清单
///
/// 启动时由配置构建，运行期间只更新可达性和禁用状态，不删除设备。
pub struct DeviceInventory {
    devices: Arc<RwLock<HashMap<String, Device>>>,
    /// 管理地址 -> 设备ID
    by_address: Arc<RwLock<HashMap<IpAddr, String>>>,
}

impl DeviceInventory {
    pub fn new() -> Self {
        Self {
            devices: Arc::new(RwLock::new(HashMap::new())),
            by_address: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn from_devices(devices: Vec<Device>) -> Result<Self> {
        let inventory = Self::new();
        for device in devices {
            inventory.register(device).await?;
        }
        Ok(inventory)
    }

    /// 注册设备
    pub async fn register(&self, device: Device) -> Result<()> {
        let mut devices = self.devices.write().await;
        if devices.contains_key(&device.id) {
            return Err(DeviceError::AlreadyExists(device.id));
        }

        let mut by_address = self.by_address.write().await;
        if let Some(existing) = by_address.get(&device.address) {
            warn!(
                device_id = %device.id,
                address = %device.address,
                existing = %existing,
                "Duplicate management address, keeping first mapping"
            );
        } else {
            by_address.insert(device.address, device.id.clone());
        }

        debug!(device_id = %device.id, enabled = device.enabled, "Device registered");
        devices.insert(device.id.clone(), device);
        Ok(())
    }

    pub async fn get(&self, device_id: &str) -> Option<Device> {
        self.devices.read().await.get(device_id).cloned()
    }

    /// 通过管理地址查找设备ID
    pub async fn find_by_address(&self, address: IpAddr) -> Option<String> {
        self.by_address.read().await.get(&address).cloned()
    }

    pub async fn list(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.read().await.values().cloned().collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    pub async fn enabled(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self
            .devices
            .read()
            .await
            .values()
            .filter(|d| d.enabled)
            .cloned()
            .collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    pub async fn count(&self) -> usize {
        self.devices.read().await.len()
    }

    /// 轮询成功：重置失败计数并标记为可达
    pub async fn mark_reachable(
        &self,
        device_id: &str,
        at: DateTime<Utc>,
    ) -> Result<ReachabilityChange> {
        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(device_id)
            .ok_or_else(|| DeviceError::NotFound(device_id.to_string()))?;

        let previous = device.reachability;
        device.reachability = Reachability::Reachable;
        device.consecutive_failures = 0;
        device.last_seen = Some(at);

        if previous == Reachability::Unreachable {
            info!(device_id = %device_id, "Device reachable again");
            Ok(ReachabilityChange::BecameReachable)
        } else {
            Ok(ReachabilityChange::Unchanged)
        }
    }

    /// 轮询失败（重试耗尽）：标记为不可达
    pub async fn mark_unreachable(&self, device_id: &str) -> Result<ReachabilityChange> {
        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(device_id)
            .ok_or_else(|| DeviceError::NotFound(device_id.to_string()))?;

        device.consecutive_failures = device.consecutive_failures.saturating_add(1);
        let previous = device.reachability;
        device.reachability = Reachability::Unreachable;

        if previous != Reachability::Unreachable {
            warn!(
                device_id = %device_id,
                failures = device.consecutive_failures,
                "Device marked unreachable"
            );
            Ok(ReachabilityChange::BecameUnreachable)
        } else {
            Ok(ReachabilityChange::Unchanged)
        }
    }

    /// 禁用设备（保留在清单中）
    pub async fn disable(&self, device_id: &str, reason: impl Into<String>) -> Result<()> {
        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(device_id)
            .ok_or_else(|| DeviceError::NotFound(device_id.to_string()))?;
        let reason = reason.into();
        warn!(device_id = %device_id, reason = %reason, "Device disabled");
        device.disable(reason);
        Ok(())
    }
}

impl Default for DeviceInventory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str, ip: &str) -> Device {
        Device::new(id, ip.parse().unwrap())
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let inventory = DeviceInventory::from_devices(vec![
            device("sw1", "10.0.0.1"),
            device("sw2", "10.0.0.2"),
        ])
        .await
        .unwrap();

        assert_eq!(inventory.count().await, 2);
        assert_eq!(inventory.get("sw1").await.unwrap().id, "sw1");
        assert_eq!(
            inventory.find_by_address("10.0.0.2".parse().unwrap()).await,
            Some("sw2".to_string())
        );
        assert!(inventory.find_by_address("10.9.9.9".parse().unwrap()).await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_registration() {
        let inventory = DeviceInventory::new();
        inventory.register(device("sw1", "10.0.0.1")).await.unwrap();
        let result = inventory.register(device("sw1", "10.0.0.9")).await;
        assert!(matches!(result, Err(DeviceError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_reachability_transitions() {
        let inventory = DeviceInventory::from_devices(vec![device("r1", "10.0.0.1")])
            .await
            .unwrap();
        let now = Utc::now();

        assert_eq!(
            inventory.mark_reachable("r1", now).await.unwrap(),
            ReachabilityChange::Unchanged
        );
        assert_eq!(
            inventory.mark_unreachable("r1").await.unwrap(),
            ReachabilityChange::BecameUnreachable
        );
        assert_eq!(
            inventory.mark_unreachable("r1").await.unwrap(),
            ReachabilityChange::Unchanged
        );
        assert_eq!(inventory.get("r1").await.unwrap().consecutive_failures, 2);

        assert_eq!(
            inventory.mark_reachable("r1", now).await.unwrap(),
            ReachabilityChange::BecameReachable
        );
        let r1 = inventory.get("r1").await.unwrap();
        assert_eq!(r1.reachability, Reachability::Reachable);
        assert_eq!(r1.consecutive_failures, 0);
        assert_eq!(r1.last_seen, Some(now));
    }

    #[tokio::test]
    async fn test_disable_keeps_device() {
        let inventory = DeviceInventory::from_devices(vec![
            device("a", "10.0.0.1"),
            device("b", "10.0.0.2"),
        ])
        .await
        .unwrap();

        inventory.disable("a", "operator request").await.unwrap();
        assert_eq!(inventory.count().await, 2);
        let enabled: Vec<String> = inventory.enabled().await.into_iter().map(|d| d.id).collect();
        assert_eq!(enabled, vec!["b".to_string()]);
        assert!(inventory.disable("zzz", "x").await.is_err());
    }
}
