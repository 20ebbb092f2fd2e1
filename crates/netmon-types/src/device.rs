use crate::Threshold;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

/// 采集协议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Icmp,
    Snmp,
    Ssh,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Icmp => "icmp",
            Protocol::Snmp => "snmp",
            Protocol::Ssh => "ssh",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "icmp" | "ping" => Ok(Protocol::Icmp),
            "snmp" => Ok(Protocol::Snmp),
            "ssh" => Ok(Protocol::Ssh),
            other => Err(format!("unsupported protocol: {}", other)),
        }
    }
}

/// 设备类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Router,
    Switch,
    Firewall,
    Server,
    AccessPoint,
    LoadBalancer,
    #[default]
    Other,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Router => "router",
            DeviceType::Switch => "switch",
            DeviceType::Firewall => "firewall",
            DeviceType::Server => "server",
            DeviceType::AccessPoint => "access_point",
            DeviceType::LoadBalancer => "load_balancer",
            DeviceType::Other => "other",
        }
    }
}

impl FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "router" => Ok(DeviceType::Router),
            "switch" => Ok(DeviceType::Switch),
            "firewall" => Ok(DeviceType::Firewall),
            "server" => Ok(DeviceType::Server),
            "access_point" | "ap" => Ok(DeviceType::AccessPoint),
            "load_balancer" | "lb" => Ok(DeviceType::LoadBalancer),
            "other" => Ok(DeviceType::Other),
            other => Err(format!("unknown device type: {}", other)),
        }
    }
}

/// 可达性状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reachability {
    #[default]
    Unknown,
    Reachable,
    Unreachable,
}

/// 已解析的设备凭据
#[derive(Clone, Default)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub enable_password: Option<String>,
    pub snmp_community: Option<String>,
    pub snmp_version: String,
    pub ssh_key_file: Option<String>,
    pub ssh_port: Option<u16>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "***");
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("enable_password", &redact(&self.enable_password))
            .field("snmp_community", &redact(&self.snmp_community))
            .field("snmp_version", &self.snmp_version)
            .field("ssh_key_file", &self.ssh_key_file)
            .field("ssh_port", &self.ssh_port)
            .finish()
    }
}

/// 被监控设备
///
/// 启动时由配置创建。可达性只由轮询器修改；设备在配置中存在期间不会被删除，只会被禁用。
#[derive(Debug, Clone)]
pub struct Device {
    pub id: String,
    pub hostname: String,
    pub address: IpAddr,
    /// 厂商标签，用于选择 SNMP/SSH 采集配置
    pub vendor: String,
    pub device_type: DeviceType,
    /// 支持的协议，第一个为主协议
    pub protocols: Vec<Protocol>,
    pub poll_interval: Duration,
    /// 指标名 -> 阈值
    pub thresholds: HashMap<String, Threshold>,
    pub credentials: Option<Credentials>,
    pub location: Option<String>,
    pub reachability: Reachability,
    pub enabled: bool,
    pub disabled_reason: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl Device {
    pub fn new(id: impl Into<String>, address: IpAddr) -> Self {
        let id = id.into();
        Self {
            hostname: id.clone(),
            id,
            address,
            vendor: "generic".to_string(),
            device_type: DeviceType::Other,
            protocols: vec![Protocol::Icmp],
            poll_interval: Duration::from_secs(60),
            thresholds: HashMap::new(),
            credentials: None,
            location: None,
            reachability: Reachability::Unknown,
            enabled: true,
            disabled_reason: None,
            last_seen: None,
            consecutive_failures: 0,
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = vendor.into();
        self
    }

    pub fn with_device_type(mut self, device_type: DeviceType) -> Self {
        self.device_type = device_type;
        self
    }

    pub fn with_protocols(mut self, protocols: Vec<Protocol>) -> Self {
        self.protocols = protocols;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_threshold(mut self, metric: impl Into<String>, threshold: Threshold) -> Self {
        self.thresholds.insert(metric.into(), threshold);
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn primary_protocol(&self) -> Option<Protocol> {
        self.protocols.first().copied()
    }

    pub fn threshold(&self, metric: &str) -> Option<&Threshold> {
        self.thresholds.get(metric)
    }

    /// 禁用设备并记录原因
    pub fn disable(&mut self, reason: impl Into<String>) {
        self.enabled = false;
        self.disabled_reason = Some(reason.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_from_str() {
        assert_eq!("SNMP".parse::<Protocol>().unwrap(), Protocol::Snmp);
        assert_eq!("ping".parse::<Protocol>().unwrap(), Protocol::Icmp);
        assert!("telnet".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_device_builder() {
        let device = Device::new("core-sw-1", "10.0.0.1".parse().unwrap())
            .with_vendor("cisco")
            .with_device_type(DeviceType::Switch)
            .with_protocols(vec![Protocol::Snmp, Protocol::Icmp])
            .with_threshold("cpu_usage", Threshold::above(80.0, 90.0));

        assert_eq!(device.hostname, "core-sw-1");
        assert_eq!(device.primary_protocol(), Some(Protocol::Snmp));
        assert!(device.threshold("cpu_usage").is_some());
        assert!(device.enabled);
    }

    #[test]
    fn test_credentials_debug_redacts_secrets() {
        let creds = Credentials {
            username: Some("admin".to_string()),
            password: Some("hunter2".to_string()),
            snmp_community: Some("private".to_string()),
            snmp_version: "2c".to_string(),
            ..Default::default()
        };
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("private"));
    }

    #[test]
    fn test_disable() {
        let mut device = Device::new("fw-1", "10.0.0.254".parse().unwrap());
        device.disable("missing credential reference");
        assert!(!device.enabled);
        assert_eq!(device.disabled_reason.as_deref(), Some("missing credential reference"));
    }
}
