use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// ARP 表条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArpEntry {
    pub ip: IpAddr,
    pub mac: String,
}

/// 一台设备的邻居发现结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryReport {
    pub device_id: String,
    /// L2：ARP 表
    pub arp: Vec<ArpEntry>,
    /// L2：网桥转发表中学习到的 MAC
    pub bridge_macs: Vec<String>,
    /// L3：路由下一跳
    pub route_next_hops: Vec<IpAddr>,
}

impl DiscoveryReport {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.arp.is_empty() && self.bridge_macs.is_empty() && self.route_next_hops.is_empty()
    }
}

/// 把 `0:1b:21:a:b:c`、`00 1B 21 0A 0B 0C`、`00-1b-21-0a-0b-0c` 统一为 `00:1b:21:0a:0b:0c`
pub fn normalize_mac(raw: &str) -> Option<String> {
    let raw = raw.trim().trim_matches('"');
    let parts: Vec<&str> = raw
        .split(|c| c == ':' || c == ' ' || c == '-')
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() != 6 {
        return None;
    }

    let mut octets = Vec::with_capacity(6);
    for part in parts {
        octets.push(u8::from_str_radix(part, 16).ok()?);
    }
    Some(
        octets
            .iter()
            .map(|o| format!("{:02x}", o))
            .collect::<Vec<_>>()
            .join(":"),
    )
}
