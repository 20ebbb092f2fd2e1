use crate::discovery::normalize_mac;
use crate::{
    Adapter, AdapterError, ArpEntry, CommandOutput, CommandRunner, DiscoveryReport, Result,
    VendorProfiles,
};
use async_trait::async_trait;
use chrono::Utc;
use netmon_types::{Device, MetricSample, Protocol};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// ipNetToMediaPhysAddress
pub const OID_ARP_TABLE: &str = "1.3.6.1.2.1.4.22.1.2";
/// dot1dTpFdbAddress
pub const OID_BRIDGE_FDB: &str = "1.3.6.1.2.1.17.4.3.1.1";
/// ipRouteNextHop
pub const OID_ROUTE_NEXT_HOP: &str = "1.3.6.1.2.1.4.21.1.7";

/// 解析 `-On -Oq` 格式输出：每行 `.<oid> <value>`
pub fn parse_varbinds(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (oid, value) = line.split_once(char::is_whitespace)?;
            if !oid.starts_with('.') && !oid.starts_with(|c: char| c.is_ascii_digit()) {
                return None;
            }
            Some((
                oid.trim_start_matches('.').to_string(),
                value.trim().to_string(),
            ))
        })
        .collect()
}

/// 解析数值型 varbind；NaN 和无穷大按无效值处理
fn parse_numeric(value: &str) -> Option<f64> {
    let value = value.trim().trim_matches('"');
    value
        .parse::<f64>()
        .ok()
        .or_else(|| value.split_whitespace().next()?.parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// 从 OID 末尾四段还原 IPv4 地址
fn ipv4_suffix(oid: &str) -> Option<IpAddr> {
    let parts: Vec<u8> = oid
        .rsplit('.')
        .take(4)
        .map(|p| p.parse::<u8>().ok())
        .collect::<Option<Vec<_>>>()?;
    if parts.len() != 4 {
        return None;
    }
    Some(IpAddr::V4(Ipv4Addr::new(parts[3], parts[2], parts[1], parts[0])))
}

/// 解析 ARP 表 walk 结果
pub fn parse_arp_walk(output: &str) -> Vec<ArpEntry> {
    parse_varbinds(output)
        .into_iter()
        .filter_map(|(oid, value)| {
            Some(ArpEntry {
                ip: ipv4_suffix(&oid)?,
                mac: normalize_mac(&value)?,
            })
        })
        .collect()
}

/// 解析网桥转发表 walk 结果
pub fn parse_bridge_walk(output: &str) -> Vec<String> {
    let mut macs: Vec<String> = parse_varbinds(output)
        .into_iter()
        .filter_map(|(_, value)| normalize_mac(&value))
        .collect();
    macs.sort();
    macs.dedup();
    macs
}

/// 解析路由下一跳 walk 结果（忽略 0.0.0.0 和直连路由）
pub fn parse_route_walk(output: &str, own: IpAddr) -> Vec<IpAddr> {
    let mut hops: Vec<IpAddr> = parse_varbinds(output)
        .into_iter()
        .filter_map(|(_, value)| value.trim_matches('"').parse::<IpAddr>().ok())
        .filter(|ip| !ip.is_unspecified() && *ip != own)
        .collect();
    hops.sort();
    hops.dedup();
    hops
}

/// SNMP 适配器（基于 net-snmp 命令行工具）
pub struct SnmpAdapter {
    runner: Arc<dyn CommandRunner>,
    profiles: Arc<VendorProfiles>,
    timeout: Duration,
}

impl SnmpAdapter {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        profiles: Arc<VendorProfiles>,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            profiles,
            timeout,
        }
    }

    fn base_args(&self, device: &Device) -> Result<Vec<String>> {
        let credentials = device
            .credentials
            .as_ref()
            .ok_or_else(|| AdapterError::MissingCredentials(device.id.clone()))?;
        let community = credentials
            .snmp_community
            .clone()
            .ok_or_else(|| AdapterError::MissingCredentials(format!("{} community", device.id)))?;
        let version = if credentials.snmp_version.is_empty() {
            "2c".to_string()
        } else {
            credentials.snmp_version.clone()
        };
        let timeout_secs = self.timeout.as_secs_f64().ceil().max(1.0) as u64;

        Ok(vec![
            "-v".to_string(),
            version,
            "-c".to_string(),
            community,
            "-t".to_string(),
            timeout_secs.to_string(),
            "-r".to_string(),
            "0".to_string(),
            "-On".to_string(),
            "-Oq".to_string(),
            "-Ot".to_string(),
            device.address.to_string(),
        ])
    }

    fn check(program: &str, output: &CommandOutput) -> Result<()> {
        if output.success() {
            return Ok(());
        }
        if output.stderr.contains("Timeout") {
            return Err(AdapterError::Unreachable(output.stderr.trim().to_string()));
        }
        Err(AdapterError::CommandFailed {
            program: program.to_string(),
            status: output.status,
            stderr: output.stderr.trim().to_string(),
        })
    }

    async fn walk(&self, device: &Device, oid: &str) -> Result<String> {
        let mut args = self.base_args(device)?;
        args.push(oid.to_string());
        let output = self.runner.run("snmpwalk", &args).await?;
        Self::check("snmpwalk", &output)?;
        Ok(output.stdout)
    }
}

#[async_trait]
impl Adapter for SnmpAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Snmp
    }

    async fn poll(&self, device: &Device) -> Result<Vec<MetricSample>> {
        let profile = self
            .profiles
            .for_vendor(&device.vendor)
            .ok_or_else(|| AdapterError::Unsupported(format!("no SNMP profile for {}", device.vendor)))?;
        if profile.snmp.is_empty() {
            return Err(AdapterError::Unsupported(format!(
                "SNMP profile for {} has no metrics",
                device.vendor
            )));
        }

        let mut args = self.base_args(device)?;
        args.extend(profile.snmp.iter().map(|m| m.oid.clone()));

        let output = self.runner.run("snmpget", &args).await?;
        Self::check("snmpget", &output)?;

        let by_oid: HashMap<String, &crate::OidMetric> =
            profile.snmp.iter().map(|m| (m.oid.clone(), m)).collect();
        let now = Utc::now();
        let mut samples = Vec::new();

        for (oid, value) in parse_varbinds(&output.stdout) {
            let Some(metric) = by_oid.get(&oid) else {
                debug!(device_id = %device.id, oid = %oid, "Ignoring unexpected OID");
                continue;
            };
            match parse_numeric(&value) {
                Some(v) => samples.push(
                    MetricSample::new(&device.id, &metric.metric, v * metric.scale).at(now),
                ),
                None => debug!(
                    device_id = %device.id,
                    metric = %metric.metric,
                    value = %value,
                    "Non-numeric SNMP value skipped"
                ),
            }
        }

        if samples.is_empty() {
            return Err(AdapterError::malformed(format!(
                "no numeric values in snmpget output for {}",
                device.id
            )));
        }
        Ok(samples)
    }

    fn supports_discovery(&self) -> bool {
        true
    }

    async fn discover(&self, device: &Device) -> Result<DiscoveryReport> {
        let mut report = DiscoveryReport::new(&device.id);

        report.arp = parse_arp_walk(&self.walk(device, OID_ARP_TABLE).await?);

        // 非交换设备没有网桥 MIB，失败不影响其他表
        match self.walk(device, OID_BRIDGE_FDB).await {
            Ok(out) => report.bridge_macs = parse_bridge_walk(&out),
            Err(e) => warn!(device_id = %device.id, error = %e, "Bridge table walk failed"),
        }

        match self.walk(device, OID_ROUTE_NEXT_HOP).await {
            Ok(out) => report.route_next_hops = parse_route_walk(&out, device.address),
            Err(e) => warn!(device_id = %device.id, error = %e, "Route table walk failed"),
        }

        debug!(
            device_id = %device.id,
            arp = report.arp.len(),
            bridge = report.bridge_macs.len(),
            routes = report.route_next_hops.len(),
            "Discovery completed"
        );
        Ok(report)
    }
}
