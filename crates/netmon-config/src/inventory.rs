use crate::{CredentialConfig, CredentialResolver, DeviceConfig, MonitorConfig};
use netmon_types::{Credentials, Device, DeviceType, Protocol};
use std::time::Duration;
use tracing::{info, warn};

/// 根据配置构建设备列表
///
/// 单台设备的配置问题（未知协议、无可用适配器、凭据缺失、阈值不自洽）只会禁用该设备，
/// 设备仍然保留在清单中并记录禁用原因。
pub fn build_devices(
    config: &MonitorConfig,
    resolver: &dyn CredentialResolver,
    supported: &[Protocol],
) -> Vec<Device> {
    let devices: Vec<Device> = config
        .devices
        .iter()
        .map(|device_config| {
            let mut device = base_device(config, device_config);
            if let Err(reason) = configure(config, device_config, resolver, supported, &mut device) {
                warn!(device_id = %device.id, reason = %reason, "Device disabled by configuration error");
                device.disable(reason);
            }
            device
        })
        .collect();

    let enabled = devices.iter().filter(|d| d.enabled).count();
    info!(
        total = devices.len(),
        enabled = enabled,
        disabled = devices.len() - enabled,
        "Device inventory built"
    );
    devices
}

fn base_device(config: &MonitorConfig, cfg: &DeviceConfig) -> Device {
    let interval = cfg
        .poll_interval_secs
        .unwrap_or(config.poller.default_interval_secs)
        .max(1);

    let mut device = Device::new(cfg.id.clone(), cfg.address)
        .with_hostname(cfg.hostname.clone().unwrap_or_else(|| cfg.id.clone()))
        .with_vendor(cfg.vendor.to_ascii_lowercase())
        .with_poll_interval(Duration::from_secs(interval));
    device.location = cfg.location.clone();
    device.protocols.clear();
    device.thresholds = config.default_thresholds.clone();
    device.thresholds.extend(cfg.thresholds.clone());
    if !cfg.enabled {
        device.disable("disabled in configuration");
    }
    device
}

fn configure(
    config: &MonitorConfig,
    cfg: &DeviceConfig,
    resolver: &dyn CredentialResolver,
    supported: &[Protocol],
    device: &mut Device,
) -> Result<(), String> {
    if let Some(device_type) = &cfg.device_type {
        device.device_type = device_type.parse::<DeviceType>()?;
    }

    let mut protocols = Vec::with_capacity(cfg.protocols.len());
    for name in &cfg.protocols {
        protocols.push(name.parse::<Protocol>()?);
    }
    if protocols.is_empty() {
        return Err("no protocols configured".to_string());
    }
    if !protocols.iter().any(|p| supported.contains(p)) {
        return Err(format!(
            "no adapter available for protocols {:?}",
            cfg.protocols
        ));
    }
    // 不支持的协议排在后面，主协议总是可用的
    protocols.sort_by_key(|p| !supported.contains(p));
    device.protocols = protocols;

    for (metric, threshold) in &device.thresholds {
        threshold
            .validate()
            .map_err(|e| format!("threshold for {}: {}", metric, e))?;
    }

    let needs_credentials = device
        .protocols
        .iter()
        .any(|p| matches!(p, Protocol::Snmp | Protocol::Ssh));
    match &cfg.credentials {
        Some(group) => {
            let credential = config
                .credentials
                .get(group)
                .ok_or_else(|| format!("unknown credential group {}", group))?;
            device.credentials = Some(resolve_credentials(credential, resolver, &device.protocols)?);
        }
        None if needs_credentials => {
            return Err("missing credential reference for SNMP/SSH polling".to_string());
        }
        None => {}
    }

    Ok(())
}

fn resolve_secret(
    reference: &Option<String>,
    resolver: &dyn CredentialResolver,
) -> Result<Option<String>, String> {
    match reference {
        Some(name) => resolver
            .resolve(name)
            .map(Some)
            .ok_or_else(|| format!("credential reference {} could not be resolved", name)),
        None => Ok(None),
    }
}

fn resolve_credentials(
    cfg: &CredentialConfig,
    resolver: &dyn CredentialResolver,
    protocols: &[Protocol],
) -> Result<Credentials, String> {
    let credentials = Credentials {
        username: cfg.username.clone(),
        password: resolve_secret(&cfg.password_env, resolver)?,
        enable_password: resolve_secret(&cfg.enable_password_env, resolver)?,
        snmp_community: resolve_secret(&cfg.community_env, resolver)?,
        snmp_version: cfg.snmp_version.clone(),
        ssh_key_file: cfg.ssh_key_file.clone(),
        ssh_port: cfg.ssh_port,
    };

    if protocols.contains(&Protocol::Snmp) && credentials.snmp_community.is_none() {
        return Err("SNMP polling requires a community reference".to_string());
    }
    if protocols.contains(&Protocol::Ssh) && credentials.username.is_none() {
        return Err("SSH polling requires a username".to_string());
    }
    Ok(credentials)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConfigLoader, StaticCredentialResolver};

    const ALL: [Protocol; 3] = [Protocol::Icmp, Protocol::Snmp, Protocol::Ssh];

    fn config() -> MonitorConfig {
        ConfigLoader::load_str(
            r#"{
            "devices": [
                { "id": "sw1", "address": "10.0.0.1", "protocols": ["snmp"], "credentials": "lab",
                  "thresholds": { "cpu_usage": { "warning": 60, "critical": 70 } } },
                { "id": "sw2", "address": "10.0.0.2", "protocols": ["snmp"] },
                { "id": "sw3", "address": "10.0.0.3", "protocols": ["telnet"] },
                { "id": "sw4", "address": "10.0.0.4", "protocols": ["icmp"],
                  "thresholds": { "latency_ms": { "warning": 500, "critical": 100 } } },
                { "id": "sw5", "address": "10.0.0.5", "protocols": ["snmp"], "credentials": "missing" },
                { "id": "srv1", "address": "10.0.1.1", "protocols": ["ssh", "icmp"], "credentials": "lab",
                  "device_type": "server" }
            ],
            "credentials": {
                "lab": { "username": "netops", "community_env": "LAB_COMMUNITY" }
            }
        }"#,
        )
        .unwrap()
    }

    fn by_id<'a>(devices: &'a [Device], id: &str) -> &'a Device {
        devices.iter().find(|d| d.id == id).unwrap()
    }

    #[test]
    fn test_valid_devices_enabled() {
        let resolver = StaticCredentialResolver::new().with("LAB_COMMUNITY", "s3cret");
        let devices = build_devices(&config(), &resolver, &ALL);
        assert_eq!(devices.len(), 6);

        let sw1 = by_id(&devices, "sw1");
        assert!(sw1.enabled);
        assert_eq!(
            sw1.credentials.as_ref().unwrap().snmp_community.as_deref(),
            Some("s3cret")
        );
        // 设备阈值覆盖默认阈值，其余默认阈值保留
        assert_eq!(sw1.threshold("cpu_usage").unwrap().warning, Some(60.0));
        assert!(sw1.threshold("packet_loss").is_some());

        let srv1 = by_id(&devices, "srv1");
        assert!(srv1.enabled);
        assert_eq!(srv1.device_type, DeviceType::Server);
    }

    #[test]
    fn test_config_errors_disable_only_affected_device() {
        let resolver = StaticCredentialResolver::new().with("LAB_COMMUNITY", "s3cret");
        let devices = build_devices(&config(), &resolver, &ALL);

        for id in ["sw2", "sw3", "sw4", "sw5"] {
            let device = by_id(&devices, id);
            assert!(!device.enabled, "{} should be disabled", id);
            assert!(device.disabled_reason.is_some());
        }
        assert!(by_id(&devices, "sw3")
            .disabled_reason
            .as_ref()
            .unwrap()
            .contains("telnet"));
    }

    #[test]
    fn test_unresolvable_credential_disables_device() {
        let devices = build_devices(&config(), &StaticCredentialResolver::new(), &ALL);
        assert!(!by_id(&devices, "sw1").enabled);
    }

    #[test]
    fn test_unsupported_protocol_moves_behind_supported() {
        let resolver = StaticCredentialResolver::new().with("LAB_COMMUNITY", "s3cret");
        let devices = build_devices(&config(), &resolver, &[Protocol::Icmp]);

        let srv1 = by_id(&devices, "srv1");
        assert!(srv1.enabled);
        assert_eq!(srv1.primary_protocol(), Some(Protocol::Icmp));
        assert!(!by_id(&devices, "sw1").enabled);
    }
}
