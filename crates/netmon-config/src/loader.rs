use crate::{ConfigError, MonitorConfig, Result};
use config::{Config, File, FileFormat};
use std::path::Path;
use tracing::info;

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从 JSON 文件加载并校验配置
    pub fn load<P: AsRef<Path>>(path: P) -> Result<MonitorConfig> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| ConfigError::invalid("config path is not valid UTF-8"))?;

        let config: MonitorConfig = Config::builder()
            .add_source(File::new(path_str, FileFormat::Json))
            .build()?
            .try_deserialize()?;

        config.validate()?;

        info!(
            path = %path.display(),
            devices = config.devices.len(),
            services = config.business_services.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// 从 JSON 字符串加载并校验配置
    pub fn load_str(json: &str) -> Result<MonitorConfig> {
        let config: MonitorConfig = Config::builder()
            .add_source(File::from_str(json, FileFormat::Json))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netmon_types::{DeviceType, Severity};
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "state_dir": "/var/lib/netmon",
        "devices": [
            {
                "id": "core-sw-1",
                "address": "10.0.0.1",
                "vendor": "cisco",
                "device_type": "switch",
                "protocols": ["snmp", "icmp"],
                "poll_interval_secs": 60,
                "credentials": "default",
                "thresholds": {
                    "cpu_usage": { "warning": 70, "critical": 95 }
                }
            },
            { "id": "edge-fw-1", "address": "10.0.0.254" }
        ],
        "credentials": {
            "default": { "username": "netops", "community_env": "NETMON_COMMUNITY" }
        },
        "business_services": [
            { "name": "payments", "priority": 1, "devices": ["core-sw-1"] }
        ],
        "discovery": { "networks": ["10.0.0.0/16"], "max_hops": 3 },
        "notifications": {
            "routes": { "critical": ["email"], "warning": ["webhook"] }
        }
    }"#;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = ConfigLoader::load(file.path()).unwrap();

        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[0].protocols, vec!["snmp", "icmp"]);
        assert_eq!(config.devices[1].protocols, vec!["icmp"]);
        assert_eq!(config.discovery.max_hops, 3);
        assert_eq!(config.discovery.removal_grace_cycles, 2);
        assert_eq!(config.business_services[0].priority, 1);
        assert_eq!(
            config.devices[0].thresholds["cpu_usage"].critical,
            Some(95.0)
        );
        // 未配置的部分使用默认值
        assert!(config.default_thresholds.contains_key("packet_loss"));
        assert_eq!(config.poller.workers, 16);
    }

    #[test]
    fn test_missing_file() {
        let err = ConfigLoader::load("/nonexistent/netmon.json").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_duplicate_device_ids_rejected() {
        let json = r#"{ "devices": [
            { "id": "a", "address": "10.0.0.1" },
            { "id": "a", "address": "10.0.0.2" }
        ] }"#;
        assert!(matches!(
            ConfigLoader::load_str(json).unwrap_err(),
            ConfigError::Invalid(_)
        ));
    }

    #[test]
    fn test_unknown_route_channel_rejected() {
        let json = r#"{ "notifications": { "routes": { "critical": ["pager"] } } }"#;
        assert!(ConfigLoader::load_str(json).is_err());
    }

    #[test]
    fn test_runbook_sections() {
        let json = r#"{
            "resolution_steps": { "router_cpu_usage": ["Check control plane policing"] },
            "escalation_paths": { "critical": ["NOC", "Network Lead"] }
        }"#;
        let runbook = ConfigLoader::load_str(json).unwrap().runbook();

        assert_eq!(
            runbook.resolution_steps(DeviceType::Router, "cpu_usage"),
            vec!["Check control plane policing"]
        );
        assert_eq!(runbook.escalation_path(Severity::Critical), vec!["NOC", "Network Lead"]);
        // 未配置的级别使用默认升级路径
        assert_eq!(runbook.escalation_path(Severity::Warning).len(), 4);

        let json = r#"{ "escalation_paths": { "urgent": ["NOC"] } }"#;
        assert!(matches!(
            ConfigLoader::load_str(json).unwrap_err(),
            ConfigError::Invalid(_)
        ));
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(matches!(
            ConfigLoader::load_str("{ devices: [").unwrap_err(),
            ConfigError::Parse(_)
        ));
    }
}
