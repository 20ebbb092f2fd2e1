use std::collections::HashMap;

/// SNMP 指标定义
#[derive(Debug, Clone, PartialEq)]
pub struct OidMetric {
    pub metric: String,
    pub oid: String,
    /// 原始值乘以该系数
    pub scale: f64,
}

impl OidMetric {
    pub fn new(metric: &str, oid: &str) -> Self {
        Self {
            metric: metric.to_string(),
            oid: oid.trim_start_matches('.').to_string(),
            scale: 1.0,
        }
    }

    pub fn scaled(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }
}

/// SSH 指标定义：执行命令并取输出中的第一个数字
#[derive(Debug, Clone, PartialEq)]
pub struct SshMetric {
    pub metric: String,
    pub command: String,
    /// 输出是空闲百分比时取 100 - 值
    pub invert_percent: bool,
}

impl SshMetric {
    pub fn new(metric: &str, command: &str) -> Self {
        Self {
            metric: metric.to_string(),
            command: command.to_string(),
            invert_percent: false,
        }
    }

    pub fn inverted(mut self) -> Self {
        self.invert_percent = true;
        self
    }
}

/// 厂商采集配置
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VendorProfile {
    pub snmp: Vec<OidMetric>,
    pub ssh: Vec<SshMetric>,
}

/// 厂商标签 -> 采集配置
#[derive(Debug, Clone)]
pub struct VendorProfiles {
    profiles: HashMap<String, VendorProfile>,
}

const SYS_UPTIME: &str = "1.3.6.1.2.1.1.3.0";
const IF_IN_ERRORS: &str = "1.3.6.1.2.1.2.2.1.14.1";
const HR_PROCESSOR_LOAD: &str = "1.3.6.1.2.1.25.3.3.1.2.1";

impl VendorProfiles {
    pub fn new() -> Self {
        Self {
            profiles: HashMap::new(),
        }
    }

    /// 内置的 generic、cisco、juniper、arista 配置
    pub fn builtin() -> Self {
        let generic_snmp = vec![
            OidMetric::new("uptime_seconds", SYS_UPTIME).scaled(0.01),
            OidMetric::new("interface_errors", IF_IN_ERRORS),
        ];

        let mut profiles = Self::new();
        profiles.insert(
            "generic",
            VendorProfile {
                snmp: [
                    generic_snmp.clone(),
                    vec![OidMetric::new("cpu_usage", HR_PROCESSOR_LOAD)],
                ]
                .concat(),
                ssh: vec![
                    SshMetric::new("cpu_usage", "vmstat 1 2 | tail -1 | awk '{print $15}'").inverted(),
                    SshMetric::new(
                        "memory_usage",
                        "free | awk '/Mem:/ {printf \"%.1f\", $3/$2*100}'",
                    ),
                ],
            },
        );
        profiles.insert(
            "cisco",
            VendorProfile {
                snmp: [
                    generic_snmp.clone(),
                    vec![
                        OidMetric::new("cpu_usage", "1.3.6.1.4.1.9.9.109.1.1.1.1.8.1"),
                        OidMetric::new("temperature", "1.3.6.1.4.1.9.9.13.1.3.1.3.1"),
                    ],
                ]
                .concat(),
                ssh: vec![SshMetric::new(
                    "cpu_usage",
                    "show processes cpu | include CPU utilization",
                )],
            },
        );
        profiles.insert(
            "juniper",
            VendorProfile {
                snmp: [
                    generic_snmp.clone(),
                    vec![
                        OidMetric::new("cpu_usage", "1.3.6.1.4.1.2636.3.1.13.1.8.9.1.0.0"),
                        OidMetric::new("memory_usage", "1.3.6.1.4.1.2636.3.1.13.1.11.9.1.0.0"),
                        OidMetric::new("temperature", "1.3.6.1.4.1.2636.3.1.13.1.7.9.1.0.0"),
                    ],
                ]
                .concat(),
                ssh: vec![SshMetric::new(
                    "cpu_usage",
                    "show chassis routing-engine | match Idle",
                )
                .inverted()],
            },
        );
        profiles.insert(
            "arista",
            VendorProfile {
                snmp: [
                    generic_snmp,
                    vec![OidMetric::new("cpu_usage", HR_PROCESSOR_LOAD)],
                ]
                .concat(),
                ssh: vec![SshMetric::new(
                    "cpu_usage",
                    "bash timeout 5 vmstat 1 2 | tail -1 | awk '{print $15}'",
                )
                .inverted()],
            },
        );
        profiles
    }

    pub fn insert(&mut self, vendor: &str, profile: VendorProfile) {
        self.profiles.insert(vendor.to_ascii_lowercase(), profile);
    }

    /// 按厂商标签查找，未知厂商回退到 generic
    pub fn for_vendor(&self, vendor: &str) -> Option<&VendorProfile> {
        self.profiles
            .get(&vendor.to_ascii_lowercase())
            .or_else(|| self.profiles.get("generic"))
    }
}

impl Default for VendorProfiles {
    fn default() -> Self {
        Self::builtin()
    }
}
