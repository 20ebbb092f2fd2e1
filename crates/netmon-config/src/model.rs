use netmon_types::{BusinessService, IpNetwork, Runbook, Severity, Threshold};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;

/// 配置文件根结构
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,

    /// Prometheus 指标监听地址，不配置则不导出
    #[serde(default)]
    pub metrics_addr: Option<String>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub devices: Vec<DeviceConfig>,

    /// 凭据组名 -> 凭据引用
    #[serde(default)]
    pub credentials: HashMap<String, CredentialConfig>,

    /// 设备未声明阈值时使用的默认阈值
    #[serde(default = "default_thresholds")]
    pub default_thresholds: HashMap<String, Threshold>,

    #[serde(default)]
    pub business_services: Vec<BusinessService>,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,

    #[serde(default)]
    pub poller: PollerConfig,

    #[serde(default)]
    pub alerting: AlertingConfig,

    /// `<设备类型>_<条件>` -> 处理步骤，例如 `router_cpu_usage`
    #[serde(default)]
    pub resolution_steps: HashMap<String, Vec<String>>,

    /// 级别 -> 升级路径
    #[serde(default)]
    pub escalation_paths: HashMap<String, Vec<String>>,
}

impl MonitorConfig {
    /// 告警附带的处理步骤和升级路径
    pub fn runbook(&self) -> Runbook {
        // 级别别名（warn、crit）统一成标准名称
        let escalation_paths = self
            .escalation_paths
            .iter()
            .map(|(severity, path)| {
                let key = severity
                    .parse::<Severity>()
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_else(|_| severity.clone());
                (key, path.clone())
            })
            .collect();
        Runbook {
            resolution_steps: self.resolution_steps.clone(),
            escalation_paths,
        }
    }
}

/// 单台设备配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    pub id: String,
    #[serde(default)]
    pub hostname: Option<String>,
    pub address: IpAddr,
    #[serde(default = "default_vendor")]
    pub vendor: String,
    #[serde(default)]
    pub device_type: Option<String>,
    /// 协议名称，未知协议只禁用该设备
    #[serde(default = "default_protocols")]
    pub protocols: Vec<String>,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    /// 凭据组名
    #[serde(default)]
    pub credentials: Option<String>,
    #[serde(default)]
    pub thresholds: HashMap<String, Threshold>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// 凭据引用
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CredentialConfig {
    #[serde(default)]
    pub username: Option<String>,
    /// 保存密码的环境变量名
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default)]
    pub enable_password_env: Option<String>,
    /// 保存 SNMP community 的环境变量名
    #[serde(default)]
    pub community_env: Option<String>,
    #[serde(default = "default_snmp_version")]
    pub snmp_version: String,
    #[serde(default)]
    pub ssh_key_file: Option<String>,
    #[serde(default)]
    pub ssh_port: Option<u16>,
}

/// 拓扑发现配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub networks: Vec<IpNetwork>,
    #[serde(default = "default_discovery_interval")]
    pub interval_secs: u64,
    /// 影响范围的最大跳数
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
    /// 连续未确认多少个周期后删除链路
    #[serde(default = "default_grace_cycles")]
    pub removal_grace_cycles: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            networks: Vec::new(),
            interval_secs: default_discovery_interval(),
            max_hops: default_max_hops(),
            removal_grace_cycles: default_grace_cycles(),
        }
    }
}

/// 邮件渠道配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmailChannelConfig {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password_env: Option<String>,
    pub from: String,
    /// 告警级别名 -> 收件人
    #[serde(default)]
    pub recipients: HashMap<String, Vec<String>>,
    #[serde(default = "default_true")]
    pub starttls: bool,
}

/// 聊天 Webhook 渠道配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookChannelConfig {
    pub url: String,
    /// 保存访问令牌的环境变量名
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// 通知配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub email: Option<EmailChannelConfig>,
    #[serde(default)]
    pub webhook: Option<WebhookChannelConfig>,
    /// 告警级别名 -> 渠道名称
    #[serde(default = "default_routes")]
    pub routes: HashMap<String, Vec<String>>,
    /// 每个渠道每分钟最多发送条数
    #[serde(default = "default_channel_rate")]
    pub channel_rate_per_minute: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub notify_on_resolve: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            email: None,
            webhook: None,
            routes: default_routes(),
            channel_rate_per_minute: default_channel_rate(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            delivery_timeout_secs: default_delivery_timeout(),
            notify_on_resolve: true,
        }
    }
}

/// 轮询器配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollerConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_poll_interval")]
    pub default_interval_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            default_interval_secs: default_poll_interval(),
        }
    }
}

/// 告警引擎配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertingConfig {
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// 告警评估分片数（同一设备的事件总是进入同一分片）
    #[serde(default = "default_shards")]
    pub evaluation_shards: usize,
    #[serde(default = "default_housekeeping_interval")]
    pub housekeeping_interval_secs: u64,
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval_secs: u64,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            evaluation_shards: default_shards(),
            housekeeping_interval_secs: default_housekeeping_interval(),
            checkpoint_interval_secs: default_checkpoint_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// 日志配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("./state")
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("./reports")
}

fn default_vendor() -> String {
    "generic".to_string()
}

fn default_protocols() -> Vec<String> {
    vec!["icmp".to_string()]
}

fn default_snmp_version() -> String {
    "2c".to_string()
}

fn default_true() -> bool {
    true
}

fn default_discovery_interval() -> u64 {
    900
}

fn default_max_hops() -> usize {
    2
}

fn default_grace_cycles() -> u32 {
    2
}

fn default_smtp_port() -> u16 {
    587
}

fn default_routes() -> HashMap<String, Vec<String>> {
    let mut routes = HashMap::new();
    routes.insert(
        "critical".to_string(),
        vec!["email".to_string(), "webhook".to_string()],
    );
    routes.insert("warning".to_string(), vec!["webhook".to_string()]);
    routes.insert("info".to_string(), vec!["webhook".to_string()]);
    routes
}

fn default_channel_rate() -> u32 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_delivery_timeout() -> u64 {
    10
}

fn default_workers() -> usize {
    16
}

fn default_poll_interval() -> u64 {
    300
}

fn default_history_limit() -> usize {
    1000
}

fn default_shards() -> usize {
    4
}

fn default_housekeeping_interval() -> u64 {
    15
}

fn default_checkpoint_interval() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

/// 常见网络指标的默认阈值
pub fn default_thresholds() -> HashMap<String, Threshold> {
    [
        ("bandwidth_utilization", 80.0, 90.0),
        ("packet_loss", 5.0, 10.0),
        ("latency_ms", 100.0, 200.0),
        ("interface_errors", 100.0, 1000.0),
        ("cpu_usage", 80.0, 90.0),
        ("memory_usage", 80.0, 90.0),
        ("temperature", 75.0, 85.0),
        ("poe_usage", 80.0, 90.0),
        ("auth_failures", 5.0, 10.0),
        ("acl_violations", 10.0, 50.0),
        ("port_security_violations", 1.0, 5.0),
    ]
    .into_iter()
    .map(|(metric, warning, critical)| (metric.to_string(), Threshold::above(warning, critical)))
    .collect()
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            reports_dir: default_reports_dir(),
            metrics_addr: None,
            logging: LoggingConfig::default(),
            devices: Vec::new(),
            credentials: HashMap::new(),
            default_thresholds: default_thresholds(),
            business_services: Vec::new(),
            discovery: DiscoveryConfig::default(),
            notifications: NotificationConfig::default(),
            poller: PollerConfig::default(),
            alerting: AlertingConfig::default(),
            resolution_steps: HashMap::new(),
            escalation_paths: HashMap::new(),
        }
    }
}

impl NotificationConfig {
    /// 某个告警级别配置的渠道
    pub fn routes_for(&self, severity: Severity) -> Vec<String> {
        self.routes
            .get(severity.as_str())
            .cloned()
            .unwrap_or_default()
    }
}

impl EmailChannelConfig {
    pub fn recipients_for(&self, severity: Severity) -> Vec<String> {
        self.recipients
            .get(severity.as_str())
            .cloned()
            .unwrap_or_default()
    }
}

impl MonitorConfig {
    /// 文件级校验，失败时进程不能启动
    pub fn validate(&self) -> crate::Result<()> {
        let mut seen = std::collections::HashSet::new();
        for device in &self.devices {
            if device.id.trim().is_empty() {
                return Err(crate::ConfigError::invalid("device with empty id"));
            }
            if !seen.insert(device.id.as_str()) {
                return Err(crate::ConfigError::invalid(format!(
                    "duplicate device id: {}",
                    device.id
                )));
            }
        }

        for service in &self.business_services {
            if service.priority == 0 {
                return Err(crate::ConfigError::invalid(format!(
                    "business service {} must have priority >= 1",
                    service.name
                )));
            }
        }

        for (severity, channels) in &self.notifications.routes {
            severity
                .parse::<Severity>()
                .map_err(crate::ConfigError::Invalid)?;
            for channel in channels {
                if channel != "email" && channel != "webhook" {
                    return Err(crate::ConfigError::invalid(format!(
                        "route for {} references unknown channel {}",
                        severity, channel
                    )));
                }
            }
        }

        for severity in self.escalation_paths.keys() {
            severity
                .parse::<Severity>()
                .map_err(crate::ConfigError::Invalid)?;
        }

        if self.poller.workers == 0 {
            return Err(crate::ConfigError::invalid("poller.workers must be > 0"));
        }
        if self.alerting.evaluation_shards == 0 {
            return Err(crate::ConfigError::invalid(
                "alerting.evaluation_shards must be > 0",
            ));
        }
        if self.notifications.max_attempts == 0 {
            return Err(crate::ConfigError::invalid(
                "notifications.max_attempts must be > 0",
            ));
        }

        Ok(())
    }
}
