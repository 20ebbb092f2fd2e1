use crate::{ConfigError, Result};
use std::time::Duration;

/// 从环境变量读取的运行参数
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSettings {
    pub ping_timeout: Duration,
    pub snmp_timeout: Duration,
    pub ssh_timeout: Duration,
    pub max_retries: u32,
    pub dedup_window: Duration,
    pub correlation_window: Duration,
    pub max_alerts_per_hour: u32,
    pub poll_rate_limit: u32,
    pub poll_window: Duration,
    pub retention_days: u32,
    pub topology_enabled: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            ping_timeout: Duration::from_secs(2),
            snmp_timeout: Duration::from_secs(5),
            ssh_timeout: Duration::from_secs(10),
            max_retries: 3,
            dedup_window: Duration::from_secs(300),
            correlation_window: Duration::from_secs(300),
            max_alerts_per_hour: 100,
            poll_rate_limit: 100,
            poll_window: Duration::from_secs(60),
            retention_days: 30,
            topology_enabled: true,
        }
    }
}

impl RuntimeSettings {
    /// 从进程环境变量读取
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// 通过自定义查找函数读取，未设置的变量使用默认值
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let settings = Self {
            ping_timeout: seconds(&lookup, "PING_TIMEOUT", defaults.ping_timeout)?,
            snmp_timeout: seconds(&lookup, "SNMP_TIMEOUT", defaults.snmp_timeout)?,
            ssh_timeout: seconds(&lookup, "SSH_TIMEOUT", defaults.ssh_timeout)?,
            max_retries: number(&lookup, "MAX_RETRIES", defaults.max_retries)?,
            dedup_window: seconds(&lookup, "ALERT_DEDUPLICATION_WINDOW", defaults.dedup_window)?,
            correlation_window: seconds(&lookup, "CORRELATION_WINDOW", defaults.correlation_window)?,
            max_alerts_per_hour: number(&lookup, "MAX_ALERTS_PER_HOUR", defaults.max_alerts_per_hour)?,
            poll_rate_limit: number(&lookup, "DEVICE_POLL_RATE_LIMIT", defaults.poll_rate_limit)?,
            poll_window: seconds(&lookup, "DEVICE_POLL_WINDOW", defaults.poll_window)?,
            retention_days: number(&lookup, "DATA_RETENTION_DAYS", defaults.retention_days)?,
            topology_enabled: boolean(&lookup, "ENABLE_TOPOLOGY_MAPPING", defaults.topology_enabled)?,
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        let positive = [
            ("PING_TIMEOUT", self.ping_timeout),
            ("SNMP_TIMEOUT", self.snmp_timeout),
            ("SSH_TIMEOUT", self.ssh_timeout),
            ("DEVICE_POLL_WINDOW", self.poll_window),
        ];
        for (name, value) in positive {
            if value.is_zero() {
                return Err(ConfigError::Env {
                    name: name.to_string(),
                    value: "0".to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.poll_rate_limit == 0 {
            return Err(ConfigError::Env {
                name: "DEVICE_POLL_RATE_LIMIT".to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_alerts_per_hour == 0 {
            return Err(ConfigError::Env {
                name: "MAX_ALERTS_PER_HOUR".to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.retention_days) * 24 * 3600)
    }
}

fn seconds<F>(lookup: &F, name: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => {
            let value = raw.trim();
            value
                .parse::<f64>()
                .ok()
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map(Duration::from_secs_f64)
                .ok_or_else(|| ConfigError::Env {
                    name: name.to_string(),
                    value: raw.clone(),
                    reason: "expected a non-negative number of seconds".to_string(),
                })
        }
    }
}

fn number<F>(lookup: &F, name: &str, default: u32) -> Result<u32>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<u32>().map_err(|e| ConfigError::Env {
            name: name.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn boolean<F>(lookup: &F, name: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Env {
                name: name.to_string(),
                value: raw.clone(),
                reason: "expected true/false".to_string(),
            }),
        },
    }
}
