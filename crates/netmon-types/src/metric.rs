use crate::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 指标样本（写入后不可变）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub device_id: String,
    pub metric: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    pub fn new(device_id: impl Into<String>, metric: impl Into<String>, value: f64) -> Self {
        Self {
            device_id: device_id.into(),
            metric: metric.into(),
            value,
            timestamp: Utc::now(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// 阈值比较方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    /// 值大于等于阈值时越限（利用率、丢包、延迟等）
    #[default]
    Above,
    /// 值小于等于阈值时越限（剩余内存、光功率等）
    Below,
}

/// 单个指标的告警阈值
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    #[serde(default)]
    pub warning: Option<f64>,
    #[serde(default)]
    pub critical: Option<f64>,
    #[serde(default)]
    pub comparison: Comparison,
}

impl Threshold {
    pub fn above(warning: f64, critical: f64) -> Self {
        Self {
            warning: Some(warning),
            critical: Some(critical),
            comparison: Comparison::Above,
        }
    }

    pub fn below(warning: f64, critical: f64) -> Self {
        Self {
            warning: Some(warning),
            critical: Some(critical),
            comparison: Comparison::Below,
        }
    }

    fn breaches(&self, value: f64, level: f64) -> bool {
        match self.comparison {
            Comparison::Above => value >= level,
            Comparison::Below => value <= level,
        }
    }

    /// 按阈值对样本值分级，未越限返回 None
    pub fn classify(&self, value: f64) -> Option<Severity> {
        if value.is_nan() {
            return None;
        }
        if let Some(critical) = self.critical {
            if self.breaches(value, critical) {
                return Some(Severity::Critical);
            }
        }
        if let Some(warning) = self.warning {
            if self.breaches(value, warning) {
                return Some(Severity::Warning);
            }
        }
        None
    }

    /// 某一级别对应的阈值
    pub fn level(&self, severity: Severity) -> Option<f64> {
        match severity {
            Severity::Critical => self.critical,
            Severity::Warning => self.warning,
            Severity::Info => None,
        }
    }

    /// 检查阈值配置是否自洽
    pub fn validate(&self) -> Result<(), String> {
        match (self.warning, self.critical) {
            (None, None) => Err("threshold defines neither warning nor critical level".to_string()),
            (Some(w), Some(c)) => {
                let ordered = match self.comparison {
                    Comparison::Above => w <= c,
                    Comparison::Below => w >= c,
                };
                if ordered {
                    Ok(())
                } else {
                    Err(format!(
                        "warning level {} is beyond critical level {} for {:?} comparison",
                        w, c, self.comparison
                    ))
                }
            }
            _ => Ok(()),
        }
    }
}
