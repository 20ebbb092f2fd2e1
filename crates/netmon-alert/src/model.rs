use chrono::{DateTime, Utc};
use netmon_types::Severity;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 告警状态
///
/// `New → Active → (Acknowledged) → Resolved`；
/// 去重命中时 `New → Suppressed`（告警成立但不单独通知）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    New,
    Active,
    Acknowledged,
    Suppressed,
    Resolved,
}

impl AlertState {
    pub fn is_open(&self) -> bool {
        !matches!(self, AlertState::Resolved)
    }
}

/// 告警的通知去向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// 尚未决定
    Pending,
    /// 已单独通知
    Sent,
    /// 作为关联组成员，在组关闭时进入摘要
    Grouped,
    /// 超出每小时上限，进入整点摘要
    Deferred,
    /// 去重窗口内已通知过同一条件，不再通知
    Withheld,
}

/// 条件签名：同一设备上同一签名最多只有一条未恢复告警
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionSignature(String);

impl ConditionSignature {
    pub fn new(signature: impl Into<String>) -> Self {
        Self(signature.into())
    }

    pub fn metric(name: &str) -> Self {
        Self(format!("metric:{}", name))
    }

    pub fn device_unreachable() -> Self {
        Self("device_unreachable".to_string())
    }

    pub fn link_down(peer: &str) -> Self {
        Self(format!("link_down:{}", peer))
    }

    pub fn link_up(peer: &str) -> Self {
        Self(format!("link_up:{}", peer))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 处置手册中的条件名：指标签名取指标名，其余取冒号前的部分
    pub fn condition(&self) -> &str {
        match self.0.strip_prefix("metric:") {
            Some(metric) => metric,
            None => self.0.split(':').next().unwrap_or(&self.0),
        }
    }
}

impl fmt::Display for ConditionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 告警
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub device_id: String,
    pub signature: ConditionSignature,
    pub severity: Severity,
    pub state: AlertState,
    pub message: String,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub threshold: Option<f64>,
    /// 所属关联组
    #[serde(default)]
    pub correlation_key: Option<String>,
    pub dedup_expires_at: DateTime<Utc>,
    pub escalation_level: u32,
    /// 去重窗口内折叠的越限次数（含首次）
    pub occurrences: u32,
    pub delivery: Delivery,
    /// 依赖该设备的业务服务，按优先级排列
    #[serde(default)]
    pub affected_services: Vec<String>,
    #[serde(default)]
    pub resolution_steps: Vec<String>,
    /// 当前级别的升级路径，升级时随之更新
    #[serde(default)]
    pub escalation_path: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub acknowledged_by: Option<String>,
    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolution_notes: Option<String>,
}

impl Alert {
    pub fn new(
        device_id: impl Into<String>,
        signature: ConditionSignature,
        severity: Severity,
        message: impl Into<String>,
        at: DateTime<Utc>,
        dedup_window: chrono::Duration,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            device_id: device_id.into(),
            signature,
            severity,
            state: AlertState::New,
            message: message.into(),
            value: None,
            threshold: None,
            correlation_key: None,
            dedup_expires_at: at + dedup_window,
            escalation_level: 0,
            occurrences: 1,
            delivery: Delivery::Pending,
            affected_services: Vec::new(),
            resolution_steps: Vec::new(),
            escalation_path: Vec::new(),
            created_at: at,
            updated_at: at,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_at: None,
            resolution_notes: None,
        }
    }

    pub fn with_reading(mut self, value: Option<f64>, threshold: Option<f64>) -> Self {
        self.value = value;
        self.threshold = threshold;
        self
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    /// 去重窗口内的重复越限
    pub(crate) fn fold(&mut self, value: Option<f64>, message: String, at: DateTime<Utc>) {
        self.occurrences += 1;
        self.value = value.or(self.value);
        self.message = message;
        if at > self.updated_at {
            self.updated_at = at;
        }
    }

    /// 升级到更高级别，确认状态随之清除
    pub(crate) fn escalate(&mut self, severity: Severity, threshold: Option<f64>, at: DateTime<Utc>) {
        self.severity = severity;
        self.threshold = threshold.or(self.threshold);
        self.escalation_level += 1;
        self.state = AlertState::Active;
        self.acknowledged_by = None;
        self.acknowledged_at = None;
        if at > self.updated_at {
            self.updated_at = at;
        }
    }

    pub(crate) fn close(&mut self, at: DateTime<Utc>, notes: Option<String>) {
        self.state = AlertState::Resolved;
        self.resolved_at = Some(at);
        self.resolution_notes = notes;
        if at > self.updated_at {
            self.updated_at = at;
        }
    }
}
