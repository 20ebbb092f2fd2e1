use crate::model::Alert;
use chrono::{DateTime, Utc};
use netmon_types::Severity;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 需要通知的告警状态变化
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Raised,
    Escalated,
    Resolved,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Raised => "raised",
            Transition::Escalated => "escalated",
            Transition::Resolved => "resolved",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 摘要来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DigestKind {
    /// 关联组关闭时汇总未单独通知的成员
    Correlation {
        group_id: String,
        root_alert_id: String,
    },
    /// 超出每小时上限被推迟的通知
    RateLimited,
}

/// 摘要中的一条记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestEntry {
    pub alert: Alert,
    pub transition: Transition,
}

/// 摘要通知
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Digest {
    pub id: String,
    pub kind: DigestKind,
    /// 路由所用级别
    pub severity: Severity,
    pub entries: Vec<DigestEntry>,
    pub created_at: DateTime<Utc>,
}

impl Digest {
    pub fn new(kind: DigestKind, severity: Severity, entries: Vec<DigestEntry>, at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            severity,
            entries,
            created_at: at,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 发往通知分发器的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "notification", rename_all = "snake_case")]
pub enum Notification {
    Alert {
        alert: Alert,
        transition: Transition,
        /// 同一关联组中被归并的其他告警数
        #[serde(default)]
        correlated: usize,
    },
    Digest(Digest),
}

impl Notification {
    pub fn alert(alert: Alert, transition: Transition) -> Self {
        Notification::Alert {
            alert,
            transition,
            correlated: 0,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Notification::Alert { alert, .. } => alert.severity,
            Notification::Digest(digest) => digest.severity,
        }
    }

    /// 幂等键：同一告警的同一种变化只投递一次
    pub fn idempotency_key(&self) -> String {
        match self {
            Notification::Alert {
                alert, transition, ..
            } => format!("{}:{}", alert.id, transition),
            Notification::Digest(digest) => format!("digest:{}", digest.id),
        }
    }

    pub fn is_digest(&self) -> bool {
        matches!(self, Notification::Digest(_))
    }

    /// 涉及的业务服务（去重，保持首次出现顺序）
    pub fn affected_services(&self) -> Vec<String> {
        let mut services: Vec<String> = Vec::new();
        let alerts: Vec<&Alert> = match self {
            Notification::Alert { alert, .. } => vec![alert],
            Notification::Digest(digest) => digest.entries.iter().map(|e| &e.alert).collect(),
        };
        for alert in alerts {
            for service in &alert.affected_services {
                if !services.contains(service) {
                    services.push(service.clone());
                }
            }
        }
        services
    }
}
