use chrono::{DateTime, Utc};
use netmon_alert::{Alert, Digest, DigestKind, Notification, Transition};
use netmon_types::Severity;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write;

/// 渠道无关的通知消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyMessage {
    /// 标题
    pub title: String,

    /// 内容
    pub content: String,

    /// 级别
    pub severity: Severity,

    /// 告警 ID + 变化类型，摘要为 `digest:<id>`
    pub idempotency_key: String,

    /// 受影响的业务服务
    pub services: Vec<String>,

    /// 业务服务联系人，邮件渠道追加为收件人
    pub recipients: Vec<String>,

    /// 时间
    pub timestamp: DateTime<Utc>,

    /// 额外数据
    pub metadata: Option<serde_json::Value>,
}

impl NotifyMessage {
    /// 把通知渲染成消息，`contacts` 为业务服务名 -> 联系人
    pub fn render(notification: &Notification, contacts: &HashMap<String, Vec<String>>) -> Self {
        let services = notification.affected_services();
        let mut recipients: Vec<String> = Vec::new();
        for service in &services {
            for contact in contacts.get(service).into_iter().flatten() {
                if !recipients.contains(contact) {
                    recipients.push(contact.clone());
                }
            }
        }

        let (title, content, timestamp, metadata) = match notification {
            Notification::Alert {
                alert,
                transition,
                correlated,
            } => render_alert(alert, *transition, *correlated),
            Notification::Digest(digest) => render_digest(digest),
        };

        Self {
            title,
            content,
            severity: notification.severity(),
            idempotency_key: notification.idempotency_key(),
            services,
            recipients,
            timestamp,
            metadata: Some(metadata),
        }
    }
}

fn tag(severity: Severity) -> String {
    severity.as_str().to_uppercase()
}

fn render_alert(
    alert: &Alert,
    transition: Transition,
    correlated: usize,
) -> (String, String, DateTime<Utc>, serde_json::Value) {
    let title = format!(
        "[{}] {} {}: {}",
        tag(alert.severity),
        transition.as_str().to_uppercase(),
        alert.device_id,
        alert.signature
    );

    let mut content = String::new();
    let _ = writeln!(content, "{}", alert.message);
    let _ = writeln!(content);
    let _ = writeln!(content, "Device: {}", alert.device_id);
    let _ = writeln!(content, "Condition: {}", alert.signature);
    if let Some(value) = alert.value {
        match alert.threshold {
            Some(threshold) => {
                let _ = writeln!(content, "Value: {} (threshold {})", value, threshold);
            }
            None => {
                let _ = writeln!(content, "Value: {}", value);
            }
        }
    }
    if alert.occurrences > 1 {
        let _ = writeln!(content, "Occurrences: {}", alert.occurrences);
    }
    if !alert.affected_services.is_empty() {
        let _ = writeln!(content, "Affected services: {}", alert.affected_services.join(", "));
    }
    if correlated > 0 {
        let _ = writeln!(content, "Correlated alerts: {}", correlated);
    }
    if transition != Transition::Resolved {
        if !alert.resolution_steps.is_empty() {
            let _ = writeln!(content, "Resolution steps:");
            for step in &alert.resolution_steps {
                let _ = writeln!(content, "  {}", step);
            }
        }
        if !alert.escalation_path.is_empty() {
            let _ = writeln!(content, "Escalation path: {}", alert.escalation_path.join(" -> "));
        }
    }
    let _ = write!(content, "Raised at: {}", alert.created_at.to_rfc3339());
    if let (Transition::Resolved, Some(at)) = (transition, alert.resolved_at) {
        let _ = write!(content, "\nResolved at: {}", at.to_rfc3339());
    }

    let timestamp = match transition {
        Transition::Resolved => alert.resolved_at.unwrap_or(alert.updated_at),
        _ => alert.updated_at,
    };

    let metadata = serde_json::json!({
        "alert_id": alert.id,
        "device_id": alert.device_id,
        "condition": alert.signature.as_str(),
        "transition": transition.as_str(),
        "correlation_key": alert.correlation_key,
        "escalation_path": alert.escalation_path,
    });

    (title, content, timestamp, metadata)
}

fn render_digest(digest: &Digest) -> (String, String, DateTime<Utc>, serde_json::Value) {
    let title = match &digest.kind {
        DigestKind::Correlation { root_alert_id, .. } => format!(
            "[{}] {} correlated alerts (root {})",
            tag(digest.severity),
            digest.len(),
            root_alert_id
        ),
        DigestKind::RateLimited => format!(
            "[{}] {} deferred alerts (hourly limit reached)",
            tag(digest.severity),
            digest.len()
        ),
    };

    let mut content = String::new();
    for entry in &digest.entries {
        let alert = &entry.alert;
        let _ = writeln!(
            content,
            "- {} {} {} {}: {}",
            alert.created_at.format("%H:%M:%S"),
            entry.transition,
            alert.device_id,
            alert.signature,
            alert.message
        );
    }

    let metadata = serde_json::json!({
        "digest_id": digest.id,
        "kind": digest.kind,
        "count": digest.len(),
    });

    (title, content.trim_end().to_string(), digest.created_at, metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use netmon_alert::{ConditionSignature, DigestEntry};

    fn alert(device: &str, services: &[&str]) -> Alert {
        let mut alert = Alert::new(
            device,
            ConditionSignature::metric("cpu_utilization"),
            Severity::Critical,
            "cpu_utilization 97 >= 90",
            Utc::now(),
            Duration::seconds(300),
        );
        alert.value = Some(97.0);
        alert.threshold = Some(90.0);
        alert.affected_services = services.iter().map(|s| s.to_string()).collect();
        alert
    }

    #[test]
    fn test_render_alert() {
        let a = alert("core-1", &["payments"]);
        let mut contacts = HashMap::new();
        contacts.insert("payments".to_string(), vec!["pay-oncall@example.com".to_string()]);

        let message = NotifyMessage::render(&Notification::alert(a.clone(), Transition::Raised), &contacts);

        assert_eq!(message.title, "[CRITICAL] RAISED core-1: metric:cpu_utilization");
        assert!(message.content.contains("Value: 97 (threshold 90)"));
        assert!(message.content.contains("Affected services: payments"));
        assert_eq!(message.recipients, vec!["pay-oncall@example.com".to_string()]);
        assert_eq!(message.idempotency_key, format!("{}:raised", a.id));
    }

    #[test]
    fn test_render_runbook() {
        let mut a = alert("core-1", &[]);
        a.resolution_steps = vec!["1. Check fan tray".to_string(), "2. Reseat line card".to_string()];
        a.escalation_path = vec!["NOC".to_string(), "Network On-call".to_string()];

        let raised = NotifyMessage::render(&Notification::alert(a.clone(), Transition::Raised), &HashMap::new());
        assert!(raised.content.contains("Resolution steps:\n  1. Check fan tray\n  2. Reseat line card\n"));
        assert!(raised.content.contains("Escalation path: NOC -> Network On-call"));
        let metadata = raised.metadata.unwrap();
        assert_eq!(metadata["escalation_path"][1], "Network On-call");

        // 恢复通知不再附带处置信息
        let resolved = NotifyMessage::render(&Notification::alert(a, Transition::Resolved), &HashMap::new());
        assert!(!resolved.content.contains("Resolution steps"));
    }

    #[test]
    fn test_render_digest() {
        let entries = ["acc-1", "acc-2", "acc-3"]
            .iter()
            .map(|d| DigestEntry {
                alert: alert(d, &[]),
                transition: Transition::Raised,
            })
            .collect();
        let digest = Digest::new(
            DigestKind::Correlation {
                group_id: "g1".into(),
                root_alert_id: "root".into(),
            },
            Severity::Warning,
            entries,
            Utc::now(),
        );

        let message = NotifyMessage::render(&Notification::Digest(digest), &HashMap::new());

        assert_eq!(message.title, "[WARNING] 3 correlated alerts (root root)");
        assert_eq!(message.content.lines().count(), 3);
        assert!(message.recipients.is_empty());
        assert!(message.idempotency_key.starts_with("digest:"));
    }
}
