use crate::channel::Channel;
use crate::error::{ChannelError, Result};
use crate::message::NotifyMessage;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use netmon_config::{CredentialResolver, EmailChannelConfig};
use netmon_types::Severity;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// SMTP 邮件渠道
pub struct EmailChannel {
    from: Mailbox,
    recipients: HashMap<Severity, Vec<String>>,
    transport: AsyncSmtpTransport<Tokio1Executor>,
    enabled: bool,
}

impl EmailChannel {
    pub fn from_config(
        config: &EmailChannelConfig,
        resolver: &dyn CredentialResolver,
        timeout: Duration,
    ) -> Result<Self> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| ChannelError::InvalidAddress(format!("{}: {}", config.from, e)))?;

        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
                .map_err(|e| ChannelError::NotConfigured(format!("email: {}", e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        };
        let mut builder = builder.port(config.smtp_port).timeout(Some(timeout));

        if let Some(username) = &config.username {
            let password = match &config.password_env {
                Some(reference) => resolver.resolve(reference).ok_or_else(|| {
                    ChannelError::NotConfigured(format!(
                        "email: credential reference {} is not set",
                        reference
                    ))
                })?,
                None => String::new(),
            };
            builder = builder.credentials(Credentials::new(username.clone(), password));
        }

        let recipients = Severity::ALL
            .iter()
            .map(|severity| (*severity, config.recipients_for(*severity)))
            .collect();

        Ok(Self {
            from,
            recipients,
            transport: builder.build(),
            enabled: true,
        })
    }

    /// 级别收件人 + 业务服务联系人（去重）
    fn recipients_for(&self, message: &NotifyMessage) -> Vec<String> {
        let mut all: Vec<String> = self
            .recipients
            .get(&message.severity)
            .cloned()
            .unwrap_or_default();
        for extra in &message.recipients {
            if !all.contains(extra) {
                all.push(extra.clone());
            }
        }
        all
    }

    fn build_email(&self, message: &NotifyMessage, recipients: &[String]) -> Result<Message> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(&message.title)
            .header(ContentType::TEXT_PLAIN);
        for recipient in recipients {
            let mailbox: Mailbox = recipient
                .parse()
                .map_err(|e| ChannelError::InvalidAddress(format!("{}: {}", recipient, e)))?;
            builder = builder.to(mailbox);
        }

        builder
            .body(format!(
                "{}\n\nSeverity: {}\nTime: {}\nReference: {}",
                message.content,
                message.severity,
                message.timestamp.to_rfc3339(),
                message.idempotency_key
            ))
            .map_err(|e| ChannelError::Message(e.to_string()))
    }
}

#[async_trait]
impl Channel for EmailChannel {
    async fn deliver(&self, message: &NotifyMessage) -> Result<()> {
        let recipients = self.recipients_for(message);
        if recipients.is_empty() {
            return Err(ChannelError::NotConfigured(format!(
                "email: no recipients for {} alerts",
                message.severity
            )));
        }

        let email = self.build_email(message, &recipients)?;
        debug!(recipients = recipients.len(), title = %message.title, "Sending email");

        match self.transport.send(email).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_permanent() => Err(ChannelError::Permanent(e.to_string())),
            Err(e) => Err(ChannelError::Transport(e.to_string())),
        }
    }

    fn name(&self) -> &str {
        "email"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use netmon_config::StaticCredentialResolver;

    fn config() -> EmailChannelConfig {
        let mut recipients = HashMap::new();
        recipients.insert("critical".to_string(), vec!["noc@example.com".to_string()]);
        EmailChannelConfig {
            smtp_host: "localhost".into(),
            smtp_port: 2525,
            username: Some("netmon".into()),
            password_env: Some("SMTP_PASSWORD".into()),
            from: "netmon@example.com".into(),
            recipients,
            starttls: false,
        }
    }

    fn message(severity: Severity, extra: Vec<String>) -> NotifyMessage {
        NotifyMessage {
            title: "[CRITICAL] RAISED core-1: device_unreachable".into(),
            content: "core-1 unreachable".into(),
            severity,
            idempotency_key: "a1:raised".into(),
            services: vec![],
            recipients: extra,
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn test_missing_credential_is_config_error() {
        let result = EmailChannel::from_config(
            &config(),
            &StaticCredentialResolver::new(),
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(ChannelError::NotConfigured(_))));
    }

    #[tokio::test]
    async fn test_recipients_merge_service_contacts() {
        let resolver = StaticCredentialResolver::new().with("SMTP_PASSWORD", "secret");
        let channel = EmailChannel::from_config(&config(), &resolver, Duration::from_secs(5)).unwrap();

        let msg = message(
            Severity::Critical,
            vec!["noc@example.com".into(), "pay@example.com".into()],
        );
        assert_eq!(
            channel.recipients_for(&msg),
            vec!["noc@example.com".to_string(), "pay@example.com".to_string()]
        );

        let email = channel.build_email(&msg, &channel.recipients_for(&msg));
        assert!(email.is_ok());
    }

    #[tokio::test]
    async fn test_no_recipients_fails_without_sending() {
        let resolver = StaticCredentialResolver::new().with("SMTP_PASSWORD", "secret");
        let channel = EmailChannel::from_config(&config(), &resolver, Duration::from_secs(5)).unwrap();

        let err = channel.deliver(&message(Severity::Info, vec![])).await.unwrap_err();
        assert!(matches!(err, ChannelError::NotConfigured(_)));
        assert!(!err.is_transient());
    }
}
