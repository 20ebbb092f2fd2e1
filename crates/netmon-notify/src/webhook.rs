use crate::channel::Channel;
use crate::error::{ChannelError, Result};
use crate::message::NotifyMessage;
use async_trait::async_trait;
use netmon_config::{CredentialResolver, WebhookChannelConfig};
use netmon_types::Severity;
use std::collections::HashMap;
use std::time::Duration;

/// 聊天 Webhook 渠道（Slack 兼容的 attachments 负载）
pub struct WebhookChannel {
    url: String,
    token: Option<String>,
    headers: HashMap<String, String>,
    client: reqwest::Client,
    enabled: bool,
}

impl WebhookChannel {
    pub fn from_config(
        config: &WebhookChannelConfig,
        resolver: &dyn CredentialResolver,
        timeout: Duration,
    ) -> Result<Self> {
        if config.url.trim().is_empty() {
            return Err(ChannelError::NotConfigured("webhook: empty url".to_string()));
        }

        let token = match &config.token_env {
            Some(reference) => Some(resolver.resolve(reference).ok_or_else(|| {
                ChannelError::NotConfigured(format!(
                    "webhook: credential reference {} is not set",
                    reference
                ))
            })?),
            None => None,
        };

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChannelError::NotConfigured(format!("webhook: {}", e)))?;

        Ok(Self {
            url: config.url.clone(),
            token,
            headers: config.headers.clone(),
            client,
            enabled: true,
        })
    }

    fn build_message(&self, message: &NotifyMessage) -> serde_json::Value {
        let color = match message.severity {
            Severity::Info => "good",
            Severity::Warning => "warning",
            Severity::Critical => "danger",
        };

        let mut fields = vec![
            serde_json::json!({
                "title": "Severity",
                "value": message.severity.as_str(),
                "short": true
            }),
            serde_json::json!({
                "title": "Time",
                "value": message.timestamp.to_rfc3339(),
                "short": true
            }),
        ];
        if !message.services.is_empty() {
            fields.push(serde_json::json!({
                "title": "Affected services",
                "value": message.services.join(", "),
                "short": false
            }));
        }

        serde_json::json!({
            "text": message.title,
            "attachments": [{
                "color": color,
                "title": message.title,
                "text": message.content,
                "fields": fields,
                "footer": message.idempotency_key
            }]
        })
    }
}

#[async_trait]
impl Channel for WebhookChannel {
    async fn deliver(&self, message: &NotifyMessage) -> Result<()> {
        let body = self.build_message(message);

        let mut request = self
            .client
            .post(&self.url)
            .header("Idempotency-Key", &message.idempotency_key);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                ChannelError::Timeout
            } else {
                ChannelError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let reason = response.text().await.unwrap_or_default();
            Err(ChannelError::Rejected {
                status: status.as_u16(),
                reason,
            })
        }
    }

    fn name(&self) -> &str {
        "webhook"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}
