use crate::{Adapter, AdapterError, CommandRunner, Result, VendorProfiles};
use async_trait::async_trait;
use chrono::Utc;
use netmon_types::{Device, MetricSample, Protocol};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// ssh 客户端自身出错（连接失败、认证失败）时的退出码
const SSH_CONNECTION_ERROR: i32 = 255;

/// 提取输出中的第一个数字，例如 `CPU utilization for five seconds: 5%/0%` -> 5
pub fn first_number(output: &str) -> Option<f64> {
    let start = output.find(|c: char| c.is_ascii_digit())?;
    let rest = &output[start..];
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    rest[..end]
        .trim_end_matches('.')
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// SSH 适配器（基于 OpenSSH 客户端，使用密钥认证）
pub struct SshAdapter {
    runner: Arc<dyn CommandRunner>,
    profiles: Arc<VendorProfiles>,
    timeout: Duration,
}

impl SshAdapter {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        profiles: Arc<VendorProfiles>,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            profiles,
            timeout,
        }
    }

    fn args(&self, device: &Device, command: &str) -> Result<Vec<String>> {
        let credentials = device
            .credentials
            .as_ref()
            .ok_or_else(|| AdapterError::MissingCredentials(device.id.clone()))?;
        let username = credentials
            .username
            .as_ref()
            .ok_or_else(|| AdapterError::MissingCredentials(format!("{} username", device.id)))?;
        let connect_timeout = self.timeout.as_secs_f64().ceil().max(1.0) as u64;

        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", connect_timeout),
        ];
        if let Some(key) = &credentials.ssh_key_file {
            args.push("-i".to_string());
            args.push(key.clone());
        }
        if let Some(port) = credentials.ssh_port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        args.push(format!("{}@{}", username, device.address));
        args.push(command.to_string());
        Ok(args)
    }
}

#[async_trait]
impl Adapter for SshAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Ssh
    }

    async fn poll(&self, device: &Device) -> Result<Vec<MetricSample>> {
        let profile = self
            .profiles
            .for_vendor(&device.vendor)
            .ok_or_else(|| AdapterError::Unsupported(format!("no SSH profile for {}", device.vendor)))?;
        if profile.ssh.is_empty() {
            return Err(AdapterError::Unsupported(format!(
                "SSH profile for {} has no commands",
                device.vendor
            )));
        }

        let mut samples = Vec::new();
        for metric in &profile.ssh {
            let args = self.args(device, &metric.command)?;
            let output = self.runner.run("ssh", &args).await?;

            if output.status == Some(SSH_CONNECTION_ERROR) {
                return Err(AdapterError::Unreachable(output.stderr.trim().to_string()));
            }
            if !output.success() {
                warn!(
                    device_id = %device.id,
                    metric = %metric.metric,
                    status = ?output.status,
                    "SSH command failed, metric skipped"
                );
                continue;
            }

            match first_number(&output.stdout) {
                Some(value) => {
                    let value = if metric.invert_percent {
                        100.0 - value
                    } else {
                        value
                    };
                    samples.push(MetricSample::new(&device.id, &metric.metric, value).at(Utc::now()));
                }
                None => debug!(
                    device_id = %device.id,
                    metric = %metric.metric,
                    "No numeric value in SSH output"
                ),
            }
        }

        if samples.is_empty() {
            return Err(AdapterError::malformed(format!(
                "no metrics parsed from SSH output for {}",
                device.id
            )));
        }
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::scripted::ScriptedRunner;
    use crate::CommandOutput;
    use netmon_types::Credentials;

    fn device(vendor: &str) -> Device {
        Device::new("rtr1", "10.0.0.1".parse().unwrap())
            .with_vendor(vendor)
            .with_protocols(vec![Protocol::Ssh])
            .with_credentials(Credentials {
                username: Some("netops".to_string()),
                ssh_key_file: Some("/etc/netmon/id_ed25519".to_string()),
                ssh_port: Some(2222),
                ..Default::default()
            })
    }

    #[test]
    fn test_first_number() {
        assert_eq!(
            first_number("CPU utilization for five seconds: 5%/0%; one minute: 6%"),
            Some(5.0)
        );
        assert_eq!(first_number("Idle                       93 percent"), Some(93.0));
        assert_eq!(first_number("42.5"), Some(42.5));
        assert_eq!(first_number("load 1."), Some(1.0));
        assert_eq!(first_number("no digits here"), None);
    }

    #[tokio::test]
    async fn test_cisco_cpu() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_ok(0, "CPU utilization for five seconds: 12%/1%; one minute: 10%\n");
        let adapter = SshAdapter::new(runner.clone(), Arc::new(VendorProfiles::builtin()), Duration::from_secs(10));

        let samples = adapter.poll(&device("cisco")).await.unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].metric, "cpu_usage");
        assert_eq!(samples[0].value, 12.0);

        let calls = runner.calls.lock().unwrap();
        let args = &calls[0].1;
        assert!(args.contains(&"netops@10.0.0.1".to_string()));
        assert!(args.contains(&"2222".to_string()));
        assert!(args.contains(&"/etc/netmon/id_ed25519".to_string()));
    }

    #[tokio::test]
    async fn test_juniper_idle_is_inverted() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_ok(0, "    Idle                           93 percent\n");
        let adapter = SshAdapter::new(runner, Arc::new(VendorProfiles::builtin()), Duration::from_secs(10));

        let samples = adapter.poll(&device("juniper")).await.unwrap();
        assert_eq!(samples[0].value, 7.0);
    }

    #[tokio::test]
    async fn test_connection_error_is_unreachable() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_output(CommandOutput {
            status: Some(255),
            stdout: String::new(),
            stderr: "ssh: connect to host 10.0.0.1 port 2222: Connection timed out".to_string(),
        });
        let adapter = SshAdapter::new(runner, Arc::new(VendorProfiles::builtin()), Duration::from_secs(10));

        let err = adapter.poll(&device("cisco")).await.unwrap_err();
        assert!(matches!(err, AdapterError::Unreachable(_)));
    }
}
