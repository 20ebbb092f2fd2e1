use crate::{Adapter, AdapterError, CommandRunner, Result};
use async_trait::async_trait;
use chrono::Utc;
use netmon_types::{Device, MetricSample, Protocol};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// ping 汇总结果
#[derive(Debug, Clone, PartialEq)]
pub struct PingSummary {
    pub transmitted: u32,
    pub received: u32,
    pub loss_percent: f64,
    pub avg_rtt_ms: Option<f64>,
}

/// 解析 iputils / busybox ping 的汇总输出
pub fn parse_ping_output(output: &str) -> Result<PingSummary> {
    let mut summary: Option<PingSummary> = None;
    let mut avg_rtt_ms = None;

    for line in output.lines() {
        let line = line.trim();
        if line.contains("packet loss") {
            summary = Some(parse_loss_line(line)?);
        } else if line.contains("min/avg/max") {
            let values = line
                .split('=')
                .nth(1)
                .ok_or_else(|| AdapterError::malformed(format!("rtt line: {}", line)))?;
            let avg = values
                .trim()
                .split('/')
                .nth(1)
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|v| v.is_finite())
                .ok_or_else(|| AdapterError::malformed(format!("rtt line: {}", line)))?;
            avg_rtt_ms = Some(avg);
        }
    }

    let mut summary =
        summary.ok_or_else(|| AdapterError::malformed("ping output has no packet loss summary"))?;
    summary.avg_rtt_ms = avg_rtt_ms;
    Ok(summary)
}

fn parse_loss_line(line: &str) -> Result<PingSummary> {
    // "4 packets transmitted, 3 received, 25% packet loss, time 3004ms"
    let mut transmitted = None;
    let mut received = None;
    let mut loss = None;

    for part in line.split(',') {
        let part = part.trim();
        let first = part.split_whitespace().next().unwrap_or_default();
        if part.ends_with("transmitted") {
            transmitted = first.parse::<u32>().ok();
        } else if part.contains("received") {
            received = first.parse::<u32>().ok();
        } else if part.contains("packet loss") {
            loss = first
                .trim_end_matches('%')
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite());
        }
    }

    match (transmitted, received, loss) {
        (Some(transmitted), Some(received), Some(loss_percent)) => Ok(PingSummary {
            transmitted,
            received,
            loss_percent,
            avg_rtt_ms: None,
        }),
        _ => Err(AdapterError::malformed(format!("packet loss line: {}", line))),
    }
}

/// ICMP 适配器
pub struct PingAdapter {
    runner: Arc<dyn CommandRunner>,
    count: u32,
    timeout: Duration,
}

impl PingAdapter {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self {
            runner,
            count: 3,
            timeout,
        }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count.max(1);
        self
    }

    fn args(&self, device: &Device) -> Vec<String> {
        let wait_secs = self.timeout.as_secs_f64().ceil().max(1.0) as u64;
        vec![
            "-n".to_string(),
            "-q".to_string(),
            "-c".to_string(),
            self.count.to_string(),
            "-W".to_string(),
            wait_secs.to_string(),
            device.address.to_string(),
        ]
    }
}

#[async_trait]
impl Adapter for PingAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Icmp
    }

    async fn poll(&self, device: &Device) -> Result<Vec<MetricSample>> {
        let output = self.runner.run("ping", &self.args(device)).await?;

        // 全部丢包时 ping 返回 1，但汇总行仍然可以解析
        let summary = match parse_ping_output(&output.stdout) {
            Ok(summary) => summary,
            Err(_) if !output.success() => {
                return Err(AdapterError::CommandFailed {
                    program: "ping".to_string(),
                    status: output.status,
                    stderr: output.stderr.trim().to_string(),
                });
            }
            Err(e) => return Err(e),
        };

        if summary.received == 0 {
            return Err(AdapterError::Unreachable(format!(
                "{} of {} echo requests lost",
                summary.transmitted, summary.transmitted
            )));
        }

        let now = Utc::now();
        let mut samples =
            vec![MetricSample::new(&device.id, "packet_loss", summary.loss_percent).at(now)];
        if let Some(avg) = summary.avg_rtt_ms {
            samples.push(MetricSample::new(&device.id, "latency_ms", avg).at(now));
        }

        debug!(device_id = %device.id, loss = summary.loss_percent, rtt = ?summary.avg_rtt_ms, "Ping completed");
        Ok(samples)
    }
}
