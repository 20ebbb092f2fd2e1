use async_trait::async_trait;
use chrono::{DateTime, Utc};
use netmon_types::{Device, MetricSample};

/// 轮询结果的接收方（写入指标库并送入告警评估）
#[async_trait]
pub trait PollObserver: Send + Sync {
    /// 一次成功轮询得到的样本
    async fn on_samples(&self, device: &Device, samples: Vec<MetricSample>);

    /// 重试耗尽，设备不可达
    async fn on_unreachable(&self, device: &Device, reason: &str, at: DateTime<Utc>);

    /// 之前不可达的设备恢复
    async fn on_recovered(&self, device: &Device, at: DateTime<Utc>);
}
