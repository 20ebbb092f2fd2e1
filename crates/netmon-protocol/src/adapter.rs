use crate::{AdapterError, DiscoveryReport, Result};
use async_trait::async_trait;
use netmon_types::{Device, MetricSample, Protocol};

/// 协议适配器
///
/// 每个协议族一个实现。`poll` 返回一次轮询得到的全部样本；
/// 能读取 L2/L3 表的适配器同时实现 `discover` 供拓扑发现使用。
#[async_trait]
pub trait Adapter: Send + Sync {
    /// 适配器处理的协议
    fn protocol(&self) -> Protocol;

    /// 采集一次指标
    async fn poll(&self, device: &Device) -> Result<Vec<MetricSample>>;

    /// 是否支持拓扑发现
    fn supports_discovery(&self) -> bool {
        false
    }

    /// 读取 ARP、网桥转发表和路由表
    async fn discover(&self, device: &Device) -> Result<DiscoveryReport> {
        Err(AdapterError::Unsupported(format!(
            "{} adapter cannot discover neighbors of {}",
            self.protocol(),
            device.id
        )))
    }
}
