use crate::error::Result;
use crate::message::NotifyMessage;
use async_trait::async_trait;

/// 通知渠道 trait
#[async_trait]
pub trait Channel: Send + Sync {
    /// 投递一条消息；失败时由分发器决定是否重试
    async fn deliver(&self, message: &NotifyMessage) -> Result<()>;

    /// 渠道名称，与路由配置中的名称一致
    fn name(&self) -> &str;

    /// 是否启用
    fn is_enabled(&self) -> bool {
        true
    }
}
