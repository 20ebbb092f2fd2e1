use crate::graph::TopologySnapshot;
use std::sync::Arc;
use tokio::sync::RwLock;

/// 拓扑快照的只读句柄
///
/// 读者拿到的是某一版本的完整快照；映射器整体替换，不存在半更新状态。
#[derive(Clone)]
pub struct TopologyView {
    current: Arc<RwLock<Arc<TopologySnapshot>>>,
}

impl TopologyView {
    pub fn new() -> Self {
        Self::from_snapshot(TopologySnapshot::empty())
    }

    pub fn from_snapshot(snapshot: TopologySnapshot) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(snapshot))),
        }
    }

    pub async fn snapshot(&self) -> Arc<TopologySnapshot> {
        self.current.read().await.clone()
    }

    pub async fn publish(&self, snapshot: TopologySnapshot) -> Arc<TopologySnapshot> {
        let snapshot = Arc::new(snapshot);
        *self.current.write().await = snapshot.clone();
        snapshot
    }

    pub async fn version(&self) -> u64 {
        self.current.read().await.version()
    }
}

impl Default for TopologyView {
    fn default() -> Self {
        Self::new()
    }
}
