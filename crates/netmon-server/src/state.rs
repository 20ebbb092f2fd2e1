use async_trait::async_trait;
use netmon_alert::{AlertEngine, EngineSnapshot};
use netmon_shutdown::{Checkpoint, CheckpointError};
use netmon_topology::{TopologyDiff, TopologyListener, TopologySnapshot, TopologyView};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

/// 状态目录中的检查点文件
pub struct StateFiles {
    topology: Checkpoint,
    alerts: Checkpoint,
}

impl StateFiles {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        let dir = state_dir.as_ref();
        Self {
            topology: Checkpoint::new(dir.join("topology.json")),
            alerts: Checkpoint::new(dir.join("alerts.json")),
        }
    }

    /// 读取上次保存的拓扑；文件不存在时返回空视图
    pub async fn load_topology(&self) -> Result<TopologyView, CheckpointError> {
        match self.topology.load::<TopologySnapshot>().await? {
            Some(snapshot) => {
                info!(
                    version = snapshot.version(),
                    edges = snapshot.edge_count(),
                    "Topology restored from checkpoint"
                );
                Ok(TopologyView::from_snapshot(snapshot))
            }
            None => Ok(TopologyView::new()),
        }
    }

    pub async fn save_topology(&self, snapshot: &TopologySnapshot) -> Result<(), CheckpointError> {
        self.topology.save(snapshot).await
    }

    /// 恢复告警引擎状态
    pub async fn restore_alerts(&self, engine: &AlertEngine) -> Result<(), CheckpointError> {
        if let Some(snapshot) = self.alerts.load::<EngineSnapshot>().await? {
            info!(
                open = snapshot.open.len(),
                history = snapshot.history.len(),
                "Alert state restored from checkpoint"
            );
            engine.restore(snapshot).await;
        }
        Ok(())
    }

    pub async fn save_alerts(&self, engine: &AlertEngine) -> Result<(), CheckpointError> {
        let snapshot = engine.snapshot().await;
        self.alerts.save(&snapshot).await?;
        debug!(open = snapshot.open.len(), "Alert state checkpointed");
        Ok(())
    }

    /// 保存全部状态，返回失败的文件
    pub async fn save_all(&self, engine: &AlertEngine, view: &TopologyView) -> Vec<String> {
        let mut failed = Vec::new();
        if let Err(e) = self.save_alerts(engine).await {
            error!(error = %e, "Failed to checkpoint alert state");
            failed.push(self.alerts.path().display().to_string());
        }
        if let Err(e) = self.save_topology(&*view.snapshot().await).await {
            error!(error = %e, "Failed to checkpoint topology");
            failed.push(self.topology.path().display().to_string());
        }
        failed
    }
}

/// 拓扑变化后立即写检查点
pub struct TopologyCheckpointer {
    files: Arc<StateFiles>,
}

impl TopologyCheckpointer {
    pub fn new(files: Arc<StateFiles>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl TopologyListener for TopologyCheckpointer {
    async fn on_topology_changed(&self, snapshot: Arc<TopologySnapshot>, _diff: &TopologyDiff) {
        crate::metrics::record_topology(snapshot.version(), snapshot.edge_count());
        if let Err(e) = self.files.save_topology(&snapshot).await {
            error!(error = %e, "Failed to checkpoint topology");
        }
    }
}
