use crate::state::StateFiles;
use async_trait::async_trait;
use chrono::Utc;
use netmon_alert::{AlertEngine, EvaluationRouter};
use netmon_notify::Dispatcher;
use netmon_shutdown::{Resource, ResourceError};
use netmon_topology::TopologyView;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// 等待一组后台任务退出
///
/// 任务自行订阅关闭广播，这里只负责等待。
pub struct TaskGroup {
    name: String,
    priority: u32,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskGroup {
    pub fn new(name: impl Into<String>, priority: u32) -> Self {
        Self {
            name: name.into(),
            priority,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub async fn push(&self, handle: JoinHandle<()>) {
        self.handles.lock().await.push(handle);
    }
}

#[async_trait]
impl Resource for TaskGroup {
    async fn cleanup(&self) -> Result<(), ResourceError> {
        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        let mut failed = 0;
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(group = %self.name, error = %e, "Background task ended abnormally");
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(ResourceError::CleanupFailed(format!(
                "{} task(s) in {} panicked",
                failed, self.name
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u32 {
        self.priority
    }
}

/// 排空评估流水线并冲刷待发摘要
pub struct EvaluationResource {
    router: Arc<EvaluationRouter>,
    engine: Arc<AlertEngine>,
}

impl EvaluationResource {
    pub fn new(router: Arc<EvaluationRouter>, engine: Arc<AlertEngine>) -> Self {
        Self { router, engine }
    }
}

#[async_trait]
impl Resource for EvaluationResource {
    async fn cleanup(&self) -> Result<(), ResourceError> {
        self.router.shutdown().await;
        let flushed = self.engine.flush(Utc::now()).await;
        info!(flushed, "Pending digests flushed");
        Ok(())
    }

    fn name(&self) -> &str {
        "evaluation"
    }

    fn priority(&self) -> u32 {
        20
    }
}

/// 关闭分发器并等待已排队的通知投递完成
pub struct DispatcherResource {
    dispatcher: Arc<Dispatcher>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DispatcherResource {
    pub fn new(dispatcher: Arc<Dispatcher>, handle: JoinHandle<()>) -> Self {
        Self {
            dispatcher,
            handle: Mutex::new(Some(handle)),
        }
    }
}

#[async_trait]
impl Resource for DispatcherResource {
    async fn cleanup(&self) -> Result<(), ResourceError> {
        self.dispatcher.close();
        if let Some(handle) = self.handle.lock().await.take() {
            handle
                .await
                .map_err(|e| ResourceError::CleanupFailed(e.to_string()))?;
        }
        let health = self.dispatcher.health().snapshot();
        info!(
            delivered = health.delivered,
            failed = health.failed_deliveries,
            "Dispatcher drained"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "dispatcher"
    }

    fn priority(&self) -> u32 {
        30
    }
}

/// 退出前写最后一次检查点
pub struct CheckpointResource {
    files: Arc<StateFiles>,
    engine: Arc<AlertEngine>,
    view: TopologyView,
}

impl CheckpointResource {
    pub fn new(files: Arc<StateFiles>, engine: Arc<AlertEngine>, view: TopologyView) -> Self {
        Self {
            files,
            engine,
            view,
        }
    }
}

#[async_trait]
impl Resource for CheckpointResource {
    async fn cleanup(&self) -> Result<(), ResourceError> {
        let failed = self.files.save_all(&self.engine, &self.view).await;
        if failed.is_empty() {
            Ok(())
        } else {
            Err(ResourceError::CleanupFailed(format!(
                "failed to write {}",
                failed.join(", ")
            )))
        }
    }

    fn name(&self) -> &str {
        "checkpoints"
    }

    fn priority(&self) -> u32 {
        40
    }
}
