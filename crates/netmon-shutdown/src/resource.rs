use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("Cleanup failed: {0}")]
    CleanupFailed(String),

    #[error("Cleanup timed out after {0:?}")]
    Timeout(Duration),
}

/// 需要在退出时清理的组件
#[async_trait]
pub trait Resource: Send + Sync {
    /// 停止并释放资源
    async fn cleanup(&self) -> Result<(), ResourceError>;

    /// 资源名称
    fn name(&self) -> &str;

    /// 清理顺序（数字越小越先清理）
    fn priority(&self) -> u32 {
        100
    }
}

/// 资源管理器
pub struct ResourceManager {
    resources: Vec<Arc<dyn Resource>>,
    per_resource_timeout: Duration,
}

impl ResourceManager {
    pub fn new() -> Self {
        Self {
            resources: Vec::new(),
            per_resource_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_per_resource_timeout(mut self, timeout: Duration) -> Self {
        self.per_resource_timeout = timeout;
        self
    }

    pub fn register(&mut self, resource: Arc<dyn Resource>) {
        info!(resource = resource.name(), priority = resource.priority(), "Registering resource");
        self.resources.push(resource);
    }

    /// 按优先级依次清理，单个失败不影响后续
    ///
    /// 返回清理失败的资源名称。
    pub async fn cleanup_all(&mut self) -> Vec<String> {
        self.resources.sort_by_key(|r| r.priority());
        info!(count = self.resources.len(), "Cleaning up resources");

        let mut failed = Vec::new();
        for resource in &self.resources {
            let result =
                match tokio::time::timeout(self.per_resource_timeout, resource.cleanup()).await {
                    Ok(result) => result,
                    Err(_) => Err(ResourceError::Timeout(self.per_resource_timeout)),
                };
            match result {
                Ok(()) => info!(resource = resource.name(), "Resource cleaned up"),
                Err(ResourceError::Timeout(after)) => {
                    warn!(resource = resource.name(), after = ?after, "Resource cleanup timed out");
                    failed.push(resource.name().to_string());
                }
                Err(e) => {
                    error!(resource = resource.name(), error = %e, "Resource cleanup failed");
                    failed.push(resource.name().to_string());
                }
            }
        }

        info!(failed = failed.len(), "Resource cleanup complete");
        failed
    }

    pub fn count(&self) -> usize {
        self.resources.len()
    }
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct TestResource {
        name: String,
        priority: u32,
        should_fail: bool,
        order: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Resource for TestResource {
        async fn cleanup(&self) -> Result<(), ResourceError> {
            self.order.lock().unwrap().push(self.name.clone());
            if self.should_fail {
                Err(ResourceError::CleanupFailed("Test failure".to_string()))
            } else {
                Ok(())
            }
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn priority(&self) -> u32 {
            self.priority
        }
    }

    fn resource(name: &str, priority: u32, should_fail: bool, order: &Arc<Mutex<Vec<String>>>) -> Arc<TestResource> {
        Arc::new(TestResource {
            name: name.to_string(),
            priority,
            should_fail,
            order: order.clone(),
        })
    }

    #[tokio::test]
    async fn test_cleanup_in_priority_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut manager = ResourceManager::new();
        manager.register(resource("checkpoint", 40, false, &order));
        manager.register(resource("poller", 10, false, &order));
        manager.register(resource("dispatcher", 30, false, &order));

        assert_eq!(manager.count(), 3);
        assert!(manager.cleanup_all().await.is_empty());
        assert_eq!(*order.lock().unwrap(), vec!["poller", "dispatcher", "checkpoint"]);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_cleanup() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut manager = ResourceManager::new();
        manager.register(resource("broken", 1, true, &order));
        manager.register(resource("healthy", 2, false, &order));

        // 即使失败也应该继续
        let failed = manager.cleanup_all().await;
        assert_eq!(failed, vec!["broken"]);
        assert_eq!(order.lock().unwrap().len(), 2);
    }

    struct HangingResource;

    #[async_trait]
    impl Resource for HangingResource {
        async fn cleanup(&self) -> Result<(), ResourceError> {
            std::future::pending::<()>().await;
            Ok(())
        }

        fn name(&self) -> &str {
            "hanging"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_cleanup_times_out() {
        let mut manager = ResourceManager::new().with_per_resource_timeout(Duration::from_secs(1));
        manager.register(Arc::new(HangingResource));
        assert_eq!(manager.cleanup_all().await, vec!["hanging"]);
    }
}
