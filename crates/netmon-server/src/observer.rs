use async_trait::async_trait;
use chrono::{DateTime, Utc};
use netmon_alert::{EvaluationEvent, EvaluationRouter};
use netmon_core::ErrorClass;
use netmon_metrics::MetricsStore;
use netmon_poller::PollObserver;
use netmon_types::{Device, MetricSample};
use std::sync::Arc;
use tracing::{error, warn};

/// 把轮询结果写入指标库并送入告警评估流水线
pub struct PipelineObserver {
    store: Arc<dyn MetricsStore>,
    router: Arc<EvaluationRouter>,
}

impl PipelineObserver {
    pub fn new(store: Arc<dyn MetricsStore>, router: Arc<EvaluationRouter>) -> Self {
        Self { store, router }
    }

    async fn route(&self, event: EvaluationEvent) {
        let device_id = event.device_id().to_string();
        if let Err(e) = self.router.route(event).await {
            warn!(device_id = %device_id, error = %e, "Evaluation event dropped");
        }
    }
}

#[async_trait]
impl PollObserver for PipelineObserver {
    async fn on_samples(&self, device: &Device, samples: Vec<MetricSample>) {
        let mut accepted = Vec::with_capacity(samples.len());
        for sample in samples {
            match self.store.write(sample.clone()).await {
                Ok(()) => accepted.push(sample),
                Err(e) if e.class() == ErrorClass::Data => {
                    warn!(
                        device_id = %device.id,
                        metric = %sample.metric,
                        error = %e,
                        "Invalid sample discarded"
                    );
                }
                // 存储故障不影响告警判定
                Err(e) => {
                    error!(
                        device_id = %device.id,
                        metric = %sample.metric,
                        error = %e,
                        "Failed to store sample"
                    );
                    accepted.push(sample);
                }
            }
        }
        if accepted.is_empty() {
            return;
        }
        self.route(EvaluationEvent::Samples {
            device_id: device.id.clone(),
            samples: accepted,
        })
        .await;
    }

    async fn on_unreachable(&self, device: &Device, reason: &str, at: DateTime<Utc>) {
        self.route(EvaluationEvent::Unreachable {
            device_id: device.id.clone(),
            reason: reason.to_string(),
            at,
        })
        .await;
    }

    async fn on_recovered(&self, device: &Device, at: DateTime<Utc>) {
        self.route(EvaluationEvent::Recovered {
            device_id: device.id.clone(),
            at,
        })
        .await;
    }
}
