use crate::engine::AlertEngine;
use crate::error::{AlertError, Result};
use chrono::{DateTime, Utc};
use netmon_types::MetricSample;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// 送入告警引擎的事件
#[derive(Debug, Clone)]
pub enum EvaluationEvent {
    Samples {
        device_id: String,
        samples: Vec<MetricSample>,
    },
    Unreachable {
        device_id: String,
        reason: String,
        at: DateTime<Utc>,
    },
    Recovered {
        device_id: String,
        at: DateTime<Utc>,
    },
}

impl EvaluationEvent {
    pub fn device_id(&self) -> &str {
        match self {
            EvaluationEvent::Samples { device_id, .. }
            | EvaluationEvent::Unreachable { device_id, .. }
            | EvaluationEvent::Recovered { device_id, .. } => device_id,
        }
    }
}

/// 按设备分片的评估流水线
///
/// 同一设备的事件总是进入同一分片，按到达顺序处理；不同设备并行处理。
pub struct EvaluationRouter {
    shards: RwLock<Vec<mpsc::Sender<EvaluationEvent>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl EvaluationRouter {
    pub fn start(engine: Arc<AlertEngine>, shards: usize, capacity: usize) -> Self {
        let shards = shards.max(1);
        let mut senders = Vec::with_capacity(shards);
        let mut workers = Vec::with_capacity(shards);

        for shard in 0..shards {
            let (tx, mut rx) = mpsc::channel::<EvaluationEvent>(capacity.max(1));
            let engine = engine.clone();
            senders.push(tx);
            workers.push(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    handle(&engine, event).await;
                }
                debug!(shard, "Evaluation shard drained");
            }));
        }

        info!(shards, "Evaluation pipeline started");
        Self {
            shards: RwLock::new(senders),
            workers: Mutex::new(workers),
        }
    }

    /// 投递事件；分片队列满时等待
    pub async fn route(&self, event: EvaluationEvent) -> Result<()> {
        let sender = {
            let shards = self.shards.read().await;
            if shards.is_empty() {
                return Err(AlertError::PipelineClosed);
            }
            shards[shard_for(event.device_id(), shards.len())].clone()
        };
        sender
            .send(event)
            .await
            .map_err(|_| AlertError::PipelineClosed)
    }

    /// 停止接收新事件并等待已排队事件处理完毕
    pub async fn shutdown(&self) {
        self.shards.write().await.clear();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for worker in workers {
            let _ = worker.await;
        }
        info!("Evaluation pipeline drained");
    }
}

fn shard_for(device_id: &str, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    device_id.hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}

async fn handle(engine: &AlertEngine, event: EvaluationEvent) {
    match event {
        EvaluationEvent::Samples { samples, .. } => engine.evaluate_batch(&samples).await,
        EvaluationEvent::Unreachable {
            device_id,
            reason,
            at,
        } => engine.device_unreachable(&device_id, &reason, at).await,
        EvaluationEvent::Recovered { device_id, at } => engine.device_recovered(&device_id, at).await,
    }
}
