use crate::Journal;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use netmon_core::{MonitorError, Result};
use netmon_types::MetricSample;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// 时间序列标识
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub device_id: String,
    pub metric: String,
}

impl SeriesKey {
    pub fn new(device_id: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            metric: metric.into(),
        }
    }
}

/// 一次清理的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub samples_removed: usize,
    pub series_removed: usize,
    pub segments_removed: usize,
}

/// 指标存储接口
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// 追加样本
    async fn write(&self, sample: MetricSample) -> Result<()>;

    /// 某个序列的最新样本
    async fn latest(&self, device_id: &str, metric: &str) -> Option<MetricSample>;

    /// `[from, to]` 区间内的样本，按时间升序
    async fn range(
        &self,
        device_id: &str,
        metric: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<MetricSample>;

    /// 所有序列
    async fn series(&self) -> Vec<SeriesKey>;

    /// 删除早于 `cutoff` 的样本
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<PruneStats>;
}

#[derive(Default)]
struct Series {
    /// 按时间升序
    points: Vec<(DateTime<Utc>, f64)>,
}

impl Series {
    fn insert(&mut self, at: DateTime<Utc>, value: f64) {
        match self.points.last() {
            Some((last, _)) if *last > at => {
                // 乱序样本：插到第一个更晚的样本之前，同时间戳保持到达顺序
                let idx = self.points.partition_point(|(t, _)| *t <= at);
                self.points.insert(idx, (at, value));
            }
            _ => self.points.push((at, value)),
        }
    }
}

type Shard = RwLock<HashMap<SeriesKey, Series>>;

/// 按设备分片的内存存储，可选地写入日志
pub struct ShardedStore {
    shards: Vec<Shard>,
    journal: Option<Journal>,
    /// 最近一次清理的截止时间，早于它的样本不再接受也不再返回
    watermark: RwLock<Option<DateTime<Utc>>>,
}

impl ShardedStore {
    /// 纯内存存储
    pub fn in_memory(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| RwLock::new(HashMap::new())).collect(),
            journal: None,
            watermark: RwLock::new(None),
        }
    }

    /// 打开带日志的存储并回放 `retention_cutoff` 之后的样本
    pub async fn open(
        dir: impl AsRef<Path>,
        shards: usize,
        retention_cutoff: DateTime<Utc>,
    ) -> Result<Self> {
        let journal = Journal::open(dir).await?;
        let replayed = journal.replay(retention_cutoff).await?;

        let mut store = Self::in_memory(shards);
        let count = replayed.len();
        for sample in replayed {
            store.insert(sample).await;
        }
        store.journal = Some(journal);
        *store.watermark.write().await = Some(retention_cutoff);

        info!(samples = count, "Metrics store opened");
        Ok(store)
    }

    fn shard(&self, device_id: &str) -> &Shard {
        let mut hasher = DefaultHasher::new();
        device_id.hash(&mut hasher);
        let idx = (hasher.finish() % self.shards.len() as u64) as usize;
        &self.shards[idx]
    }

    async fn insert(&self, sample: MetricSample) {
        let key = SeriesKey::new(sample.device_id, sample.metric);
        let mut shard = self.shard(&key.device_id).write().await;
        shard
            .entry(key)
            .or_default()
            .insert(sample.timestamp, sample.value);
    }
}

#[async_trait]
impl MetricsStore for ShardedStore {
    async fn write(&self, sample: MetricSample) -> Result<()> {
        if !sample.value.is_finite() {
            return Err(MonitorError::Data(format!(
                "non-finite value for {}/{}",
                sample.device_id, sample.metric
            )));
        }
        if let Some(watermark) = *self.watermark.read().await {
            if sample.timestamp < watermark {
                debug!(
                    device_id = %sample.device_id,
                    metric = %sample.metric,
                    "Dropping sample older than retention"
                );
                return Ok(());
            }
        }

        if let Some(journal) = &self.journal {
            // 日志写入失败不影响内存中的数据
            if let Err(e) = journal.append(&sample).await {
                warn!(device_id = %sample.device_id, error = %e, "Failed to journal metric sample");
            }
        }
        self.insert(sample).await;
        Ok(())
    }

    async fn latest(&self, device_id: &str, metric: &str) -> Option<MetricSample> {
        let key = SeriesKey::new(device_id, metric);
        let shard = self.shard(device_id).read().await;
        let (at, value) = shard.get(&key)?.points.last().copied()?;
        Some(MetricSample::new(device_id, metric, value).at(at))
    }

    async fn range(
        &self,
        device_id: &str,
        metric: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<MetricSample> {
        let from = match *self.watermark.read().await {
            Some(watermark) if watermark > from => watermark,
            _ => from,
        };
        if from > to {
            return Vec::new();
        }

        let key = SeriesKey::new(device_id, metric);
        let shard = self.shard(device_id).read().await;
        let Some(series) = shard.get(&key) else {
            return Vec::new();
        };

        let start = series.points.partition_point(|(t, _)| *t < from);
        series.points[start..]
            .iter()
            .take_while(|(t, _)| *t <= to)
            .map(|(t, v)| MetricSample::new(device_id, metric, *v).at(*t))
            .collect()
    }

    async fn series(&self) -> Vec<SeriesKey> {
        let mut keys = Vec::new();
        for shard in &self.shards {
            keys.extend(shard.read().await.keys().cloned());
        }
        keys.sort();
        keys
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<PruneStats> {
        {
            let mut watermark = self.watermark.write().await;
            if watermark.map_or(true, |w| cutoff > w) {
                *watermark = Some(cutoff);
            }
        }

        let mut stats = PruneStats::default();
        for shard in &self.shards {
            let mut shard = shard.write().await;
            shard.retain(|_, series| {
                let keep_from = series.points.partition_point(|(t, _)| *t < cutoff);
                stats.samples_removed += keep_from;
                series.points.drain(..keep_from);
                if series.points.is_empty() {
                    stats.series_removed += 1;
                    false
                } else {
                    true
                }
            });
        }

        if let Some(journal) = &self.journal {
            stats.segments_removed = journal.prune(cutoff).await?;
        }

        info!(
            cutoff = %cutoff,
            samples = stats.samples_removed,
            series = stats.series_removed,
            segments = stats.segments_removed,
            "Pruned expired metric samples"
        );
        Ok(stats)
    }
}
