use crate::MetricsStore;
use chrono::{DateTime, Duration, Utc};
use netmon_core::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::fs;
use tracing::info;

/// 报表周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    Daily,
    Weekly,
}

impl ReportKind {
    pub fn period(&self) -> Duration {
        match self {
            ReportKind::Daily => Duration::days(1),
            ReportKind::Weekly => Duration::weeks(1),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Daily => "daily",
            ReportKind::Weekly => "weekly",
        }
    }
}

impl FromStr for ReportKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(ReportKind::Daily),
            "weekly" => Ok(ReportKind::Weekly),
            other => Err(format!("unknown report kind: {}", other)),
        }
    }
}

/// 单个序列的统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesSummary {
    pub device_id: String,
    pub metric: String,
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub last: f64,
}

/// 统计报表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub kind: ReportKind,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub series: Vec<SeriesSummary>,
}

/// 报表生成器
pub struct ReportGenerator {
    store: Arc<dyn MetricsStore>,
}

impl ReportGenerator {
    pub fn new(store: Arc<dyn MetricsStore>) -> Self {
        Self { store }
    }

    pub async fn generate(&self, kind: ReportKind, now: DateTime<Utc>) -> Report {
        let from = now - kind.period();
        let mut series = Vec::new();

        for key in self.store.series().await {
            let samples = self.store.range(&key.device_id, &key.metric, from, now).await;
            let Some(last) = samples.last() else {
                continue;
            };

            let (mut min, mut max, mut sum) = (f64::INFINITY, f64::NEG_INFINITY, 0.0);
            for sample in &samples {
                min = min.min(sample.value);
                max = max.max(sample.value);
                sum += sample.value;
            }

            series.push(SeriesSummary {
                device_id: key.device_id.clone(),
                metric: key.metric.clone(),
                count: samples.len(),
                min,
                max,
                avg: sum / samples.len() as f64,
                last: last.value,
            });
        }

        Report {
            kind,
            from,
            to: now,
            generated_at: Utc::now(),
            series,
        }
    }

    /// 写入 `<dir>/<kind>-<YYYY-MM-DD>.json`
    pub async fn write(&self, report: &Report, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await?;
        let path = dir.join(format!(
            "{}-{}.json",
            report.kind.as_str(),
            report.to.format("%Y-%m-%d")
        ));
        fs::write(&path, serde_json::to_vec_pretty(report)?).await?;
        info!(path = %path.display(), series = report.series.len(), "Report written");
        Ok(path)
    }
}
