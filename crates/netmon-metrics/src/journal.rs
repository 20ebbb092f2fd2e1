use chrono::{DateTime, Duration, NaiveDate, Utc};
use netmon_core::{MonitorError, Result};
use netmon_types::MetricSample;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const SEGMENT_EXT: &str = "jsonl";

/// 按天分区的样本日志：`<dir>/YYYY-MM-DD.jsonl`
pub struct Journal {
    dir: PathBuf,
    current: Mutex<Option<(NaiveDate, File)>>,
}

impl Journal {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            current: Mutex::new(None),
        })
    }

    fn segment_path(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}.{}", date.format("%Y-%m-%d"), SEGMENT_EXT))
    }

    /// 追加一条样本（按样本时间所在日期选择分区）
    pub async fn append(&self, sample: &MetricSample) -> Result<()> {
        let mut line = serde_json::to_vec(sample)?;
        line.push(b'\n');

        let date = sample.timestamp.date_naive();
        let mut current = self.current.lock().await;

        let reuse = matches!(&*current, Some((open_date, _)) if *open_date == date);
        if !reuse {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.segment_path(date))
                .await?;
            *current = Some((date, file));
        }

        if let Some((_, file)) = current.as_mut() {
            file.write_all(&line).await?;
            file.flush().await?;
        }
        Ok(())
    }

    async fn segments(&self) -> Result<Vec<(NaiveDate, PathBuf)>> {
        let mut segments = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SEGMENT_EXT) {
                continue;
            }
            let date = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());
            match date {
                Some(date) => segments.push((date, path)),
                None => warn!(path = %path.display(), "Ignoring unrecognised journal file"),
            }
        }
        segments.sort();
        Ok(segments)
    }

    /// 回放不早于 `cutoff` 的样本，损坏的行被跳过
    pub async fn replay(&self, cutoff: DateTime<Utc>) -> Result<Vec<MetricSample>> {
        let mut samples = Vec::new();
        let mut skipped = 0usize;

        for (date, path) in self.segments().await? {
            if segment_expired(date, cutoff) {
                continue;
            }
            let file = File::open(&path).await?;
            let mut lines = BufReader::new(file).lines();
            while let Some(line) = lines.next_line().await? {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<MetricSample>(&line) {
                    Ok(sample) if sample.timestamp >= cutoff => samples.push(sample),
                    Ok(_) => {}
                    Err(_) => skipped += 1,
                }
            }
        }

        if skipped > 0 {
            warn!(skipped = skipped, "Skipped malformed journal lines during replay");
        }
        info!(samples = samples.len(), dir = %self.dir.display(), "Metric journal replayed");
        Ok(samples)
    }

    /// 删除整天都早于 `cutoff` 的分区，返回删除的文件数
    pub async fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        for (date, path) in self.segments().await? {
            if !segment_expired(date, cutoff) {
                continue;
            }
            {
                let mut current = self.current.lock().await;
                if matches!(&*current, Some((open_date, _)) if *open_date == date) {
                    *current = None;
                }
            }
            fs::remove_file(&path)
                .await
                .map_err(|e| MonitorError::Transient(format!("remove {}: {}", path.display(), e)))?;
            debug!(path = %path.display(), "Removed expired journal segment");
            removed += 1;
        }
        Ok(removed)
    }
}

/// 分区内所有样本都早于 cutoff
fn segment_expired(date: NaiveDate, cutoff: DateTime<Utc>) -> bool {
    let end_of_day = date.and_hms_opt(0, 0, 0).map(|d| d.and_utc() + Duration::days(1));
    matches!(end_of_day, Some(end) if end <= cutoff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn sample(day: u32, hour: u32, value: f64) -> MetricSample {
        MetricSample::new("sw1", "cpu_usage", value)
            .at(Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_append_and_replay() {
        let dir = tempdir().unwrap();
        let journal = Journal::open(dir.path()).await.unwrap();

        journal.append(&sample(1, 10, 1.0)).await.unwrap();
        journal.append(&sample(2, 10, 2.0)).await.unwrap();
        journal.append(&sample(2, 11, 3.0)).await.unwrap();

        let all = journal
            .replay(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        assert!(dir.path().join("2024-03-01.jsonl").exists());
        assert!(dir.path().join("2024-03-02.jsonl").exists());

        let recent = journal
            .replay(Utc.with_ymd_and_hms(2024, 3, 2, 10, 30, 0).unwrap())
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].value, 3.0);
    }

    #[tokio::test]
    async fn test_replay_skips_corrupt_lines() {
        let dir = tempdir().unwrap();
        let journal = Journal::open(dir.path()).await.unwrap();
        journal.append(&sample(1, 10, 1.0)).await.unwrap();

        let path = dir.path().join("2024-03-01.jsonl");
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{\"device_id\": truncated\n");
        std::fs::write(&path, content).unwrap();

        let replayed = journal
            .replay(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
            .await
            .unwrap();
        assert_eq!(replayed.len(), 1);
    }

    #[tokio::test]
    async fn test_prune_whole_days_only() {
        let dir = tempdir().unwrap();
        let journal = Journal::open(dir.path()).await.unwrap();
        journal.append(&sample(1, 10, 1.0)).await.unwrap();
        journal.append(&sample(2, 10, 2.0)).await.unwrap();

        // 截止时间在 3 月 2 日中间：只有 3 月 1 日整天过期
        let removed = journal
            .prune(Utc.with_ymd_and_hms(2024, 3, 2, 12, 0, 0).unwrap())
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(!dir.path().join("2024-03-01.jsonl").exists());
        assert!(dir.path().join("2024-03-02.jsonl").exists());
    }
}
