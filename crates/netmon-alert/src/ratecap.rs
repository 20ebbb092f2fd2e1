use crate::notification::{Digest, DigestEntry, DigestKind};
use chrono::{DateTime, Duration, TimeZone, Utc};
use netmon_types::Severity;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

struct PendingDigest {
    entries: Vec<DigestEntry>,
    due_at: DateTime<Utc>,
}

/// 按级别的每小时通知上限
///
/// 滚动一小时内单独通知数达到上限后，后续通知推迟到下一个整点合并为一条摘要发出。
/// 摘要本身不计入上限。
pub struct RateCap {
    limit: usize,
    window: Duration,
    sent: HashMap<Severity, Vec<DateTime<Utc>>>,
    pending: BTreeMap<Severity, PendingDigest>,
}

impl RateCap {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            window: Duration::hours(1),
            sent: HashMap::new(),
            pending: BTreeMap::new(),
        }
    }

    /// 尝试占用一个通知名额
    pub fn admit(&mut self, tier: Severity, now: DateTime<Utc>) -> bool {
        let window_start = now - self.window;
        let sent = self.sent.entry(tier).or_default();
        sent.retain(|t| *t > window_start);
        if sent.len() < self.limit {
            sent.push(now);
            true
        } else {
            false
        }
    }

    /// 滚动窗口内已发出的单独通知数
    pub fn sent_in_window(&self, tier: Severity, now: DateTime<Utc>) -> usize {
        let window_start = now - self.window;
        self.sent
            .get(&tier)
            .map(|sent| sent.iter().filter(|t| **t > window_start && **t <= now).count())
            .unwrap_or(0)
    }

    /// 推迟一条通知到该级别的整点摘要
    pub fn defer(&mut self, tier: Severity, entry: DigestEntry, now: DateTime<Utc>) {
        let pending = self.pending.entry(tier).or_insert_with(|| PendingDigest {
            entries: Vec::new(),
            due_at: next_hour(now),
        });
        pending.entries.push(entry);
        debug!(
            tier = %tier,
            deferred = pending.entries.len(),
            due_at = %pending.due_at,
            "Notification deferred by hourly cap"
        );
    }

    pub fn pending(&self, tier: Severity) -> usize {
        self.pending.get(&tier).map_or(0, |p| p.entries.len())
    }

    /// 取出已到期的摘要
    pub fn flush_due(&mut self, now: DateTime<Utc>) -> Vec<Digest> {
        let due: Vec<Severity> = self
            .pending
            .iter()
            .filter(|(_, p)| p.due_at <= now)
            .map(|(tier, _)| *tier)
            .collect();
        due.into_iter()
            .filter_map(|tier| self.take(tier, now))
            .collect()
    }

    /// 取出全部待发摘要
    pub fn flush_all(&mut self, now: DateTime<Utc>) -> Vec<Digest> {
        let tiers: Vec<Severity> = self.pending.keys().copied().collect();
        tiers
            .into_iter()
            .filter_map(|tier| self.take(tier, now))
            .collect()
    }

    fn take(&mut self, tier: Severity, now: DateTime<Utc>) -> Option<Digest> {
        let pending = self.pending.remove(&tier)?;
        if pending.entries.is_empty() {
            return None;
        }
        info!(tier = %tier, alerts = pending.entries.len(), "Releasing hourly digest");
        Some(Digest::new(DigestKind::RateLimited, tier, pending.entries, now))
    }
}

/// 下一个整点
fn next_hour(now: DateTime<Utc>) -> DateTime<Utc> {
    let next = (now.timestamp().div_euclid(3600) + 1) * 3600;
    Utc.timestamp_opt(next, 0)
        .single()
        .unwrap_or(now + Duration::hours(1))
}
