use crate::model::Alert;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// 已关闭告警的有界历史
pub struct AlertHistory {
    entries: VecDeque<Alert>,
    limit: usize,
}

impl AlertHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    pub fn push(&mut self, alert: Alert) {
        self.entries.push_back(alert);
        while self.entries.len() > self.limit {
            self.entries.pop_front();
        }
    }

    /// 创建时间落在 `[from, to]` 内的告警
    pub fn between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<Alert> {
        self.entries
            .iter()
            .filter(|a| a.created_at >= from && a.created_at <= to)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<Alert> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
