use crate::graph::{EdgeKey, TopologyEdge, TopologySnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::IpAddr;

/// 一次发现周期的结果
#[derive(Debug, Clone, Default)]
pub struct DiscoveryRound {
    /// 本周期观察到的候选边
    pub candidates: BTreeSet<EdgeKey>,
    /// 本周期成功完成发现的设备
    pub observed: BTreeSet<String>,
    /// 发现范围内、但不在设备清单中的邻居地址
    pub unmanaged: BTreeSet<IpAddr>,
}

impl DiscoveryRound {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, device_id: impl Into<String>) {
        self.observed.insert(device_id.into());
    }

    pub fn add(&mut self, key: EdgeKey) {
        self.candidates.insert(key);
    }

    fn covers(&self, key: &EdgeKey) -> bool {
        self.observed.contains(&key.a) || self.observed.contains(&key.b)
    }
}

/// 快照之间的差异
#[derive(Debug, Clone, Default)]
pub struct TopologyDiff {
    pub added: Vec<TopologyEdge>,
    pub removed: Vec<TopologyEdge>,
    /// 本周期再次确认的边数
    pub confirmed: usize,
    /// 未确认但仍在宽限期内的边数
    pub stale: usize,
}

impl TopologyDiff {
    pub fn is_structural_change(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// 拓扑变更记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyChange {
    pub version: u64,
    pub at: DateTime<Utc>,
    pub added: Vec<TopologyEdge>,
    pub removed: Vec<TopologyEdge>,
}

/// 把一个发现周期应用到上一版快照上
///
/// - 新出现的候选边加入，版本号 +1
/// - 未被确认的边累加 `missed_cycles`，超过 `grace_cycles` 后移除
/// - 两端设备本周期都未完成发现的边保持原样
///
/// 对同一输入重复应用不会产生新的增删。
pub fn apply_round(
    previous: &TopologySnapshot,
    round: &DiscoveryRound,
    now: DateTime<Utc>,
    grace_cycles: u32,
) -> (TopologySnapshot, TopologyDiff) {
    let mut diff = TopologyDiff::default();
    let mut edges = Vec::with_capacity(previous.edge_count() + round.candidates.len());

    for edge in previous.edges() {
        let mut edge = edge.clone();
        if round.candidates.contains(&edge.key) {
            edge.last_confirmed_at = now;
            edge.missed_cycles = 0;
            diff.confirmed += 1;
        } else if round.covers(&edge.key) {
            edge.missed_cycles += 1;
            if edge.missed_cycles > grace_cycles {
                diff.removed.push(edge);
                continue;
            }
            diff.stale += 1;
        }
        edges.push(edge);
    }

    for key in &round.candidates {
        if previous.edge(key).is_none() {
            let edge = TopologyEdge::new(key.clone(), now);
            diff.added.push(edge.clone());
            edges.push(edge);
        }
    }

    let version = if diff.is_structural_change() {
        previous.version() + 1
    } else {
        previous.version()
    };

    (TopologySnapshot::new(version, now, edges), diff)
}
