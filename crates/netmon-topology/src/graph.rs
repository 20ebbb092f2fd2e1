use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// 链路类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    /// 网桥转发表（L2）
    Bridge,
    /// ARP 表（L2/L3 邻接）
    Arp,
    /// 路由下一跳（L3）
    Route,
}

/// 无向边的规范化键（a <= b）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    pub a: String,
    pub b: String,
    pub link_type: LinkType,
}

impl EdgeKey {
    pub fn new(x: impl Into<String>, y: impl Into<String>, link_type: LinkType) -> Self {
        let (x, y) = (x.into(), y.into());
        let (a, b) = if x <= y { (x, y) } else { (y, x) };
        Self { a, b, link_type }
    }

    pub fn touches(&self, device_id: &str) -> bool {
        self.a == device_id || self.b == device_id
    }

    /// 边的另一端
    pub fn peer_of(&self, device_id: &str) -> Option<&str> {
        if self.a == device_id {
            Some(&self.b)
        } else if self.b == device_id {
            Some(&self.a)
        } else {
            None
        }
    }
}

/// 拓扑边
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyEdge {
    #[serde(flatten)]
    pub key: EdgeKey,
    pub discovered_at: DateTime<Utc>,
    pub last_confirmed_at: DateTime<Utc>,
    /// 连续未确认的发现周期数
    #[serde(default)]
    pub missed_cycles: u32,
}

impl TopologyEdge {
    pub fn new(key: EdgeKey, at: DateTime<Utc>) -> Self {
        Self {
            key,
            discovered_at: at,
            last_confirmed_at: at,
            missed_cycles: 0,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SnapshotRecord {
    version: u64,
    generated_at: DateTime<Utc>,
    edges: Vec<TopologyEdge>,
}

/// 版本化的拓扑快照（发布后不可变）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "SnapshotRecord", into = "SnapshotRecord")]
pub struct TopologySnapshot {
    version: u64,
    generated_at: DateTime<Utc>,
    edges: BTreeMap<EdgeKey, TopologyEdge>,
    adjacency: HashMap<String, BTreeSet<String>>,
}

impl From<SnapshotRecord> for TopologySnapshot {
    fn from(record: SnapshotRecord) -> Self {
        TopologySnapshot::new(record.version, record.generated_at, record.edges)
    }
}

impl From<TopologySnapshot> for SnapshotRecord {
    fn from(snapshot: TopologySnapshot) -> Self {
        SnapshotRecord {
            version: snapshot.version,
            generated_at: snapshot.generated_at,
            edges: snapshot.edges.into_values().collect(),
        }
    }
}

impl TopologySnapshot {
    pub fn new(version: u64, generated_at: DateTime<Utc>, edges: Vec<TopologyEdge>) -> Self {
        let edges: BTreeMap<EdgeKey, TopologyEdge> =
            edges.into_iter().map(|e| (e.key.clone(), e)).collect();
        let mut adjacency: HashMap<String, BTreeSet<String>> = HashMap::new();
        for key in edges.keys() {
            adjacency.entry(key.a.clone()).or_default().insert(key.b.clone());
            adjacency.entry(key.b.clone()).or_default().insert(key.a.clone());
        }
        Self {
            version,
            generated_at,
            edges,
            adjacency,
        }
    }

    pub fn empty() -> Self {
        Self::new(0, Utc::now(), Vec::new())
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn edges(&self) -> impl Iterator<Item = &TopologyEdge> {
        self.edges.values()
    }

    pub fn edge(&self, key: &EdgeKey) -> Option<&TopologyEdge> {
        self.edges.get(key)
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// 直接相邻的设备
    pub fn neighbors(&self, device_id: &str) -> Vec<String> {
        self.adjacency
            .get(device_id)
            .map(|n| n.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// `max_hops` 跳以内可达的设备（不含自身）
    pub fn blast_radius(&self, device_id: &str, max_hops: usize) -> Vec<String> {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut queue = VecDeque::from([(device_id.to_string(), 0usize)]);
        seen.insert(device_id.to_string());

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_hops {
                continue;
            }
            if let Some(neighbors) = self.adjacency.get(&current) {
                for next in neighbors {
                    if seen.insert(next.clone()) {
                        queue.push_back((next.clone(), depth + 1));
                    }
                }
            }
        }

        seen.remove(device_id);
        seen.into_iter().collect()
    }

    /// 两台设备之间跳数最少的路径（含两端）
    pub fn shortest_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        if from == to {
            return Some(vec![from.to_string()]);
        }
        let mut previous: HashMap<String, String> = HashMap::new();
        let mut queue = VecDeque::from([from.to_string()]);
        previous.insert(from.to_string(), String::new());

        while let Some(current) = queue.pop_front() {
            for next in self.adjacency.get(&current).into_iter().flatten() {
                if previous.contains_key(next) {
                    continue;
                }
                previous.insert(next.clone(), current.clone());
                if next == to {
                    let mut path = vec![to.to_string()];
                    let mut cursor = current.clone();
                    while cursor != from {
                        path.push(cursor.clone());
                        cursor = previous.get(&cursor)?.clone();
                    }
                    path.push(from.to_string());
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next.clone());
            }
        }
        None
    }

    /// 关键链路：删除后图的连通分量增加的邻接（桥）
    pub fn critical_links(&self) -> Vec<(String, String)> {
        let nodes: Vec<&String> = {
            let mut nodes: Vec<&String> = self.adjacency.keys().collect();
            nodes.sort();
            nodes
        };
        let index: HashMap<&str, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();

        let mut state = BridgeSearch {
            disc: vec![usize::MAX; nodes.len()],
            low: vec![0; nodes.len()],
            timer: 0,
            bridges: Vec::new(),
        };
        let neighbors: Vec<Vec<usize>> = nodes
            .iter()
            .map(|n| {
                self.adjacency[*n]
                    .iter()
                    .filter_map(|m| index.get(m.as_str()).copied())
                    .collect()
            })
            .collect();

        for start in 0..nodes.len() {
            if state.disc[start] == usize::MAX {
                state.visit(start, &neighbors);
            }
        }

        let mut links: Vec<(String, String)> = state
            .bridges
            .into_iter()
            .map(|(u, v)| {
                let (a, b) = (nodes[u].clone(), nodes[v].clone());
                if a <= b {
                    (a, b)
                } else {
                    (b, a)
                }
            })
            .collect();
        links.sort();
        links
    }

    /// 导出为 JSON
    pub fn export_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

struct BridgeSearch {
    disc: Vec<usize>,
    low: Vec<usize>,
    timer: usize,
    bridges: Vec<(usize, usize)>,
}

impl BridgeSearch {
    fn discover(&mut self, node: usize) {
        self.disc[node] = self.timer;
        self.low[node] = self.timer;
        self.timer += 1;
    }

    /// 从 `root` 开始深度优先遍历，用显式栈代替递归，长链拓扑不会耗尽线程栈
    fn visit(&mut self, root: usize, neighbors: &[Vec<usize>]) {
        // (节点, 父节点, 下一个待检查的邻居下标)
        let mut stack = vec![(root, usize::MAX, 0usize)];
        self.discover(root);

        while let Some(frame) = stack.last_mut() {
            let (node, parent, cursor) = *frame;
            if let Some(&next) = neighbors[node].get(cursor) {
                frame.2 += 1;
                if next == parent {
                    continue;
                }
                if self.disc[next] == usize::MAX {
                    self.discover(next);
                    stack.push((next, node, 0));
                } else {
                    self.low[node] = self.low[node].min(self.disc[next]);
                }
            } else {
                stack.pop();
                if parent != usize::MAX {
                    self.low[parent] = self.low[parent].min(self.low[node]);
                    if self.low[node] > self.disc[parent] {
                        self.bridges.push((parent, node));
                    }
                }
            }
        }
    }
}
