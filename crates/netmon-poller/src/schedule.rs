use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use tokio::time::Instant;

/// 轮询调度表
///
/// 按下次到期时间排列的最小堆；同一设备同时只排队一次。
#[derive(Debug, Default)]
pub struct PollSchedule {
    heap: BinaryHeap<Reverse<(Instant, u64, String)>>,
    queued: HashSet<String>,
    seq: u64,
}

impl PollSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// 安排设备在 `due` 时轮询，已在队列中则忽略
    pub fn schedule(&mut self, device_id: impl Into<String>, due: Instant) -> bool {
        let device_id = device_id.into();
        if !self.queued.insert(device_id.clone()) {
            return false;
        }
        self.seq += 1;
        self.heap.push(Reverse((due, self.seq, device_id)));
        true
    }

    /// 取出一个已到期的设备
    pub fn pop_due(&mut self, now: Instant) -> Option<String> {
        match self.heap.peek() {
            Some(Reverse((due, _, _))) if *due <= now => {}
            _ => return None,
        }
        let Reverse((_, _, device_id)) = self.heap.pop()?;
        self.queued.remove(&device_id);
        Some(device_id)
    }

    /// 最早的到期时间
    pub fn next_due(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse((due, _, _))| *due)
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.queued.contains(device_id)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
