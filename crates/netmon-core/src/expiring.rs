use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::hash::Hash;

/// 带过期时间的键值存储
///
/// 访问时惰性判断过期（过期条目视为不存在），由 `sweep` 周期性回收并返回被淘汰的条目。
/// 时间由调用方传入，去重窗口和关联窗口都按事件时间计算。
pub trait ExpiringStore<K, V> {
    /// 插入或覆盖条目
    fn insert(&mut self, key: K, value: V, expires_at: DateTime<Utc>);

    /// 获取未过期的条目
    fn get(&self, key: &K, now: DateTime<Utc>) -> Option<&V>;

    /// 获取未过期条目的可变引用
    fn get_mut(&mut self, key: &K, now: DateTime<Utc>) -> Option<&mut V>;

    /// 移除条目（无论是否过期）
    fn remove(&mut self, key: &K) -> Option<V>;

    /// 条目的过期时间
    fn expires_at(&self, key: &K) -> Option<DateTime<Utc>>;

    /// 所有未过期的条目
    fn live(&self, now: DateTime<Utc>) -> Vec<(&K, &V)>;

    /// 回收所有已过期条目
    fn sweep(&mut self, now: DateTime<Utc>) -> Vec<(K, V)>;

    /// 存储中的条目总数（包含尚未回收的过期条目）
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, key: &K, now: DateTime<Utc>) -> bool {
        self.get(key, now).is_some()
    }
}

struct Entry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

impl<V> Entry<V> {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// 基于 HashMap 的 `ExpiringStore` 实现
pub struct TtlMap<K, V> {
    entries: HashMap<K, Entry<V>>,
}

impl<K, V> TtlMap<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K, V> Default for TtlMap<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ExpiringStore<K, V> for TtlMap<K, V>
where
    K: Eq + Hash + Clone,
{
    fn insert(&mut self, key: K, value: V, expires_at: DateTime<Utc>) {
        self.entries.insert(key, Entry { value, expires_at });
    }

    fn get(&self, key: &K, now: DateTime<Utc>) -> Option<&V> {
        self.entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| &entry.value)
    }

    fn get_mut(&mut self, key: &K, now: DateTime<Utc>) -> Option<&mut V> {
        self.entries
            .get_mut(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| &mut entry.value)
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|entry| entry.value)
    }

    fn expires_at(&self, key: &K) -> Option<DateTime<Utc>> {
        self.entries.get(key).map(|entry| entry.expires_at)
    }

    fn live(&self, now: DateTime<Utc>) -> Vec<(&K, &V)> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, entry)| (key, &entry.value))
            .collect()
    }

    fn sweep(&mut self, now: DateTime<Utc>) -> Vec<(K, V)> {
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|key| self.entries.remove(&key).map(|entry| (key, entry.value)))
            .collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
