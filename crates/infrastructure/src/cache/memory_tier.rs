use std::time::{Duration, Instant};

use lru::LruCache;

/// L1 缓存条目
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    /// 序列化后的JSON长度
    pub size_estimate: usize,
    pub access_count: u64,
    pub last_accessed_at: Instant,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    pub fn new(key: String, value: V, size_estimate: usize, ttl: Duration, now: Instant) -> Self {
        Self {
            key,
            value,
            size_estimate,
            access_count: 0,
            last_accessed_at: now,
            created_at: now,
            ttl,
        }
    }

    pub fn is_valid(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) < self.ttl
    }

    pub fn remaining_ttl(&self, now: Instant) -> Duration {
        self.ttl
            .saturating_sub(now.saturating_duration_since(self.created_at))
    }
}

/// 进程内LRU缓存，同时受条目数和估算字节数限制
///
/// 本身不加锁，由 [`super::MultiTierCache`] 负责同步。
#[derive(Debug)]
pub struct MemoryTier<V> {
    entries: LruCache<String, CacheEntry<V>>,
    max_entries: usize,
    max_size_bytes: usize,
    size_bytes: usize,
    evictions: u64,
}

impl<V: Clone> MemoryTier<V> {
    pub fn new(max_entries: usize, max_size_bytes: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            max_entries: max_entries.max(1),
            max_size_bytes: max_size_bytes.max(1),
            size_bytes: 0,
            evictions: 0,
        }
    }

    /// 命中时刷新LRU位置和访问计数；过期条目直接移除并视为未命中
    pub fn get(&mut self, key: &str, now: Instant) -> Option<(V, Duration)> {
        let entry = self.entries.get_mut(key)?;
        if !entry.is_valid(now) {
            self.remove(key);
            return None;
        }
        entry.access_count += 1;
        entry.last_accessed_at = now;
        Some((entry.value.clone(), entry.remaining_ttl(now)))
    }

    /// 写入后按LRU淘汰，直到条目数和字节数都不超限，返回被淘汰的键
    ///
    /// 单个值超过字节上限时不写入。
    pub fn insert(
        &mut self,
        key: String,
        value: V,
        size_estimate: usize,
        ttl: Duration,
        now: Instant,
    ) -> Vec<String> {
        if size_estimate > self.max_size_bytes {
            self.remove(&key);
            return Vec::new();
        }

        let entry = CacheEntry::new(key.clone(), value, size_estimate, ttl, now);
        if let Some(previous) = self.entries.put(key, entry) {
            self.size_bytes -= previous.size_estimate;
        }
        self.size_bytes += size_estimate;
        self.enforce_limits()
    }

    pub fn remove(&mut self, key: &str) -> bool {
        match self.entries.pop(key) {
            Some(entry) => {
                self.size_bytes -= entry.size_estimate;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains(key)
    }

    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.size_bytes = 0;
        count
    }

    /// 移除全部过期条目
    pub fn sweep_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_valid(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    /// 按 (访问次数升序, 最近访问时间升序) 移除 `fraction` 比例的条目
    pub fn evict_least_frequent(&mut self, fraction: f64) -> Vec<String> {
        if self.entries.is_empty() || fraction <= 0.0 {
            return Vec::new();
        }
        let count = ((self.entries.len() as f64) * fraction.min(1.0)).ceil() as usize;

        let mut candidates: Vec<(u64, Instant, String)> = self
            .entries
            .iter()
            .map(|(key, entry)| (entry.access_count, entry.last_accessed_at, key.clone()))
            .collect();
        candidates.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        let victims: Vec<String> = candidates
            .into_iter()
            .take(count)
            .map(|(_, _, key)| key)
            .collect();
        for key in &victims {
            self.remove(key);
        }
        self.evictions += victims.len() as u64;
        victims
    }

    /// 调整上限，新上限更小时立即淘汰
    pub fn resize(&mut self, max_entries: usize, max_size_bytes: usize) -> Vec<String> {
        self.max_entries = max_entries.max(1);
        self.max_size_bytes = max_size_bytes.max(1);
        self.enforce_limits()
    }

    fn enforce_limits(&mut self) -> Vec<String> {
        let mut evicted = Vec::new();
        while self.entries.len() > self.max_entries || self.size_bytes > self.max_size_bytes {
            match self.entries.pop_lru() {
                Some((key, entry)) => {
                    self.size_bytes -= entry.size_estimate;
                    evicted.push(key);
                }
                None => break,
            }
        }
        self.evictions += evicted.len() as u64;
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn max_size_bytes(&self) -> usize {
        self.max_size_bytes
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    pub fn entry(&self, key: &str) -> Option<&CacheEntry<V>> {
        self.entries.peek(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_lru_eviction_by_entry_count() {
        let now = Instant::now();
        let mut tier = MemoryTier::new(3, 1024);
        tier.insert("a".into(), 1, 10, HOUR, now);
        tier.insert("b".into(), 2, 10, HOUR, now);
        tier.insert("c".into(), 3, 10, HOUR, now);

        let evicted = tier.insert("d".into(), 4, 10, HOUR, now);
        assert_eq!(evicted, vec!["a".to_string()]);
        assert_eq!(tier.len(), 3);
        assert!(tier.get("a", now).is_none());
        assert_eq!(tier.get("d", now).map(|(v, _)| v), Some(4));
    }

    #[test]
    fn test_access_refreshes_recency() {
        let now = Instant::now();
        let mut tier = MemoryTier::new(3, 1024);
        tier.insert("a".into(), 1, 10, HOUR, now);
        tier.insert("b".into(), 2, 10, HOUR, now);
        tier.insert("c".into(), 3, 10, HOUR, now);
        assert!(tier.get("a", now).is_some());

        let evicted = tier.insert("d".into(), 4, 10, HOUR, now);
        assert_eq!(evicted, vec!["b".to_string()]);
        assert!(tier.contains("a"));
    }

    #[test]
    fn test_byte_bound_is_enforced() {
        let now = Instant::now();
        let mut tier = MemoryTier::new(100, 25);
        tier.insert("a".into(), 1, 10, HOUR, now);
        tier.insert("b".into(), 2, 10, HOUR, now);
        let evicted = tier.insert("c".into(), 3, 10, HOUR, now);
        assert_eq!(evicted, vec!["a".to_string()]);
        assert_eq!(tier.size_bytes(), 20);

        // 单个值超过字节上限时不写入
        assert!(tier.insert("huge".into(), 4, 26, HOUR, now).is_empty());
        assert!(!tier.contains("huge"));
        assert_eq!(tier.size_bytes(), 20);
    }

    #[test]
    fn test_overwrite_keeps_size_accounting() {
        let now = Instant::now();
        let mut tier = MemoryTier::new(10, 1024);
        tier.insert("a".into(), 1, 100, HOUR, now);
        tier.insert("a".into(), 2, 40, HOUR, now);
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.size_bytes(), 40);
        assert!(tier.remove("a"));
        assert_eq!(tier.size_bytes(), 0);
    }

    #[test]
    fn test_expired_entries_read_as_absent() {
        let now = Instant::now();
        let mut tier = MemoryTier::new(10, 1024);
        tier.insert("short".into(), 1, 10, Duration::from_millis(50), now);
        tier.insert("long".into(), 2, 10, HOUR, now);

        let (_, remaining) = tier.get("short", now + Duration::from_millis(10)).unwrap();
        assert_eq!(remaining, Duration::from_millis(40));

        let later = now + Duration::from_millis(50);
        assert!(tier.get("short", later).is_none());
        assert!(!tier.contains("short"));
        assert_eq!(tier.sweep_expired(now + HOUR), 1);
        assert!(tier.is_empty());
    }

    #[test]
    fn test_least_frequent_sweep_removes_fifth() {
        let now = Instant::now();
        let mut tier = MemoryTier::new(100, 1 << 20);
        for i in 0..10 {
            tier.insert(format!("k{i}"), i, 10, HOUR, now);
        }
        // k0 与 k1 从未被访问，其余至少访问一次
        for i in 2..10 {
            for _ in 0..i {
                tier.get(&format!("k{i}"), now);
            }
        }

        let mut victims = tier.evict_least_frequent(0.2);
        victims.sort();
        assert_eq!(victims, vec!["k0".to_string(), "k1".to_string()]);
        assert_eq!(tier.len(), 8);
    }

    #[test]
    fn test_frequency_ties_break_on_last_access() {
        let start = Instant::now();
        let mut tier = MemoryTier::new(100, 1 << 20);
        for key in ["old", "new", "hot"] {
            tier.insert(key.into(), 0, 10, HOUR, start);
        }
        tier.get("old", start + Duration::from_millis(1));
        tier.get("new", start + Duration::from_millis(2));
        tier.get("hot", start + Duration::from_millis(3));
        tier.get("hot", start + Duration::from_millis(4));

        assert_eq!(tier.evict_least_frequent(0.2), vec!["old".to_string()]);
    }

    #[test]
    fn test_resize_evicts_immediately() {
        let now = Instant::now();
        let mut tier = MemoryTier::new(10, 1024);
        for i in 0..6 {
            tier.insert(format!("k{i}"), i, 10, HOUR, now);
        }
        let evicted = tier.resize(4, 1024);
        assert_eq!(evicted.len(), 2);
        assert_eq!(tier.len(), 4);
        assert_eq!(tier.max_entries(), 4);
    }
}
