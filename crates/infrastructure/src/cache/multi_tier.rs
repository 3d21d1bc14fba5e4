use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use analyzer_core::config::{CacheConfig, MemoryTierConfig};
use analyzer_core::models::CachingTier;
use analyzer_core::AnalyzerResult;

use super::{hit_rate, CacheStats, CacheTier, FileTier, MemoryTier, RedisTier, TierKind, TierStats};

const LATENCY_WINDOW: usize = 100;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// 多级缓存
///
/// 查找顺序 L1 -> L2 -> L3，下层命中回填到所有上层。写入同时写到全部层，
/// 各层自行决定是否保存（例如L3只保存大值）。
pub struct MultiTierCache<V> {
    enabled: bool,
    l1: Mutex<MemoryTier<V>>,
    lower: Vec<Arc<dyn CacheTier>>,
    base_max_entries: usize,
    default_ttl: Duration,
    stats: Mutex<StatsState>,
    sweeper: Mutex<Option<SweeperHandle>>,
}

struct SweeperHandle {
    shutdown_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

#[derive(Default)]
struct TierCounters {
    hits: u64,
    misses: u64,
    errors: u64,
}

#[derive(Default)]
struct StatsState {
    tiers: Vec<TierCounters>,
    hits: u64,
    misses: u64,
    latencies_ms: VecDeque<f64>,
}

impl StatsState {
    fn tier(&mut self, index: usize) -> &mut TierCounters {
        if self.tiers.len() <= index {
            self.tiers.resize_with(index + 1, TierCounters::default);
        }
        &mut self.tiers[index]
    }

    fn record_latency(&mut self, elapsed: Duration) {
        if self.latencies_ms.len() == LATENCY_WINDOW {
            self.latencies_ms.pop_front();
        }
        self.latencies_ms.push_back(elapsed.as_secs_f64() * 1000.0);
    }
}

impl<V> MultiTierCache<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// 只有L1的缓存
    pub fn new(config: &MemoryTierConfig) -> Self {
        Self {
            enabled: true,
            l1: Mutex::new(MemoryTier::new(config.max_entries, config.max_size_bytes)),
            lower: Vec::new(),
            base_max_entries: config.max_entries,
            default_ttl: config.default_ttl(),
            stats: Mutex::new(StatsState::default()),
            sweeper: Mutex::new(None),
        }
    }

    /// 追加一个下层缓存，按追加顺序查找
    pub fn with_tier(mut self, tier: Arc<dyn CacheTier>) -> Self {
        self.lower.push(tier);
        self
    }

    /// 按配置建立各层；L2/L3 连接失败只记录警告并跳过该层
    pub async fn from_config(config: &CacheConfig) -> Self {
        let mut cache = Self::new(&config.l1);
        cache.enabled = config.enabled;
        if !config.enabled {
            info!("缓存已禁用");
            return cache;
        }

        if config.l2.enabled {
            match RedisTier::connect(&config.l2).await {
                Ok(tier) => cache = cache.with_tier(Arc::new(tier)),
                Err(e) => warn!("Redis缓存不可用，跳过L2: {}", e),
            }
        }
        if config.l3.enabled {
            match FileTier::open(&config.l3).await {
                Ok(tier) => cache = cache.with_tier(Arc::new(tier)),
                Err(e) => warn!("文件缓存不可用，跳过L3: {}", e),
            }
        }

        info!(
            "多级缓存初始化完成: {}",
            cache
                .tier_kinds()
                .iter()
                .map(|kind| kind.as_str())
                .collect::<Vec<_>>()
                .join(" -> ")
        );
        cache
    }

    pub fn tier_kinds(&self) -> Vec<TierKind> {
        std::iter::once(TierKind::Memory)
            .chain(self.lower.iter().map(|tier| tier.kind()))
            .collect()
    }

    fn l1(&self) -> MutexGuard<'_, MemoryTier<V>> {
        self.l1.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stats_state(&self) -> MutexGuard<'_, StatsState> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, key: &str) -> Option<V> {
        if !self.enabled {
            return None;
        }
        let started = Instant::now();

        let l1_hit = self.l1().get(key, started);
        if let Some((value, _)) = l1_hit {
            self.record_lookup(Some(0), started);
            return Some(value);
        }
        self.record_tier_miss(0);

        for (position, tier) in self.lower.iter().enumerate() {
            let index = position + 1;
            match tier.get(key).await {
                Ok(Some(entry)) => match serde_json::from_slice::<V>(&entry.payload) {
                    Ok(value) => {
                        debug!("{}层命中，回填上层: {}", tier.kind(), key);
                        self.promote(key, &value, &entry.payload, entry.remaining_ttl, position)
                            .await;
                        self.record_lookup(Some(index), started);
                        return Some(value);
                    }
                    Err(e) => {
                        warn!("{}层缓存值无法解析 {}: {}", tier.kind(), key, e);
                        self.record_tier_error(index, tier.kind());
                    }
                },
                Ok(None) => self.record_tier_miss(index),
                Err(e) => {
                    warn!("{}层缓存读取失败 {}: {}", tier.kind(), key, e);
                    self.record_tier_error(index, tier.kind());
                }
            }
        }

        self.record_lookup(None, started);
        None
    }

    /// 回填L1以及命中层之上的所有下层
    async fn promote(
        &self,
        key: &str,
        value: &V,
        payload: &[u8],
        remaining_ttl: Option<Duration>,
        hit_position: usize,
    ) {
        let remaining_ttl = remaining_ttl.unwrap_or(self.default_ttl);
        let evicted = self.l1().insert(
            key.to_string(),
            value.clone(),
            payload.len(),
            remaining_ttl,
            Instant::now(),
        );
        self.record_evictions(evicted.len());

        for tier in &self.lower[..hit_position] {
            if let Err(e) = tier.set(key, payload, remaining_ttl).await {
                warn!("{}层回填失败 {}: {}", tier.kind(), key, e);
            }
        }
    }

    /// 写入所有层；只有序列化失败会返回错误
    #[instrument(skip(self, value))]
    pub async fn set(&self, key: &str, value: V, ttl: Duration) -> AnalyzerResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let payload = serde_json::to_vec(&value)?;

        let evicted = self
            .l1()
            .insert(key.to_string(), value, payload.len(), ttl, Instant::now());
        if !evicted.is_empty() {
            debug!("L1淘汰 {} 个条目", evicted.len());
        }
        self.record_evictions(evicted.len());

        for (position, tier) in self.lower.iter().enumerate() {
            if let Err(e) = tier.set(key, &payload, ttl).await {
                warn!("{}层缓存写入失败 {}: {}", tier.kind(), key, e);
                self.record_tier_error(position + 1, tier.kind());
            }
        }
        self.update_entry_gauge();
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn invalidate(&self, key: &str) -> bool {
        let mut removed = self.l1().remove(key);
        for tier in &self.lower {
            match tier.delete(key).await {
                Ok(deleted) => removed |= deleted,
                Err(e) => warn!("{}层缓存删除失败 {}: {}", tier.kind(), key, e),
            }
        }
        self.update_entry_gauge();
        removed
    }

    /// 清空全部层，返回L1清除的条目数
    pub async fn clear(&self) -> usize {
        let cleared = self.l1().clear();
        for tier in &self.lower {
            if let Err(e) = tier.clear().await {
                warn!("{}层缓存清空失败: {}", tier.kind(), e);
            }
        }
        self.update_entry_gauge();
        info!("缓存已清空: L1 {} 个条目", cleared);
        cleared
    }

    /// 只清理L1中的过期条目，可作为同步回收钩子使用
    pub fn sweep_memory_tier(&self) -> usize {
        let removed = self.l1().sweep_expired(Instant::now());
        if removed > 0 {
            self.update_entry_gauge();
        }
        removed
    }

    /// 清理所有层的过期条目
    pub async fn sweep_expired(&self) -> usize {
        let mut removed = self.sweep_memory_tier();
        for tier in &self.lower {
            match tier.sweep_expired().await {
                Ok(count) => removed += count,
                Err(e) => warn!("{}层过期清理失败: {}", tier.kind(), e),
            }
        }
        removed
    }

    /// 按访问频率从L1淘汰 `fraction` 比例的条目
    pub fn evict_least_frequent(&self, fraction: f64) -> Vec<String> {
        let victims = self.l1().evict_least_frequent(fraction);
        self.record_evictions(victims.len());
        self.update_entry_gauge();
        victims
    }

    /// 按缓存积极程度与内存预算重新设定L1上限，上限变小时立即淘汰
    pub fn reconfigure(&self, tier: CachingTier, memory_budget_mb: f64) {
        let factor = match tier {
            CachingTier::Aggressive => 2.0,
            CachingTier::Balanced => 1.0,
            CachingTier::Conservative => 0.5,
        };
        let max_entries = ((self.base_max_entries as f64) * factor).round().max(1.0) as usize;
        let max_size_bytes = (memory_budget_mb.max(0.0) * BYTES_PER_MB).max(1.0) as usize;

        let evicted = self.l1().resize(max_entries, max_size_bytes);
        self.record_evictions(evicted.len());
        self.update_entry_gauge();
        info!(
            "缓存重新配置: tier={}, max_entries={}, max_size={:.1}MB, 淘汰 {} 个条目",
            tier,
            max_entries,
            memory_budget_mb,
            evicted.len()
        );
    }

    pub fn len(&self) -> usize {
        self.l1().len()
    }

    pub fn is_empty(&self) -> bool {
        self.l1().is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.l1().size_bytes()
    }

    pub fn max_entries(&self) -> usize {
        self.l1().max_entries()
    }

    pub fn max_size_bytes(&self) -> usize {
        self.l1().max_size_bytes()
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, size_bytes, evictions) = {
            let l1 = self.l1();
            (l1.len(), l1.size_bytes(), l1.evictions())
        };
        let kinds = self.tier_kinds();
        let state = self.stats_state();

        let tiers = kinds
            .into_iter()
            .enumerate()
            .map(|(index, kind)| {
                let (hits, misses, errors) = state
                    .tiers
                    .get(index)
                    .map(|c| (c.hits, c.misses, c.errors))
                    .unwrap_or_default();
                TierStats {
                    tier: kind,
                    hits,
                    misses,
                    errors,
                    entries: (kind == TierKind::Memory).then_some(entries),
                    hit_rate: hit_rate(hits, misses),
                }
            })
            .collect();

        let avg_response_time_ms = if state.latencies_ms.is_empty() {
            0.0
        } else {
            state.latencies_ms.iter().sum::<f64>() / state.latencies_ms.len() as f64
        };

        CacheStats {
            tiers,
            hits: state.hits,
            misses: state.misses,
            hit_rate: hit_rate(state.hits, state.misses),
            entries,
            size_bytes,
            evictions,
            avg_response_time_ms,
        }
    }

    /// 启动定期过期清理；已在运行时不重复启动
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) {
        let mut slot = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let cache = Arc::downgrade(self);
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let Some(cache) = cache.upgrade() else { break };
                        let removed = cache.sweep_expired().await;
                        if removed > 0 {
                            debug!("定期清理过期缓存 {} 个", removed);
                        }
                    }
                }
            }
            debug!("缓存清理任务已停止");
        });

        *slot = Some(SweeperHandle { shutdown_tx, join });
        debug!("缓存清理任务已启动: 间隔 {:?}", interval);
    }

    pub fn sweeper_running(&self) -> bool {
        self.sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// 停止定期清理任务
    pub async fn dispose(&self) {
        let handle = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.shutdown_tx.send(());
            let _ = handle.join.await;
        }
    }

    fn record_lookup(&self, hit_tier: Option<usize>, started: Instant) {
        let elapsed = started.elapsed();
        {
            let mut state = self.stats_state();
            match hit_tier {
                Some(index) => {
                    state.tier(index).hits += 1;
                    state.hits += 1;
                }
                None => state.misses += 1,
            }
            state.record_latency(elapsed);
        }

        let outcome = if hit_tier.is_some() { "hit" } else { "miss" };
        counter!("analyzer_cache_lookups_total", "outcome" => outcome).increment(1);
        histogram!("analyzer_cache_lookup_duration_seconds").record(elapsed.as_secs_f64());
        if let Some(index) = hit_tier {
            if let Some(kind) = self.tier_kinds().get(index) {
                counter!("analyzer_cache_hits_total", "tier" => kind.as_str()).increment(1);
            }
        }
    }

    fn record_tier_miss(&self, index: usize) {
        self.stats_state().tier(index).misses += 1;
    }

    fn record_tier_error(&self, index: usize, kind: TierKind) {
        {
            let mut state = self.stats_state();
            let counters = state.tier(index);
            counters.errors += 1;
            counters.misses += 1;
        }
        counter!("analyzer_cache_errors_total", "tier" => kind.as_str()).increment(1);
    }

    fn record_evictions(&self, count: usize) {
        if count > 0 {
            counter!("analyzer_cache_evictions_total").increment(count as u64);
        }
    }

    fn update_entry_gauge(&self) {
        let (entries, size_bytes) = {
            let l1 = self.l1();
            (l1.len(), l1.size_bytes())
        };
        gauge!("analyzer_cache_entries").set(entries as f64);
        gauge!("analyzer_cache_size_bytes").set(size_bytes as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analyzer_core::AnalyzerError;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    use crate::cache::TierEntry;

    /// 记录写入的内存下层，可模拟故障
    #[derive(Default)]
    struct RecordingTier {
        data: Mutex<HashMap<String, Vec<u8>>>,
        written_ttls: Mutex<Vec<Duration>>,
        /// None 模拟没有过期时间的键
        remaining_ttl: Option<Duration>,
        failing: bool,
    }

    #[async_trait]
    impl CacheTier for RecordingTier {
        fn kind(&self) -> TierKind {
            TierKind::File
        }

        async fn get(&self, key: &str) -> AnalyzerResult<Option<TierEntry>> {
            if self.failing {
                return Err(AnalyzerError::cache_error("down"));
            }
            Ok(self.data.lock().unwrap().get(key).map(|payload| TierEntry {
                payload: payload.clone(),
                remaining_ttl: self.remaining_ttl,
            }))
        }

        async fn set(&self, key: &str, payload: &[u8], ttl: Duration) -> AnalyzerResult<bool> {
            if self.failing {
                return Err(AnalyzerError::cache_error("down"));
            }
            self.written_ttls.lock().unwrap().push(ttl);
            self.data
                .lock()
                .unwrap()
                .insert(key.to_string(), payload.to_vec());
            Ok(true)
        }

        async fn delete(&self, key: &str) -> AnalyzerResult<bool> {
            Ok(self.data.lock().unwrap().remove(key).is_some())
        }

        async fn clear(&self) -> AnalyzerResult<usize> {
            let mut data = self.data.lock().unwrap();
            let count = data.len();
            data.clear();
            Ok(count)
        }
    }

    fn l1_config(max_entries: usize) -> MemoryTierConfig {
        MemoryTierConfig {
            max_entries,
            max_size_bytes: 1 << 20,
            default_ttl_seconds: 60,
        }
    }

    #[tokio::test]
    async fn test_set_then_get_before_and_after_ttl() {
        let cache: MultiTierCache<Value> = MultiTierCache::new(&l1_config(10));
        cache
            .set("k", json!({"v": 1}), Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await, Some(json!({"v": 1})));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.get("k").await, None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_lower_tier_hit_is_promoted() {
        let lower = Arc::new(RecordingTier::default());
        lower
            .data
            .lock()
            .unwrap()
            .insert("k".to_string(), serde_json::to_vec(&json!("from-lower")).unwrap());

        let cache: MultiTierCache<Value> =
            MultiTierCache::new(&l1_config(10)).with_tier(lower.clone());
        assert_eq!(cache.get("k").await, Some(json!("from-lower")));
        assert_eq!(cache.len(), 1);

        // 第二次直接命中L1
        lower.data.lock().unwrap().clear();
        assert_eq!(cache.get("k").await, Some(json!("from-lower")));

        let stats = cache.stats();
        assert_eq!(stats.tiers.len(), 2);
        assert_eq!(stats.tiers[0].hits, 1);
        assert_eq!(stats.tiers[0].misses, 1);
        assert_eq!(stats.tiers[1].hits, 1);
    }

    #[tokio::test]
    async fn test_promotion_keeps_lower_tier_ttl() {
        let upper = Arc::new(RecordingTier::default());
        let lower = Arc::new(RecordingTier {
            remaining_ttl: Some(Duration::from_secs(30)),
            ..Default::default()
        });
        lower
            .data
            .lock()
            .unwrap()
            .insert("k".to_string(), serde_json::to_vec(&json!(1)).unwrap());

        let cache: MultiTierCache<Value> = MultiTierCache::new(&l1_config(10))
            .with_tier(upper.clone())
            .with_tier(lower);
        assert_eq!(cache.get("k").await, Some(json!(1)));
        assert_eq!(
            *upper.written_ttls.lock().unwrap(),
            vec![Duration::from_secs(30)]
        );
    }

    #[tokio::test]
    async fn test_promotion_without_expiry_uses_default_ttl() {
        let upper = Arc::new(RecordingTier::default());
        let lower = Arc::new(RecordingTier::default());
        lower
            .data
            .lock()
            .unwrap()
            .insert("k".to_string(), serde_json::to_vec(&json!(1)).unwrap());

        let cache: MultiTierCache<Value> = MultiTierCache::new(&l1_config(10))
            .with_tier(upper.clone())
            .with_tier(lower.clone());
        assert_eq!(cache.get("k").await, Some(json!(1)));

        // 回填用L1的默认TTL，而不是无限期
        assert_eq!(
            *upper.written_ttls.lock().unwrap(),
            vec![Duration::from_secs(60)]
        );
    }

    #[tokio::test]
    async fn test_failing_lower_tier_degrades_to_miss() {
        let lower = Arc::new(RecordingTier {
            failing: true,
            ..Default::default()
        });
        let cache: MultiTierCache<Value> = MultiTierCache::new(&l1_config(10)).with_tier(lower);

        cache
            .set("k", json!(1), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await, Some(json!(1)));
        assert_eq!(cache.get("missing").await, None);
        assert!(cache.stats().tiers[1].errors >= 2);
    }

    #[tokio::test]
    async fn test_entry_bound_evicts_lru() {
        let cache: MultiTierCache<Value> = MultiTierCache::new(&l1_config(3));
        for key in ["a", "b", "c", "d"] {
            cache
                .set(key, json!(key), Duration::from_secs(60))
                .await
                .unwrap();
        }
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.get("d").await, Some(json!("d")));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let lower = Arc::new(RecordingTier::default());
        let cache: MultiTierCache<Value> =
            MultiTierCache::new(&l1_config(10)).with_tier(lower.clone());
        cache.set("a", json!(1), Duration::from_secs(60)).await.unwrap();
        cache.set("b", json!(2), Duration::from_secs(60)).await.unwrap();

        assert!(cache.invalidate("a").await);
        assert!(!lower.data.lock().unwrap().contains_key("a"));
        assert_eq!(cache.get("a").await, None);

        assert_eq!(cache.clear().await, 1);
        assert!(cache.is_empty());
        assert!(lower.data.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reconfigure_shrinks_caps() {
        let cache: MultiTierCache<Value> = MultiTierCache::new(&l1_config(10));
        for i in 0..8 {
            cache
                .set(&format!("k{i}"), json!(i), Duration::from_secs(60))
                .await
                .unwrap();
        }

        cache.reconfigure(CachingTier::Conservative, 1.0);
        assert_eq!(cache.max_entries(), 5);
        assert_eq!(cache.max_size_bytes(), 1024 * 1024);
        assert_eq!(cache.len(), 5);

        cache.reconfigure(CachingTier::Aggressive, 2.0);
        assert_eq!(cache.max_entries(), 20);
    }

    #[tokio::test]
    async fn test_disabled_cache_is_noop() {
        let config = CacheConfig {
            enabled: false,
            ..Default::default()
        };
        let cache: MultiTierCache<Value> = MultiTierCache::from_config(&config).await;
        cache.set("k", json!(1), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await, None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_sweeper_removes_expired_and_stops_on_dispose() {
        let cache: Arc<MultiTierCache<Value>> = Arc::new(MultiTierCache::new(&l1_config(10)));
        cache.set("short", json!(1), Duration::from_millis(20)).await.unwrap();
        cache.set("long", json!(2), Duration::from_secs(60)).await.unwrap();

        cache.start_sweeper(Duration::from_millis(30));
        assert!(cache.sweeper_running());
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(cache.len(), 1);

        cache.dispose().await;
        assert!(!cache.sweeper_running());
    }
}
