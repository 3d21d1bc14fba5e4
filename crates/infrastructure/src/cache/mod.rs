//! 多级缓存
//!
//! - L1 [`MemoryTier`]: 进程内LRU，按条目数与估算字节数限制
//! - L2 [`RedisTier`]: 可选，Redis原生过期
//! - L3 [`FileTier`]: 可选，只保存较大的值
//!
//! 下层命中会带着剩余有效期回填到所有未命中的上层。L2/L3 的任何故障
//! 只记录日志并按未命中处理，不会影响调用方。

pub mod analysis;
pub mod file_tier;
pub mod memory_tier;
pub mod multi_tier;
pub mod redis_tier;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use analyzer_core::AnalyzerResult;

pub use analysis::{AnalysisCache, RiskLevel};
pub use file_tier::FileTier;
pub use memory_tier::{CacheEntry, MemoryTier};
pub use multi_tier::MultiTierCache;
pub use redis_tier::RedisTier;

/// 缓存层级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TierKind {
    Memory,
    Redis,
    File,
}

impl TierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::Memory => "memory",
            TierKind::Redis => "redis",
            TierKind::File => "file",
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 下层缓存读出的原始值
#[derive(Debug, Clone)]
pub struct TierEntry {
    pub payload: Vec<u8>,
    /// None 表示该层没有过期时间，回填时使用默认TTL
    pub remaining_ttl: Option<Duration>,
}

/// L2/L3 缓存层接口，按序列化后的字节存取
#[async_trait]
pub trait CacheTier: Send + Sync {
    fn kind(&self) -> TierKind;

    async fn get(&self, key: &str) -> AnalyzerResult<Option<TierEntry>>;

    /// 返回该层是否实际保存了这个值
    async fn set(&self, key: &str, payload: &[u8], ttl: Duration) -> AnalyzerResult<bool>;

    async fn delete(&self, key: &str) -> AnalyzerResult<bool>;

    async fn clear(&self) -> AnalyzerResult<usize>;

    /// 清理过期数据；自带过期机制的层无需实现
    async fn sweep_expired(&self) -> AnalyzerResult<usize> {
        Ok(0)
    }
}

/// 单层缓存统计
#[derive(Debug, Clone, Serialize)]
pub struct TierStats {
    pub tier: TierKind,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    /// 条目数，只有L1能准确给出
    pub entries: Option<usize>,
    pub hit_rate: f64,
}

/// 缓存整体统计
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub tiers: Vec<TierStats>,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub entries: usize,
    pub size_bytes: usize,
    pub evictions: u64,
    /// 最近100次查找的平均耗时
    pub avg_response_time_ms: f64,
}

pub(crate) fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}
