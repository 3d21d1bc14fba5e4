pub mod cache;
pub mod memory;

pub use cache::{
    AnalysisCache, CacheEntry, CacheStats, CacheTier, FileTier, MemoryTier, MultiTierCache,
    RedisTier, RiskLevel, TierEntry, TierKind, TierStats,
};
pub use memory::{
    MemoryController, MemoryProbe, MemorySnapshot, MemoryStats, ObjectPool, PoolStats,
    PooledObject, PressureLevel, ReclaimHook, SystemMemoryProbe,
};
