use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::validation::{ConfigValidator, ValidationUtils};
use crate::{AnalyzerError, AnalyzerResult};

/// 多级缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub l1: MemoryTierConfig,
    pub l2: RedisTierConfig,
    pub l3: FileTierConfig,
    /// 分析结果缓存超过该条目数时按访问频率淘汰20%，必须小于 `l1.max_entries`；
    /// L1 容量被重新配置时按同样比例缩放
    pub hard_cap: usize,
    pub sweep_interval_ms: u64,
    pub risk_ttl: RiskTtlConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            l1: MemoryTierConfig::default(),
            l2: RedisTierConfig::default(),
            l3: FileTierConfig::default(),
            hard_cap: 4_000,
            sweep_interval_ms: 60_000,
            risk_ttl: RiskTtlConfig::default(),
        }
    }
}

impl CacheConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// L1 进程内缓存
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryTierConfig {
    pub max_entries: usize,
    pub max_size_bytes: usize,
    pub default_ttl_seconds: u64,
}

impl Default for MemoryTierConfig {
    fn default() -> Self {
        Self {
            max_entries: 5_000,
            max_size_bytes: 64 * 1024 * 1024,
            default_ttl_seconds: 3_600,
        }
    }
}

impl MemoryTierConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }
}

/// L2 Redis 缓存，默认关闭
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisTierConfig {
    pub enabled: bool,
    pub redis_url: String,
    pub key_prefix: String,
    pub connection_timeout_seconds: u64,
}

impl Default for RedisTierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "analyzer:cache:".to_string(),
            connection_timeout_seconds: 5,
        }
    }
}

/// L3 文件缓存，只保存大于 `min_size_bytes` 的值
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileTierConfig {
    pub enabled: bool,
    pub directory: String,
    pub min_size_bytes: usize,
}

impl Default for FileTierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: ".analyzer-cache".to_string(),
            min_size_bytes: 16 * 1024,
        }
    }
}

/// 按风险等级区分的缓存有效期（秒）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskTtlConfig {
    pub critical_seconds: u64,
    pub high_seconds: u64,
    pub medium_seconds: u64,
    pub low_seconds: u64,
    pub none_seconds: u64,
}

impl Default for RiskTtlConfig {
    fn default() -> Self {
        Self {
            critical_seconds: 5 * 60,
            high_seconds: 15 * 60,
            medium_seconds: 60 * 60,
            low_seconds: 6 * 60 * 60,
            none_seconds: 24 * 60 * 60,
        }
    }
}

impl ConfigValidator for CacheConfig {
    fn validate(&self) -> AnalyzerResult<()> {
        ValidationUtils::validate_count(self.l1.max_entries, "cache.l1.max_entries", usize::MAX)?;
        ValidationUtils::validate_count(
            self.l1.max_size_bytes,
            "cache.l1.max_size_bytes",
            usize::MAX,
        )?;
        ValidationUtils::validate_count(self.hard_cap, "cache.hard_cap", usize::MAX)?;
        if self.hard_cap >= self.l1.max_entries {
            return Err(AnalyzerError::Configuration(format!(
                "cache.hard_cap ({}) must be below cache.l1.max_entries ({})",
                self.hard_cap, self.l1.max_entries
            )));
        }
        ValidationUtils::validate_positive_millis(
            self.sweep_interval_ms,
            "cache.sweep_interval_ms",
        )?;

        if self.l2.enabled {
            ValidationUtils::validate_not_empty(&self.l2.redis_url, "cache.l2.redis_url")?;
            if !self.l2.redis_url.starts_with("redis://")
                && !self.l2.redis_url.starts_with("rediss://")
            {
                return Err(AnalyzerError::Configuration(format!(
                    "cache.l2.redis_url must start with redis:// or rediss://, got {}",
                    self.l2.redis_url
                )));
            }
        }
        if self.l3.enabled {
            ValidationUtils::validate_not_empty(&self.l3.directory, "cache.l3.directory")?;
        }

        let ttl = &self.risk_ttl;
        for (value, name) in [
            (ttl.critical_seconds, "cache.risk_ttl.critical_seconds"),
            (ttl.high_seconds, "cache.risk_ttl.high_seconds"),
            (ttl.medium_seconds, "cache.risk_ttl.medium_seconds"),
            (ttl.low_seconds, "cache.risk_ttl.low_seconds"),
            (ttl.none_seconds, "cache.risk_ttl.none_seconds"),
        ] {
            ValidationUtils::validate_positive_millis(value, name)?;
        }
        Ok(())
    }
}
