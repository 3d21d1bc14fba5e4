//! 包分析结果缓存：内容寻址的键 + 按风险等级区分的有效期

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use analyzer_core::config::{CacheConfig, RiskTtlConfig};
use analyzer_core::{AnalyzerError, AnalyzerResult};

use super::{CacheStats, MultiTierCache};

/// 参与缓存键计算的包元数据字段，其余字段变化不影响缓存命中
pub const KEY_FIELDS: [&str; 8] = [
    "name",
    "version",
    "scripts",
    "author",
    "description",
    "maintainers",
    "keywords",
    "repository",
];

const OVERFLOW_EVICT_FRACTION: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Critical,
    High,
    Medium,
    Low,
    None,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Critical => "critical",
            RiskLevel::High => "high",
            RiskLevel::Medium => "medium",
            RiskLevel::Low => "low",
            RiskLevel::None => "none",
        }
    }

    /// 未知或缺失的等级按 `None` 处理
    pub fn from_label(label: Option<&str>) -> Self {
        label
            .and_then(|label| label.parse().ok())
            .unwrap_or(RiskLevel::None)
    }

    /// 读取分析结果里的 `risk_level` 字段
    pub fn of_result(result: &Value) -> Self {
        Self::from_label(result.get("risk_level").and_then(Value::as_str))
    }
}

impl FromStr for RiskLevel {
    type Err = AnalyzerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(RiskLevel::Critical),
            "high" => Ok(RiskLevel::High),
            "medium" => Ok(RiskLevel::Medium),
            "low" => Ok(RiskLevel::Low),
            "none" => Ok(RiskLevel::None),
            other => Err(AnalyzerError::Serialization(format!(
                "未知的风险等级: {other}"
            ))),
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 计算包的缓存键：只取 [`KEY_FIELDS`]，缺失字段记为 null，
/// 以键名有序的JSON做SHA-256
pub fn cache_key<T: Serialize>(package: &T) -> AnalyzerResult<String> {
    let value = serde_json::to_value(package)?;
    let mut canonical = Map::new();
    for field in KEY_FIELDS {
        let field_value = value.get(field).cloned().unwrap_or(Value::Null);
        canonical.insert(field.to_string(), field_value);
    }
    let bytes = serde_json::to_vec(&Value::Object(canonical))?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

pub struct AnalysisCache {
    cache: Arc<MultiTierCache<Value>>,
    risk_ttl: RiskTtlConfig,
    hard_cap: usize,
    base_max_entries: usize,
}

impl AnalysisCache {
    pub fn new(cache: Arc<MultiTierCache<Value>>, config: &CacheConfig) -> Self {
        Self {
            cache,
            risk_ttl: config.risk_ttl.clone(),
            hard_cap: config.hard_cap,
            base_max_entries: config.l1.max_entries.max(1),
        }
    }

    pub async fn from_config(config: &CacheConfig) -> Self {
        let cache = Arc::new(MultiTierCache::from_config(config).await);
        Self::new(cache, config)
    }

    pub fn inner(&self) -> &Arc<MultiTierCache<Value>> {
        &self.cache
    }

    /// 当前生效的条目硬上限
    ///
    /// 随L1容量按比例缩放，并始终低于L1容量，保证LRU淘汰之前先按访问频率淘汰
    pub fn hard_cap(&self) -> usize {
        let l1_cap = self.cache.max_entries();
        let scaled = (self.hard_cap as u128 * l1_cap as u128 / self.base_max_entries as u128)
            .min(usize::MAX as u128) as usize;
        scaled.min(l1_cap.saturating_sub(1)).max(1)
    }

    pub fn ttl_for(&self, risk: RiskLevel) -> Duration {
        let seconds = match risk {
            RiskLevel::Critical => self.risk_ttl.critical_seconds,
            RiskLevel::High => self.risk_ttl.high_seconds,
            RiskLevel::Medium => self.risk_ttl.medium_seconds,
            RiskLevel::Low => self.risk_ttl.low_seconds,
            RiskLevel::None => self.risk_ttl.none_seconds,
        };
        Duration::from_secs(seconds)
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.cache.get(key).await
    }

    /// 按结果的风险等级写入；条目数超过硬上限时淘汰访问最少的20%
    pub async fn set(&self, key: &str, result: Value) -> AnalyzerResult<()> {
        let risk = RiskLevel::of_result(&result);
        let ttl = self.ttl_for(risk);
        debug!("缓存分析结果 {}: risk={}, ttl={:?}", key, risk, ttl);
        self.cache.set(key, result, ttl).await?;

        let len = self.cache.len();
        let hard_cap = self.hard_cap();
        if len > hard_cap {
            let evicted = self.cache.evict_least_frequent(OVERFLOW_EVICT_FRACTION);
            info!(
                "分析缓存超过上限 {} ({}), 按访问频率淘汰 {} 个条目",
                hard_cap,
                len,
                evicted.len()
            );
        }
        Ok(())
    }

    pub async fn get_package<T: Serialize>(&self, package: &T) -> AnalyzerResult<Option<Value>> {
        let key = cache_key(package)?;
        Ok(self.get(&key).await)
    }

    pub async fn set_package<T: Serialize>(&self, package: &T, result: Value) -> AnalyzerResult<()> {
        let key = cache_key(package)?;
        self.set(&key, result).await
    }

    pub async fn invalidate(&self, key: &str) -> bool {
        self.cache.invalidate(key).await
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
