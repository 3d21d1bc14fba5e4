use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{AnalyzerError, AnalyzerResult};

/// 缓存积极程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachingTier {
    Aggressive,
    Balanced,
    Conservative,
}

impl CachingTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CachingTier::Aggressive => "aggressive",
            CachingTier::Balanced => "balanced",
            CachingTier::Conservative => "conservative",
        }
    }
}

impl fmt::Display for CachingTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 处理模式，决定协调器选用哪个执行后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    Batch,
    Hybrid,
    Streaming,
}

impl ProcessingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::Batch => "batch",
            ProcessingMode::Hybrid => "hybrid",
            ProcessingMode::Streaming => "streaming",
        }
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 主动回收策略，同一时刻只有一个生效
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GcStrategy {
    /// 每10秒强制回收一次
    Aggressive,
    /// 每30秒强制回收一次
    Balanced,
    /// 从不定时强制回收
    Conservative,
}

impl GcStrategy {
    pub fn interval(&self) -> Option<Duration> {
        match self {
            GcStrategy::Aggressive => Some(Duration::from_secs(10)),
            GcStrategy::Balanced => Some(Duration::from_secs(30)),
            GcStrategy::Conservative => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GcStrategy::Aggressive => "aggressive",
            GcStrategy::Balanced => "balanced",
            GcStrategy::Conservative => "conservative",
        }
    }
}

impl Default for GcStrategy {
    fn default() -> Self {
        GcStrategy::Balanced
    }
}

/// 优化执行计划
///
/// 每次分析运行前根据工作量重新推导，不持久化。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationPlan {
    pub batch_size: usize,
    pub parallelism: usize,
    pub caching_tier: CachingTier,
    pub memory_ceiling_mb: f64,
    pub processing_mode: ProcessingMode,
}

impl OptimizationPlan {
    pub fn validate(&self) -> AnalyzerResult<()> {
        if self.batch_size == 0 {
            return Err(AnalyzerError::config_error(
                "plan.batch_size must be greater than 0",
            ));
        }
        if self.parallelism == 0 {
            return Err(AnalyzerError::config_error(
                "plan.parallelism must be greater than 0",
            ));
        }
        if !self.memory_ceiling_mb.is_finite() || self.memory_ceiling_mb <= 0.0 {
            return Err(AnalyzerError::config_error(format!(
                "plan.memory_ceiling_mb must be positive, got {}",
                self.memory_ceiling_mb
            )));
        }
        Ok(())
    }

    /// 与处理模式对应的回收策略
    pub fn gc_strategy(&self) -> GcStrategy {
        match self.processing_mode {
            ProcessingMode::Streaming => GcStrategy::Aggressive,
            ProcessingMode::Hybrid => GcStrategy::Balanced,
            ProcessingMode::Batch => GcStrategy::Conservative,
        }
    }

    /// 分配给缓存的内存预算（MB）
    pub fn cache_budget_mb(&self) -> f64 {
        let share = match self.caching_tier {
            CachingTier::Aggressive => 0.25,
            CachingTier::Balanced => 0.15,
            CachingTier::Conservative => 0.05,
        };
        self.memory_ceiling_mb * share
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> OptimizationPlan {
        OptimizationPlan {
            batch_size: 100,
            parallelism: 4,
            caching_tier: CachingTier::Balanced,
            memory_ceiling_mb: 1000.0,
            processing_mode: ProcessingMode::Hybrid,
        }
    }

    #[test]
    fn test_plan_validation() {
        assert!(plan().validate().is_ok());

        let mut invalid = plan();
        invalid.batch_size = 0;
        assert!(matches!(
            invalid.validate(),
            Err(AnalyzerError::Configuration(_))
        ));

        let mut invalid = plan();
        invalid.memory_ceiling_mb = f64::NAN;
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_derived_settings() {
        let plan = plan();
        assert_eq!(plan.gc_strategy(), GcStrategy::Balanced);
        assert!((plan.cache_budget_mb() - 150.0).abs() < 1e-9);
        assert_eq!(GcStrategy::Aggressive.interval(), Some(Duration::from_secs(10)));
        assert_eq!(GcStrategy::Conservative.interval(), None);
    }

    #[test]
    fn test_enum_serialization() {
        assert_eq!(
            serde_json::to_string(&CachingTier::Aggressive).unwrap(),
            "\"aggressive\""
        );
        let mode: ProcessingMode = serde_json::from_str("\"streaming\"").unwrap();
        assert_eq!(mode, ProcessingMode::Streaming);
    }
}
