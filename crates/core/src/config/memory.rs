use serde::{Deserialize, Serialize};

use super::validation::{ConfigValidator, ValidationUtils};
use crate::models::GcStrategy;
use crate::{AnalyzerError, AnalyzerResult};

/// 内存压力控制配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// 进程内存上限（MB），未设置时由优化计划推导
    pub ceiling_mb: Option<f64>,
    pub gc_strategy: GcStrategy,
    /// 保留的采样数
    pub sample_window: usize,
    /// 泄漏检测观察的最近采样数
    pub leak_window: usize,
    /// 窗口内增长超过该值判定疑似泄漏
    pub leak_threshold_mb: f64,
    /// 使用率达到该比例视为压力偏高
    pub elevated_ratio: f64,
    /// 使用率达到该比例视为压力严重
    pub critical_ratio: f64,
    /// 流式批次之间超过该比例即强制回收
    pub streaming_collect_ratio: f64,
    pub sample_interval_ms: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            ceiling_mb: None,
            gc_strategy: GcStrategy::Balanced,
            sample_window: 100,
            leak_window: 10,
            leak_threshold_mb: 5.0,
            elevated_ratio: 0.8,
            critical_ratio: 0.95,
            streaming_collect_ratio: 0.8,
            sample_interval_ms: 5_000,
        }
    }
}

impl ConfigValidator for MemoryConfig {
    fn validate(&self) -> AnalyzerResult<()> {
        if let Some(ceiling) = self.ceiling_mb {
            if !ceiling.is_finite() || ceiling <= 0.0 {
                return Err(AnalyzerError::Configuration(format!(
                    "memory.ceiling_mb must be positive, got {ceiling}"
                )));
            }
        }
        ValidationUtils::validate_count(self.sample_window, "memory.sample_window", 100_000)?;
        ValidationUtils::validate_count(self.leak_window, "memory.leak_window", self.sample_window)?;
        if self.leak_window < 2 {
            return Err(AnalyzerError::Configuration(
                "memory.leak_window must be at least 2".to_string(),
            ));
        }
        if !(self.leak_threshold_mb > 0.0) {
            return Err(AnalyzerError::Configuration(
                "memory.leak_threshold_mb must be positive".to_string(),
            ));
        }
        ValidationUtils::validate_ratio(self.elevated_ratio, "memory.elevated_ratio")?;
        ValidationUtils::validate_ratio(self.critical_ratio, "memory.critical_ratio")?;
        if self.elevated_ratio > self.critical_ratio {
            return Err(AnalyzerError::Configuration(
                "memory.elevated_ratio must not exceed memory.critical_ratio".to_string(),
            ));
        }
        ValidationUtils::validate_ratio(
            self.streaming_collect_ratio,
            "memory.streaming_collect_ratio",
        )?;
        ValidationUtils::validate_positive_millis(
            self.sample_interval_ms,
            "memory.sample_interval_ms",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(MemoryConfig::default().validate().is_ok());
    }

    #[test]
    fn test_leak_window_must_fit_sample_window() {
        let config = MemoryConfig {
            sample_window: 5,
            leak_window: 10,
            ..MemoryConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ratio_ordering() {
        let config = MemoryConfig {
            elevated_ratio: 0.97,
            critical_ratio: 0.95,
            ..MemoryConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
