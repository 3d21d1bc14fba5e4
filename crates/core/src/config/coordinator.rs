use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::validation::{ConfigValidator, ValidationUtils};
use crate::AnalyzerResult;

/// 分析协调器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// 限制交给优化计划的CPU核数
    pub max_concurrency: Option<usize>,
    pub default_task_type: String,
    pub task_timeout_ms: u64,
    pub max_retries: u32,
    pub task_priority: i64,
    pub shutdown_grace_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            default_task_type: "package_analysis".to_string(),
            task_timeout_ms: 30_000,
            max_retries: 1,
            task_priority: 2,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl CoordinatorConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl ConfigValidator for CoordinatorConfig {
    fn validate(&self) -> AnalyzerResult<()> {
        if let Some(max) = self.max_concurrency {
            ValidationUtils::validate_count(max, "coordinator.max_concurrency", 1024)?;
        }
        ValidationUtils::validate_not_empty(
            &self.default_task_type,
            "coordinator.default_task_type",
        )?;
        ValidationUtils::validate_positive_millis(
            self.task_timeout_ms,
            "coordinator.task_timeout_ms",
        )?;
        Ok(())
    }
}
