use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::validation::{ConfigValidator, ValidationUtils};
use crate::{AnalyzerError, AnalyzerResult};

/// 可用CPU核数，获取失败时按1处理
pub fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// 任务调度器与Worker池配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    /// 排队任务总数达到该值后新提交立即被拒绝
    pub max_queue_size: usize,
    /// Worker完成这么多任务后被回收替换
    pub max_tasks_per_worker: u64,
    pub scale_interval_ms: u64,
    /// 队列长度超过该值时扩容
    pub scale_up_queue_threshold: usize,
    /// 忙碌Worker占比超过该值时扩容
    pub busy_ratio_threshold: f64,
    /// 空闲Worker超过该数量且队列为空时缩容
    pub scale_down_idle_threshold: usize,
    /// 协作式后端同时在途的任务上限
    pub max_in_flight: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let cores = available_cores();
        let min_workers = (cores / 2).max(1);
        Self {
            min_workers,
            max_workers: (cores * 2).max(min_workers),
            max_queue_size: 10_000,
            max_tasks_per_worker: 1_000,
            scale_interval_ms: 1_000,
            scale_up_queue_threshold: 10,
            busy_ratio_threshold: 0.8,
            scale_down_idle_threshold: 2,
            max_in_flight: cores.max(2),
        }
    }
}

impl SchedulerConfig {
    pub fn scale_interval(&self) -> Duration {
        Duration::from_millis(self.scale_interval_ms)
    }

    /// 固定大小的Worker池
    pub fn fixed(workers: usize) -> Self {
        Self {
            min_workers: workers,
            max_workers: workers,
            ..Self::default()
        }
    }
}

impl ConfigValidator for SchedulerConfig {
    fn validate(&self) -> AnalyzerResult<()> {
        ValidationUtils::validate_count(self.min_workers, "scheduler.min_workers", 1024)?;
        ValidationUtils::validate_count(self.max_workers, "scheduler.max_workers", 1024)?;
        if self.min_workers > self.max_workers {
            return Err(AnalyzerError::Configuration(format!(
                "scheduler.min_workers ({}) must not exceed scheduler.max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        ValidationUtils::validate_count(
            self.max_queue_size,
            "scheduler.max_queue_size",
            10_000_000,
        )?;
        if self.max_tasks_per_worker == 0 {
            return Err(AnalyzerError::Configuration(
                "scheduler.max_tasks_per_worker must be greater than 0".to_string(),
            ));
        }
        ValidationUtils::validate_positive_millis(
            self.scale_interval_ms,
            "scheduler.scale_interval_ms",
        )?;
        ValidationUtils::validate_ratio(
            self.busy_ratio_threshold,
            "scheduler.busy_ratio_threshold",
        )?;
        ValidationUtils::validate_count(self.max_in_flight, "scheduler.max_in_flight", 4096)?;
        Ok(())
    }
}
