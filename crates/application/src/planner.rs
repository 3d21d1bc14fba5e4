//! 优化计划推导
//!
//! 纯函数：只依赖待分析条目数、可用内存与CPU核数，不读取任何全局状态。

use serde::Serialize;
use tracing::debug;

use analyzer_core::config::SchedulerConfig;
use analyzer_core::models::{CachingTier, OptimizationPlan, ProcessingMode};

const MEMORY_CEILING_RATIO: f64 = 0.75;
const MAX_PARALLELISM: usize = 16;

/// 工作量画像
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WorkloadProfile {
    pub item_count: usize,
    pub available_memory_mb: f64,
    pub available_cores: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OptimizationPlanner;

impl OptimizationPlanner {
    pub fn plan(&self, profile: WorkloadProfile) -> OptimizationPlan {
        let n = profile.item_count;
        let plan = OptimizationPlan {
            batch_size: batch_size(n),
            parallelism: parallelism(n, profile.available_cores),
            caching_tier: caching_tier(n, profile.available_memory_mb),
            memory_ceiling_mb: profile.available_memory_mb * MEMORY_CEILING_RATIO,
            processing_mode: processing_mode(n),
        };
        debug!(
            "优化计划: items={}, mem={:.0}MB, cores={} -> batch={}, parallelism={}, cache={}, mode={}, ceiling={:.0}MB",
            n,
            profile.available_memory_mb,
            profile.available_cores,
            plan.batch_size,
            plan.parallelism,
            plan.caching_tier,
            plan.processing_mode,
            plan.memory_ceiling_mb
        );
        plan
    }

    /// 把计划套用到调度器配置上
    ///
    /// Worker上限取并行度，下限不超过并行度；队列容量至少能容纳两轮完整批次。
    pub fn scheduler_config(&self, plan: &OptimizationPlan, base: &SchedulerConfig) -> SchedulerConfig {
        let parallelism = plan.parallelism.max(1);
        let min_workers = base.min_workers.min(parallelism).max(1);
        SchedulerConfig {
            min_workers,
            max_workers: parallelism,
            max_queue_size: base
                .max_queue_size
                .max(plan.batch_size.saturating_mul(parallelism).saturating_mul(2)),
            max_in_flight: parallelism,
            ..base.clone()
        }
    }
}

pub fn batch_size(n: usize) -> usize {
    let size = if n > 10_000 {
        500.min(n.div_ceil(20))
    } else if n > 1_000 {
        100.min(n.div_ceil(10))
    } else {
        50.min(n)
    };
    size.max(1)
}

pub fn parallelism(n: usize, cores: usize) -> usize {
    let cores = cores.max(1);
    (2 * cores).min(2.max(n.div_ceil(100))).min(MAX_PARALLELISM)
}

pub fn caching_tier(n: usize, available_memory_mb: f64) -> CachingTier {
    if available_memory_mb > 2048.0 && n > 1_000 {
        CachingTier::Aggressive
    } else if available_memory_mb > 1024.0 {
        CachingTier::Balanced
    } else {
        CachingTier::Conservative
    }
}

pub fn processing_mode(n: usize) -> ProcessingMode {
    if n > 5_000 {
        ProcessingMode::Streaming
    } else if n > 500 {
        ProcessingMode::Hybrid
    } else {
        ProcessingMode::Batch
    }
}
