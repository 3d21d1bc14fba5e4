//! 执行器指标
//!
//! 计数通过 `metrics` 门面导出（由二进制安装的 recorder 决定去向），
//! 同时在执行器内部保留一份可直接读取的快照，供分析报告使用。

use std::time::Duration;

use ::metrics::{counter, gauge, histogram};
use serde::Serialize;

use analyzer_core::models::{WorkerRecord, PRIORITY_LEVELS};

const PRIORITY_LABELS: [&str; PRIORITY_LEVELS] = ["0", "1", "2", "3", "4"];

/// 执行器累计计数
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutorCounters {
    pub submitted: u64,
    pub rejected: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    /// 调用方放弃后被跳过或丢弃结果的任务
    pub abandoned: u64,
    pub workers_recycled: u64,
    pub scale_ups: u64,
    pub scale_downs: u64,
}

/// 执行器状态快照
#[derive(Debug, Clone, Serialize)]
pub struct ExecutorStats {
    pub backend: String,
    pub queue_depth: usize,
    pub queue_depth_by_priority: [usize; PRIORITY_LEVELS],
    pub in_flight: usize,
    pub workers: Vec<WorkerRecord>,
    pub peak_workers: usize,
    pub counters: ExecutorCounters,
    pub uptime_ms: u64,
    /// 启动以来每秒完成的任务数（近似值）
    pub throughput_per_sec: f64,
}

impl ExecutorStats {
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn busy_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.is_busy()).count()
    }
}

pub(crate) fn throughput(finished: u64, uptime: Duration) -> f64 {
    let secs = uptime.as_secs_f64();
    if secs <= f64::EPSILON {
        0.0
    } else {
        finished as f64 / secs
    }
}

pub(crate) fn record_submitted(backend: &'static str) {
    counter!("analyzer_tasks_submitted_total", "backend" => backend).increment(1);
}

pub(crate) fn record_rejected(backend: &'static str, reason: &'static str) {
    counter!("analyzer_tasks_rejected_total", "backend" => backend, "reason" => reason)
        .increment(1);
}

pub(crate) fn record_execution(backend: &'static str, elapsed: Duration) {
    histogram!("analyzer_task_execution_duration_seconds", "backend" => backend)
        .record(elapsed.as_secs_f64());
}

pub(crate) fn record_settlement(backend: &'static str, outcome: &'static str) {
    counter!("analyzer_tasks_total", "backend" => backend, "outcome" => outcome).increment(1);
}

pub(crate) fn record_timeout() {
    counter!("analyzer_tasks_timeout_total").increment(1);
}

pub(crate) fn record_queue_depth(backend: &'static str, depths: &[usize; PRIORITY_LEVELS]) {
    for (label, depth) in PRIORITY_LABELS.iter().zip(depths.iter()) {
        gauge!("analyzer_queue_depth", "backend" => backend, "priority" => *label)
            .set(*depth as f64);
    }
}

pub(crate) fn record_workers(total: usize, busy: usize) {
    gauge!("analyzer_workers_total").set(total as f64);
    gauge!("analyzer_workers_busy").set(busy as f64);
}

pub(crate) fn record_in_flight(backend: &'static str, in_flight: usize) {
    gauge!("analyzer_tasks_in_flight", "backend" => backend).set(in_flight as f64);
}

pub(crate) fn record_worker_recycled(reason: &'static str) {
    counter!("analyzer_workers_recycled_total", "reason" => reason).increment(1);
}

pub(crate) fn record_scale(direction: &'static str) {
    counter!("analyzer_workers_scaled_total", "direction" => direction).increment(1);
}
