use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Worker记录
///
/// 只由调度器的控制循环修改；Worker本身只通过消息回报执行结果。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub id: String,
    pub tasks_completed: u64,
    pub tasks_active: u32,
    pub avg_processing_time_ms: f64,
    pub error_count: u64,
    pub status: WorkerStatus,
    pub started_at: DateTime<Utc>,
}

/// Worker状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WorkerStatus {
    #[serde(rename = "idle")]
    Idle,
    #[serde(rename = "busy")]
    Busy,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "terminated")]
    Terminated,
}

impl WorkerRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tasks_completed: 0,
            tasks_active: 0,
            avg_processing_time_ms: 0.0,
            error_count: 0,
            status: WorkerStatus::Idle,
            started_at: Utc::now(),
        }
    }

    /// 检查Worker是否可以接受新任务
    pub fn is_available(&self) -> bool {
        matches!(self.status, WorkerStatus::Idle)
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.status, WorkerStatus::Busy)
    }

    pub fn mark_busy(&mut self) {
        self.status = WorkerStatus::Busy;
        self.tasks_active += 1;
    }

    /// 记录一次执行完成，更新滚动平均耗时
    pub fn record_completion(&mut self, duration_ms: u64) {
        self.tasks_active = self.tasks_active.saturating_sub(1);
        self.tasks_completed += 1;
        let n = self.tasks_completed as f64;
        self.avg_processing_time_ms += (duration_ms as f64 - self.avg_processing_time_ms) / n;
        self.status = WorkerStatus::Idle;
    }

    /// 记录一次Worker故障
    pub fn record_fault(&mut self) {
        self.tasks_active = self.tasks_active.saturating_sub(1);
        self.error_count += 1;
        self.status = WorkerStatus::Error;
    }

    pub fn mark_terminated(&mut self) {
        self.status = WorkerStatus::Terminated;
    }
}
