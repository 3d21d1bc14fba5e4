use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AnalyzerResult;

/// 任务ID，由调度器单调分配，永不复用
pub type TaskId = u64;

/// 优先级档位数量（0 最高，4 最低）
pub const PRIORITY_LEVELS: usize = 5;

/// 任务优先级
///
/// 构造时总是被夹到 `[0, 4]`，调用方传入越界值不会报错。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskPriority(u8);

impl TaskPriority {
    pub const HIGHEST: TaskPriority = TaskPriority(0);
    pub const NORMAL: TaskPriority = TaskPriority(2);
    pub const LOWEST: TaskPriority = TaskPriority((PRIORITY_LEVELS - 1) as u8);

    pub fn clamped(raw: i64) -> Self {
        Self(raw.clamp(0, (PRIORITY_LEVELS - 1) as i64) as u8)
    }

    /// 对应优先级队列中的档位下标
    pub fn level(self) -> usize {
        self.0 as usize
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::NORMAL
    }
}

/// 任务提交请求
///
/// 调用方构造，尚未分配ID。调度器只检查类型、优先级、超时与重试次数，
/// `payload` 原样交给对应类型的任务处理器。
///
/// # 使用示例
///
/// ```rust
/// use analyzer_core::models::TaskSpec;
/// use serde_json::json;
/// use std::time::Duration;
///
/// let spec = TaskSpec::new("license_check", json!({"name": "left-pad"}))
///     .with_priority(0)
///     .with_timeout(Duration::from_secs(5))
///     .with_max_retries(2);
/// assert_eq!(spec.max_retries, 2);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_type: String,
    pub payload: serde_json::Value,
    pub priority: i64,
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    pub max_retries: u32,
    /// 前置任务ID，依赖图执行时由上游结果填入
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
}

impl TaskSpec {
    pub fn new(task_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            task_type: task_type.into(),
            payload,
            priority: TaskPriority::NORMAL.level() as i64,
            timeout: Duration::from_secs(30),
            max_retries: 0,
            dependencies: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<TaskId>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

/// 调度器内部持有的任务
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub priority: TaskPriority,
    pub timeout: Duration,
    pub max_retries: u32,
    pub dependencies: Vec<TaskId>,
    /// 已经开始执行的次数
    pub attempts: u32,
    pub submitted_at: DateTime<Utc>,
}

impl Task {
    pub fn from_spec(id: TaskId, spec: TaskSpec) -> Self {
        Self {
            id,
            task_type: spec.task_type,
            payload: spec.payload,
            priority: TaskPriority::clamped(spec.priority),
            timeout: spec.timeout,
            max_retries: spec.max_retries,
            dependencies: spec.dependencies,
            attempts: 0,
            submitted_at: Utc::now(),
        }
    }

    pub fn has_dependencies(&self) -> bool {
        !self.dependencies.is_empty()
    }

    /// 失败后是否还有重试机会
    pub fn can_retry(&self) -> bool {
        self.attempts <= self.max_retries
    }
}

/// 任务成功执行的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutput {
    pub task_id: TaskId,
    pub output: serde_json::Value,
    pub worker_id: Option<String>,
    pub attempts: u32,
    pub execution_time_ms: u64,
}

/// 单个任务的类型化结果，批量接口按输入顺序逐项返回
pub type TaskOutcome = AnalyzerResult<TaskOutput>;

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
