use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use analyzer_core::models::{Task, TaskId, TaskOutcome, TaskOutput};
use analyzer_core::traits::TaskContext;
use analyzer_core::AnalyzerError;

use crate::metrics;
use crate::registry::HandlerRegistry;

/// 排队中的任务及其结果回传通道
#[derive(Debug)]
pub struct Job {
    pub task: Task,
    reply: oneshot::Sender<TaskOutcome>,
}

impl Job {
    pub fn new(task: Task) -> (Self, oneshot::Receiver<TaskOutcome>) {
        let (reply, rx) = oneshot::channel();
        (Self { task, reply }, rx)
    }

    /// 调用方已经放弃等待（超时或丢弃了句柄）
    pub fn is_abandoned(&self) -> bool {
        self.reply.is_closed()
    }

    pub fn complete(self, outcome: TaskOutcome) {
        if self.reply.send(outcome).is_err() {
            debug!("任务 {} 的调用方已不再等待结果，丢弃", self.task.id);
        }
    }
}

/// 提交成功后返回给调用方的句柄
///
/// 超时从提交时刻开始计算，覆盖排队与执行。超时后句柄立即返回
/// `TaskTimeout`，正在执行的任务体不会被打断，迟到的结果被丢弃。
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    rx: oneshot::Receiver<TaskOutcome>,
    timeout: Duration,
    deadline: Instant,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId, rx: oneshot::Receiver<TaskOutcome>, timeout: Duration) -> Self {
        Self {
            id,
            rx,
            timeout,
            deadline: Instant::now() + timeout,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub async fn wait(self) -> TaskOutcome {
        match tokio::time::timeout_at(self.deadline, self.rx).await {
            Ok(Ok(outcome)) => outcome,
            // 发送端在没有结果的情况下被丢弃，只会发生在执行器终止时
            Ok(Err(_)) => Err(AnalyzerError::ShuttingDown),
            Err(_) => {
                metrics::record_timeout();
                Err(AnalyzerError::TaskTimeout {
                    task_id: self.id,
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }
}

/// 一次执行的结果
#[derive(Debug)]
pub enum ExecutionResult {
    Success(serde_json::Value),
    Failed {
        error: AnalyzerError,
        retryable: bool,
    },
    /// 任务体panic，执行它的Worker需要被回收
    Fault(String),
}

impl ExecutionResult {
    pub fn is_fault(&self) -> bool {
        matches!(self, ExecutionResult::Fault(_))
    }
}

/// 执行结果落定后的去向
#[derive(Debug)]
pub enum Settlement {
    Completed,
    Failed,
    Retry(Job),
    /// 调用方已放弃，结果无人接收
    Abandoned,
}

/// 执行一次任务体
///
/// 任务体在独立的tokio任务中运行，panic会变成 `Fault` 而不会波及调用方。
pub async fn execute(
    registry: &HandlerRegistry,
    task: &Task,
    worker_id: Option<&str>,
) -> ExecutionResult {
    let Some(handler) = registry.get(&task.task_type) else {
        return ExecutionResult::Failed {
            error: AnalyzerError::execution(
                task.id,
                format!("未注册的任务类型: {}", task.task_type),
            ),
            retryable: false,
        };
    };

    let context = TaskContext {
        task_id: task.id,
        task_type: task.task_type.clone(),
        payload: task.payload.clone(),
        attempt: task.attempts,
        worker_id: worker_id.map(str::to_string),
        dependencies: task.dependencies.clone(),
    };
    if task.has_dependencies() {
        debug!("任务 {} 的前置任务: {:?}", task.id, task.dependencies);
    }

    match tokio::spawn(async move { handler.handle(context).await }).await {
        Ok(Ok(output)) => ExecutionResult::Success(output),
        Ok(Err(error)) => {
            let error = match error {
                AnalyzerError::TaskExecution { .. } => error,
                other => AnalyzerError::execution(task.id, other.to_string()),
            };
            ExecutionResult::Failed {
                error,
                retryable: true,
            }
        }
        Err(join_error) => {
            let message = if join_error.is_panic() {
                let panic = join_error.into_panic();
                panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "任务体panic".to_string())
            } else {
                "任务体被取消".to_string()
            };
            ExecutionResult::Fault(message)
        }
    }
}

/// 把执行结果交给调用方，或者在还有重试次数时交回队列
pub fn settle(
    job: Job,
    result: ExecutionResult,
    worker_id: Option<&str>,
    elapsed: Duration,
    backend: &'static str,
) -> Settlement {
    let elapsed_ms = elapsed.as_millis() as u64;
    metrics::record_execution(backend, elapsed);

    let (error, retryable) = match result {
        ExecutionResult::Success(output) => {
            if job.is_abandoned() {
                metrics::record_settlement(backend, "abandoned");
                return Settlement::Abandoned;
            }
            let output = TaskOutput {
                task_id: job.task.id,
                output,
                worker_id: worker_id.map(str::to_string),
                attempts: job.task.attempts,
                execution_time_ms: elapsed_ms,
            };
            job.complete(Ok(output));
            metrics::record_settlement(backend, "completed");
            return Settlement::Completed;
        }
        ExecutionResult::Failed { error, retryable } => (error, retryable),
        ExecutionResult::Fault(message) => (
            AnalyzerError::WorkerFault {
                worker_id: worker_id.unwrap_or(backend).to_string(),
                message,
            },
            true,
        ),
    };

    if job.is_abandoned() {
        metrics::record_settlement(backend, "abandoned");
        return Settlement::Abandoned;
    }

    if retryable && error.is_retryable() && job.task.can_retry() {
        debug!(
            "任务 {} 第 {} 次执行失败，重新入队: {}",
            job.task.id, job.task.attempts, error
        );
        metrics::record_settlement(backend, "retried");
        return Settlement::Retry(job);
    }

    warn!(
        task_id = job.task.id,
        task_type = %job.task.task_type,
        attempts = job.task.attempts,
        error_kind = error.kind(),
        "任务最终失败: {}",
        error
    );
    let error = match error {
        AnalyzerError::TaskExecution { task_id, message } if job.task.attempts > 1 => {
            AnalyzerError::TaskExecution {
                task_id,
                message: format!("{message} (共尝试{}次)", job.task.attempts),
            }
        }
        other => other,
    };
    job.complete(Err(error));
    metrics::record_settlement(backend, "failed");
    Settlement::Failed
}
