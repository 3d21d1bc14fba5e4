use thiserror::Error;

/// 分析引擎错误类型定义
///
/// 单个任务的失败只会体现在该任务自己的结果上，不会中断调度器或同批次的其他任务。
#[derive(Debug, Clone, Error)]
pub enum AnalyzerError {
    #[error("任务队列已满: 容量 {capacity}")]
    QueueFull { capacity: usize },

    #[error("任务执行超时: 任务 {task_id} 超过 {timeout_ms}ms")]
    TaskTimeout { task_id: u64, timeout_ms: u64 },

    #[error("任务执行错误: 任务 {task_id} - {message}")]
    TaskExecution { task_id: u64, message: String },

    #[error("Worker故障: {worker_id} - {message}")]
    WorkerFault { worker_id: String, message: String },

    #[error("检测到循环依赖: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("无效的任务依赖: 节点 {node} 依赖 {dependency} - {reason}")]
    InvalidDependency {
        node: String,
        dependency: String,
        reason: String,
    },

    #[error("依赖任务失败: 节点 {node} 的依赖 {dependency} 未成功完成")]
    DependencyFailed { node: String, dependency: String },

    #[error("疑似内存泄漏: 最近采样增长 {trend_mb:.1}MB")]
    LeakSuspected { trend_mb: f64 },

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("调度器正在关闭")]
    ShuttingDown,

    #[error("缓存错误: {0}")]
    Cache(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("IO错误: {0}")]
    Io(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

pub type AnalyzerResult<T> = Result<T, AnalyzerError>;

impl AnalyzerError {
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn cache_error<S: Into<String>>(msg: S) -> Self {
        Self::Cache(msg.into())
    }

    pub fn execution<S: Into<String>>(task_id: u64, msg: S) -> Self {
        Self::TaskExecution {
            task_id,
            message: msg.into(),
        }
    }

    /// 任务体失败和Worker故障可以重试，其余错误重试也不会得到不同结果
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AnalyzerError::TaskExecution { .. } | AnalyzerError::WorkerFault { .. }
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AnalyzerError::Internal(_) | AnalyzerError::Configuration(_)
        )
    }

    /// 用于日志和指标标签的稳定错误类别名
    pub fn kind(&self) -> &'static str {
        match self {
            AnalyzerError::QueueFull { .. } => "queue_full",
            AnalyzerError::TaskTimeout { .. } => "task_timeout",
            AnalyzerError::TaskExecution { .. } => "task_execution",
            AnalyzerError::WorkerFault { .. } => "worker_fault",
            AnalyzerError::CyclicDependency { .. } => "cyclic_dependency",
            AnalyzerError::InvalidDependency { .. } => "invalid_dependency",
            AnalyzerError::DependencyFailed { .. } => "dependency_failed",
            AnalyzerError::LeakSuspected { .. } => "leak_suspected",
            AnalyzerError::Configuration(_) => "configuration",
            AnalyzerError::ShuttingDown => "shutting_down",
            AnalyzerError::Cache(_) => "cache",
            AnalyzerError::Serialization(_) => "serialization",
            AnalyzerError::Io(_) => "io",
            AnalyzerError::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for AnalyzerError {
    fn from(err: serde_json::Error) -> Self {
        AnalyzerError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AnalyzerError {
    fn from(err: std::io::Error) -> Self {
        AnalyzerError::Io(err.to_string())
    }
}

impl From<anyhow::Error> for AnalyzerError {
    fn from(err: anyhow::Error) -> Self {
        AnalyzerError::Internal(err.to_string())
    }
}

impl From<::config::ConfigError> for AnalyzerError {
    fn from(err: ::config::ConfigError) -> Self {
        AnalyzerError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AnalyzerError::execution(1, "boom").is_retryable());
        assert!(AnalyzerError::WorkerFault {
            worker_id: "worker-1".to_string(),
            message: "panic".to_string()
        }
        .is_retryable());
        assert!(!AnalyzerError::QueueFull { capacity: 10 }.is_retryable());
        assert!(!AnalyzerError::TaskTimeout {
            task_id: 1,
            timeout_ms: 100
        }
        .is_retryable());
    }

    #[test]
    fn test_cycle_message_lists_path() {
        let err = AnalyzerError::CyclicDependency {
            cycle: vec!["a".to_string(), "b".to_string(), "a".to_string()],
        };
        assert!(err.to_string().contains("a -> b -> a"));
        assert_eq!(err.kind(), "cyclic_dependency");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: AnalyzerError = io.into();
        assert!(matches!(err, AnalyzerError::Io(_)));
    }
}
