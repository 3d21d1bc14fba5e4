pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod traits;

pub use self::config::{AppConfig, ConfigValidator};
pub use errors::*;
pub use logging::{LogConfig, LogLevel, OutputFormat};
pub use models::{
    OptimizationPlan, Task, TaskId, TaskOutcome, TaskOutput, TaskPriority, TaskSpec,
    WorkerRecord, WorkerStatus,
};
pub use traits::{TaskContext, TaskHandler};
