pub mod plan;
pub mod task;
pub mod worker;

pub use plan::{CachingTier, GcStrategy, OptimizationPlan, ProcessingMode};
pub use task::{Task, TaskId, TaskOutcome, TaskOutput, TaskPriority, TaskSpec, PRIORITY_LEVELS};
pub use worker::{WorkerRecord, WorkerStatus};
