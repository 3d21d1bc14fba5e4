//! 任务执行引擎
//!
//! - [`TaskScheduler`]: 带自动扩缩容与Worker回收的Worker池
//! - [`CooperativeExecutor`]: 只限制在途数量的协作式执行器
//! - [`dependency_graph`]: 依赖图校验与按拓扑序执行
//!
//! 两个后端都实现 [`Executor`]，共享同一套优先级队列与任务结算逻辑。

pub mod cooperative;
pub mod dependency_graph;
pub mod executor;
pub mod job;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod scheduler;
mod worker;

pub use cooperative::CooperativeExecutor;
pub use dependency_graph::{DependencyGraph, GraphNode};
pub use executor::Executor;
pub use job::TaskHandle;
pub use metrics::{ExecutorCounters, ExecutorStats};
pub use queue::PriorityQueue;
pub use registry::{FnHandler, HandlerRegistry};
pub use scheduler::TaskScheduler;
