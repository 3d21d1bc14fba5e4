pub mod app_config;
pub mod cache;
pub mod coordinator;
pub mod memory;
pub mod scheduler;
pub mod validation;

pub use app_config::AppConfig;
pub use cache::{CacheConfig, FileTierConfig, MemoryTierConfig, RedisTierConfig, RiskTtlConfig};
pub use coordinator::CoordinatorConfig;
pub use memory::MemoryConfig;
pub use scheduler::{available_cores, SchedulerConfig};
pub use validation::{ConfigValidator, ValidationUtils};
