//! 任务处理器接口定义
//!
//! 任务体（漏洞扫描、许可证检查、报告步骤等）对执行引擎来说是不透明的，
//! 调度器只关心任务的类型、优先级、超时、重试次数与依赖关系。
//! 每个任务类型对应一个 [`TaskHandler`]，在处理器注册表中按类型标签查找。
//!
//! ## 实现自定义处理器
//!
//! ```rust
//! use async_trait::async_trait;
//! use analyzer_core::traits::{TaskContext, TaskHandler};
//! use analyzer_core::AnalyzerResult;
//! use serde_json::{json, Value};
//!
//! pub struct LicenseCheckHandler;
//!
//! #[async_trait]
//! impl TaskHandler for LicenseCheckHandler {
//!     async fn handle(&self, context: TaskContext) -> AnalyzerResult<Value> {
//!         let name = context.payload["name"].as_str().unwrap_or_default();
//!         Ok(json!({"package": name, "risk_level": "low"}))
//!     }
//!
//!     fn name(&self) -> &str {
//!         "license_check"
//!     }
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{models::TaskId, AnalyzerResult};

/// 任务执行上下文
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    pub task_id: TaskId,
    pub task_type: String,
    pub payload: serde_json::Value,
    /// 第几次执行（从1开始）
    pub attempt: u32,
    /// 执行该任务的Worker，协作式后端下为空
    pub worker_id: Option<String>,
    /// 已成功完成的前置任务ID
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
}

/// 任务处理器
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// 执行任务体，返回的错误会被包装为该任务自己的失败结果
    async fn handle(&self, context: TaskContext) -> AnalyzerResult<serde_json::Value>;

    /// 处理器名称
    fn name(&self) -> &str;
}
