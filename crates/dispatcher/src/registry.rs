use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;

use analyzer_core::traits::{TaskContext, TaskHandler};
use analyzer_core::AnalyzerResult;

/// 按任务类型标签查找处理器
///
/// 在执行器创建之前注册完毕，之后只读共享。
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(task_type.into(), handler);
    }

    pub fn with_handler(
        mut self,
        task_type: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Self {
        self.register(task_type, handler);
        self
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    pub fn unregister(&mut self, task_type: &str) -> bool {
        self.handlers.remove(task_type).is_some()
    }

    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("task_types", &self.task_types())
            .finish()
    }
}

type HandlerFn =
    dyn Fn(TaskContext) -> BoxFuture<'static, AnalyzerResult<serde_json::Value>> + Send + Sync;

/// 用闭包实现的处理器，方便组合根和测试注册简单任务体
pub struct FnHandler {
    name: String,
    func: Box<HandlerFn>,
}

impl FnHandler {
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AnalyzerResult<serde_json::Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(move |context| func(context).boxed()),
        }
    }

    pub fn arc<F, Fut>(name: impl Into<String>, func: F) -> Arc<dyn TaskHandler>
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AnalyzerResult<serde_json::Value>> + Send + 'static,
    {
        Arc::new(Self::new(name, func))
    }
}

#[async_trait]
impl TaskHandler for FnHandler {
    async fn handle(&self, context: TaskContext) -> AnalyzerResult<serde_json::Value> {
        (self.func)(context).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_and_lookup() {
        let mut registry = HandlerRegistry::new();
        registry.register(
            "echo",
            FnHandler::arc("echo", |ctx: TaskContext| async move { Ok(ctx.payload) }),
        );

        assert!(registry.contains("echo"));
        assert!(!registry.contains("missing"));
        assert_eq!(registry.task_types(), vec!["echo".to_string()]);

        let handler = registry.get("echo").unwrap();
        assert_eq!(handler.name(), "echo");
        let output = handler
            .handle(TaskContext {
                task_id: 1,
                task_type: "echo".to_string(),
                payload: json!({"k": 1}),
                attempt: 1,
                worker_id: None,
                dependencies: Vec::new(),
            })
            .await
            .unwrap();
        assert_eq!(output, json!({"k": 1}));

        assert!(registry.unregister("echo"));
        assert!(registry.is_empty());
    }
}
