use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;

use analyzer_core::models::{TaskOutcome, TaskSpec};
use analyzer_core::AnalyzerResult;

use crate::dependency_graph::{run_graph, GraphNode};
use crate::job::TaskHandle;
use crate::metrics::ExecutorStats;

/// 执行后端的统一接口
///
/// Worker池（[`crate::TaskScheduler`]）和协作式执行器
/// （[`crate::CooperativeExecutor`]）共享优先级、背压、超时与重试规则，
/// 协调器按处理模式选择其一。
#[async_trait]
pub trait Executor: Send + Sync {
    /// 后端名称，用于日志与指标标签
    fn name(&self) -> &'static str;

    /// 同步地接受或拒绝一个任务，接受后返回可等待结果的句柄
    fn submit(&self, spec: TaskSpec) -> AnalyzerResult<TaskHandle>;

    /// 提交一批任务，按输入顺序返回每一项的结果
    ///
    /// 被拒绝的任务（队列已满、正在关闭）直接作为该项的错误返回。
    async fn submit_batch(&self, specs: Vec<TaskSpec>) -> Vec<TaskOutcome> {
        let handles: Vec<_> = specs.into_iter().map(|spec| self.submit(spec)).collect();
        join_all(handles.into_iter().map(|handle| async move {
            match handle {
                Ok(handle) => handle.wait().await,
                Err(e) => Err(e),
            }
        }))
        .await
    }

    /// 按依赖关系执行一组任务
    ///
    /// 先整体校验（未知依赖、自依赖、环），校验失败时什么都不会执行。
    async fn submit_graph(&self, nodes: Vec<GraphNode>) -> AnalyzerResult<Vec<TaskOutcome>> {
        run_graph(self, nodes).await
    }

    fn stats(&self) -> ExecutorStats;

    /// 停止接收新任务，在宽限期内等待排队任务完成，然后终止
    ///
    /// 宽限期结束后仍未完成的任务以 `ShuttingDown` 结束。
    async fn shutdown(&self, grace: Duration) -> AnalyzerResult<()>;
}
