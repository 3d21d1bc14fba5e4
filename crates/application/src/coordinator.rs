use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use analyzer_core::config::{
    available_cores, AppConfig, CoordinatorConfig, SchedulerConfig,
};
use analyzer_core::models::{OptimizationPlan, ProcessingMode, TaskOutcome, TaskSpec};
use analyzer_core::{AnalyzerError, AnalyzerResult};
use analyzer_dispatcher::{
    CooperativeExecutor, Executor, ExecutorStats, HandlerRegistry, TaskScheduler,
};
use analyzer_infrastructure::cache::analysis::cache_key;
use analyzer_infrastructure::{AnalysisCache, CacheStats, MemoryController, MemoryStats, PressureLevel};

use crate::planner::{OptimizationPlanner, WorkloadProfile};

/// 混合模式下压力偏高时让出执行的时间
const PRESSURE_BACKOFF: Duration = Duration::from_millis(50);

/// 单个包的结果来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    Cache,
    Executed,
    /// 没能进入执行（例如缓存键无法计算）
    Skipped,
}

#[derive(Debug, Clone)]
pub struct PackageResult {
    pub key: Option<String>,
    pub source: ResultSource,
    pub result: AnalyzerResult<Value>,
    pub attempts: u32,
}

impl PackageResult {
    fn from_outcome(key: String, outcome: TaskOutcome) -> Self {
        match outcome {
            Ok(output) => Self {
                key: Some(key),
                source: ResultSource::Executed,
                attempts: output.attempts,
                result: Ok(output.output),
            },
            Err(e) => Self {
                key: Some(key),
                source: ResultSource::Executed,
                attempts: 0,
                result: Err(e),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn to_json(&self) -> Value {
        match &self.result {
            Ok(output) => json!({
                "key": self.key,
                "source": self.source,
                "attempts": self.attempts,
                "output": output,
            }),
            Err(e) => json!({
                "key": self.key,
                "source": self.source,
                "error": e.to_string(),
                "error_kind": e.kind(),
            }),
        }
    }
}

/// 一次分析运行的报告，`results` 与输入顺序一致
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub plan: OptimizationPlan,
    pub results: Vec<PackageResult>,
    pub cache_hits: usize,
    pub executed: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
    pub cache: CacheStats,
    pub memory: MemoryStats,
    pub executor: Option<ExecutorStats>,
}

impl AnalysisReport {
    pub fn succeeded(&self) -> usize {
        self.results.len() - self.failed
    }

    pub fn summary(&self) -> Value {
        json!({
            "total": self.results.len(),
            "succeeded": self.succeeded(),
            "failed": self.failed,
            "cache_hits": self.cache_hits,
            "executed": self.executed,
            "elapsed_ms": self.elapsed_ms,
            "plan": self.plan,
            "cache": self.cache,
            "memory": self.memory,
            "executor": self.executor,
        })
    }
}

/// 待执行的条目: (输入下标, 缓存键, 任务)
type PendingItem = (usize, String, TaskSpec);

/// 分析协调器
///
/// 每次运行先根据工作量推导优化计划，套用到缓存、内存控制器和新建的
/// 执行后端上，再按处理模式执行未命中缓存的条目。同一时刻只允许一次运行。
pub struct AnalysisCoordinator {
    config: CoordinatorConfig,
    scheduler_config: SchedulerConfig,
    memory_ceiling_override: Option<f64>,
    sweep_interval: Duration,
    registry: Arc<HandlerRegistry>,
    cache: Arc<AnalysisCache>,
    memory: Arc<MemoryController>,
    planner: OptimizationPlanner,
    run_lock: Mutex<()>,
    active: Mutex<Option<Arc<dyn Executor>>>,
}

impl AnalysisCoordinator {
    pub fn new(
        config: &AppConfig,
        registry: Arc<HandlerRegistry>,
        cache: Arc<AnalysisCache>,
        memory: Arc<MemoryController>,
    ) -> Self {
        Self {
            config: config.coordinator.clone(),
            scheduler_config: config.scheduler.clone(),
            memory_ceiling_override: config.memory.ceiling_mb,
            sweep_interval: config.cache.sweep_interval(),
            registry,
            cache,
            memory,
            planner: OptimizationPlanner,
            run_lock: Mutex::new(()),
            active: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &Arc<AnalysisCache> {
        &self.cache
    }

    pub fn memory(&self) -> &Arc<MemoryController> {
        &self.memory
    }

    /// 启动缓存过期清理与内存定时器，并把缓存清理注册为回收钩子
    pub async fn init(&self) {
        let cache = Arc::clone(self.cache.inner());
        self.memory
            .register_reclaim_hook("cache_sweep", Arc::new(move || cache.sweep_memory_tier()));
        self.cache.inner().start_sweeper(self.sweep_interval);
        self.memory.start().await;
        info!("分析协调器初始化完成");
    }

    /// 停止正在使用的执行后端和所有后台定时器
    pub async fn shutdown(&self) -> AnalyzerResult<()> {
        info!("分析协调器开始关闭");
        let active = self.active.lock().await.take();
        if let Some(executor) = active {
            executor.shutdown(self.config.shutdown_grace()).await?;
        }
        self.cache.inner().dispose().await;
        self.memory.dispose().await;
        info!("分析协调器已关闭");
        Ok(())
    }

    /// 根据条目数、可用内存与CPU核数推导计划
    pub fn plan_for(&self, item_count: usize) -> OptimizationPlan {
        let cores = match self.config.max_concurrency {
            Some(max) => available_cores().min(max),
            None => available_cores(),
        };
        let mut plan = self.planner.plan(WorkloadProfile {
            item_count,
            available_memory_mb: self.memory.available_memory_mb(),
            available_cores: cores,
        });
        if let Some(ceiling) = self.memory_ceiling_override {
            plan.memory_ceiling_mb = ceiling;
        }
        plan
    }

    /// 把计划套用到缓存与内存控制器，返回执行后端使用的调度配置
    pub async fn apply_plan(&self, plan: &OptimizationPlan) -> AnalyzerResult<SchedulerConfig> {
        plan.validate()?;
        self.cache
            .inner()
            .reconfigure(plan.caching_tier, plan.cache_budget_mb());
        self.memory.set_ceiling(plan.memory_ceiling_mb)?;
        self.memory.set_gc_strategy(plan.gc_strategy()).await;
        Ok(self.planner.scheduler_config(plan, &self.scheduler_config))
    }

    /// 分析一组包，按输入顺序返回每个包的结果
    #[instrument(skip(self, packages), fields(count = packages.len()))]
    pub async fn analyze<P: Serialize>(
        &self,
        packages: &[P],
        task_type: Option<&str>,
    ) -> AnalyzerResult<AnalysisReport> {
        let _run = self.run_lock.lock().await;
        let started = Instant::now();
        let task_type = task_type.unwrap_or(&self.config.default_task_type);
        if !self.registry.contains(task_type) {
            return Err(AnalyzerError::config_error(format!(
                "没有注册任务类型 {task_type} 的处理器"
            )));
        }

        let plan = self.plan_for(packages.len());
        let scheduler_config = self.apply_plan(&plan).await?;
        info!(
            "开始分析 {} 个包: mode={}, batch={}, parallelism={}, cache={}",
            packages.len(),
            plan.processing_mode,
            plan.batch_size,
            plan.parallelism,
            plan.caching_tier
        );

        let mut results: Vec<Option<PackageResult>> = vec![None; packages.len()];
        let mut pending: Vec<PendingItem> = Vec::new();
        let mut cache_hits = 0;

        for (index, package) in packages.iter().enumerate() {
            let prepared = cache_key(package).and_then(|key| {
                let payload = serde_json::to_value(package)?;
                Ok((key, payload))
            });
            let (key, payload) = match prepared {
                Ok(prepared) => prepared,
                Err(e) => {
                    results[index] = Some(PackageResult {
                        key: None,
                        source: ResultSource::Skipped,
                        result: Err(e),
                        attempts: 0,
                    });
                    continue;
                }
            };

            match self.cache.get(&key).await {
                Some(cached) => {
                    cache_hits += 1;
                    results[index] = Some(PackageResult {
                        key: Some(key),
                        source: ResultSource::Cache,
                        result: Ok(cached),
                        attempts: 0,
                    });
                }
                None => pending.push((index, key, self.task_spec(task_type, payload))),
            }
        }
        debug!("缓存命中 {} 个, 待执行 {} 个", cache_hits, pending.len());

        let executed = pending.len();
        let executor_stats = if pending.is_empty() {
            None
        } else {
            let completed = self.execute(&plan, scheduler_config, pending).await?;
            for (index, key, outcome) in completed.outcomes {
                if let Ok(output) = &outcome {
                    if let Err(e) = self.cache.set(&key, output.output.clone()).await {
                        warn!("分析结果写入缓存失败 {}: {}", key, e);
                    }
                }
                results[index] = Some(PackageResult::from_outcome(key, outcome));
            }
            Some(completed.stats)
        };

        let results: Vec<PackageResult> = results
            .into_iter()
            .map(|result| {
                result.unwrap_or_else(|| PackageResult {
                    key: None,
                    source: ResultSource::Skipped,
                    result: Err(AnalyzerError::Internal("结果缺失".to_string())),
                    attempts: 0,
                })
            })
            .collect();
        let failed = results.iter().filter(|r| !r.is_success()).count();

        let report = AnalysisReport {
            plan,
            cache_hits,
            executed,
            failed,
            elapsed_ms: started.elapsed().as_millis() as u64,
            cache: self.cache.stats(),
            memory: self.memory.stats(),
            executor: executor_stats,
            results,
        };
        info!(
            "分析完成: 共 {} 个, 成功 {}, 失败 {}, 缓存命中 {}, 耗时 {}ms",
            report.results.len(),
            report.succeeded(),
            report.failed,
            report.cache_hits,
            report.elapsed_ms
        );
        Ok(report)
    }

    fn task_spec(&self, task_type: &str, payload: Value) -> TaskSpec {
        TaskSpec::new(task_type, payload)
            .with_priority(self.config.task_priority)
            .with_timeout(self.config.task_timeout())
            .with_max_retries(self.config.max_retries)
    }

    async fn execute(
        &self,
        plan: &OptimizationPlan,
        scheduler_config: SchedulerConfig,
        pending: Vec<PendingItem>,
    ) -> AnalyzerResult<CompletedRun> {
        let registry = Arc::clone(&self.registry);
        let (run, executor) = match plan.processing_mode {
            ProcessingMode::Batch | ProcessingMode::Hybrid => {
                let scheduler = Arc::new(TaskScheduler::new(scheduler_config, registry)?);
                self.set_active(scheduler.clone()).await;
                let run = self.run_chunked(scheduler.as_ref(), plan, pending).await;
                (run, scheduler as Arc<dyn Executor>)
            }
            ProcessingMode::Streaming => {
                let executor = Arc::new(CooperativeExecutor::new(scheduler_config, registry)?);
                self.set_active(executor.clone()).await;
                let run = self.run_streaming(executor.clone(), plan, pending).await;
                (run, executor as Arc<dyn Executor>)
            }
        };

        let stats = executor.stats();
        // 运行途中被 shutdown 取走时后端已经关闭，已得到的结果照常返回
        match self.active.lock().await.take() {
            Some(active) => {
                if let Err(e) = active.shutdown(self.config.shutdown_grace()).await {
                    warn!("执行后端关闭失败: {}", e);
                }
            }
            None => warn!(
                "执行后端在运行中被关闭，返回已完成的 {} 个结果",
                run.len()
            ),
        }
        Ok(CompletedRun {
            outcomes: run,
            stats,
        })
    }

    async fn set_active(&self, executor: Arc<dyn Executor>) {
        *self.active.lock().await = Some(executor);
    }

    /// 批处理与混合模式：按批次大小分块提交到Worker池
    async fn run_chunked(
        &self,
        executor: &dyn Executor,
        plan: &OptimizationPlan,
        pending: Vec<PendingItem>,
    ) -> Vec<(usize, String, TaskOutcome)> {
        let mut completed = Vec::with_capacity(pending.len());
        let mut items = pending.into_iter().peekable();

        while items.peek().is_some() {
            if plan.processing_mode == ProcessingMode::Hybrid {
                let pressure = self.memory.pressure();
                if pressure != PressureLevel::Normal {
                    debug!("内存压力 {:?}，暂停提交并强制回收", pressure);
                    self.memory.force_collect();
                    tokio::time::sleep(PRESSURE_BACKOFF).await;
                }
            }

            let chunk: Vec<PendingItem> = items.by_ref().take(plan.batch_size).collect();
            let (keys, specs): (Vec<_>, Vec<_>) = chunk
                .into_iter()
                .map(|(index, key, spec)| ((index, key), spec))
                .unzip();
            let outcomes = executor.submit_batch(specs).await;
            completed.extend(
                keys.into_iter()
                    .zip(outcomes)
                    .map(|((index, key), outcome)| (index, key, outcome)),
            );
        }
        completed
    }

    /// 流式模式：由内存控制器逐批驱动协作式执行器
    async fn run_streaming(
        &self,
        executor: Arc<CooperativeExecutor>,
        plan: &OptimizationPlan,
        pending: Vec<PendingItem>,
    ) -> Vec<(usize, String, TaskOutcome)> {
        let total = pending.len();
        let per_item = move |(index, key, spec): PendingItem| {
            let executor = Arc::clone(&executor);
            async move {
                let outcome = match executor.submit(spec) {
                    Ok(handle) => handle.wait().await,
                    Err(e) => Err(e),
                };
                (index, key, outcome)
            }
        };

        let mut completed = Vec::with_capacity(total);
        let mut batches = self
            .memory
            .create_streaming_batches(pending, per_item, plan.batch_size)
            .boxed();
        while let Some(batch) = batches.next().await {
            completed.extend(batch);
            debug!("流式处理进度: {}/{}", completed.len(), total);
        }
        completed
    }
}

struct CompletedRun {
    outcomes: Vec<(usize, String, TaskOutcome)>,
    stats: ExecutorStats,
}
