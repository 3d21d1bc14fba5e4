use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use analyzer_core::config::{ConfigValidator, SchedulerConfig};
use analyzer_core::models::{Task, TaskSpec};
use analyzer_core::{AnalyzerError, AnalyzerResult};

use crate::executor::Executor;
use crate::job::{execute, settle, Job, Settlement, TaskHandle};
use crate::metrics::{self, ExecutorCounters, ExecutorStats};
use crate::queue::PriorityQueue;
use crate::registry::HandlerRegistry;

const BACKEND: &str = "cooperative";
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// 协作式执行器
///
/// 不维护Worker，只用信号量限制同时在途的任务数。优先级、背压、
/// 超时与重试规则和 [`crate::TaskScheduler`] 相同，没有Worker回收。
/// 适合与内存控制器的流式批次配合处理超大批量。
pub struct CooperativeExecutor {
    inner: Arc<CooperativeInner>,
    control: Mutex<Option<ControlHandle>>,
}

struct ControlHandle {
    shutdown_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

struct CooperativeInner {
    config: SchedulerConfig,
    registry: Arc<HandlerRegistry>,
    state: Mutex<CooperativeState>,
    notify: Notify,
    permits: Arc<Semaphore>,
    next_task_id: AtomicU64,
    started_at: Instant,
}

struct CooperativeState {
    queue: PriorityQueue<Job>,
    accepting: bool,
    stopped: bool,
    in_flight: usize,
    peak_in_flight: usize,
    counters: ExecutorCounters,
}

impl CooperativeExecutor {
    pub fn new(config: SchedulerConfig, registry: Arc<HandlerRegistry>) -> AnalyzerResult<Self> {
        config.validate()?;

        let inner = Arc::new(CooperativeInner {
            permits: Arc::new(Semaphore::new(config.max_in_flight)),
            registry,
            state: Mutex::new(CooperativeState {
                queue: PriorityQueue::new(),
                accepting: true,
                stopped: false,
                in_flight: 0,
                peak_in_flight: 0,
                counters: ExecutorCounters::default(),
            }),
            notify: Notify::new(),
            next_task_id: AtomicU64::new(1),
            started_at: Instant::now(),
            config,
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let join = tokio::spawn(dispatch_loop(inner.clone(), shutdown_rx));

        info!(
            "协作式执行器已启动: 最大在途 {}, 队列上限 {}",
            inner.config.max_in_flight, inner.config.max_queue_size
        );

        Ok(Self {
            inner,
            control: Mutex::new(Some(ControlHandle { shutdown_tx, join })),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.inner.lock_state().in_flight
    }

    fn lock_control(&self) -> MutexGuard<'_, Option<ControlHandle>> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Executor for CooperativeExecutor {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn submit(&self, spec: TaskSpec) -> AnalyzerResult<TaskHandle> {
        let handle = {
            let mut state = self.inner.lock_state();
            if !state.accepting {
                metrics::record_rejected(BACKEND, "shutting_down");
                return Err(AnalyzerError::ShuttingDown);
            }
            if state.queue.len() >= self.inner.config.max_queue_size {
                state.counters.rejected += 1;
                metrics::record_rejected(BACKEND, "queue_full");
                return Err(AnalyzerError::QueueFull {
                    capacity: self.inner.config.max_queue_size,
                });
            }

            let id = self.inner.next_task_id.fetch_add(1, Ordering::Relaxed);
            let task = Task::from_spec(id, spec);
            let timeout = task.timeout;
            let priority = task.priority;
            let (job, rx) = Job::new(task);
            state.queue.push(priority, job);
            state.counters.submitted += 1;
            TaskHandle::new(id, rx, timeout)
        };

        metrics::record_submitted(BACKEND);
        self.inner.notify.notify_one();
        Ok(handle)
    }

    fn stats(&self) -> ExecutorStats {
        let state = self.inner.lock_state();
        let uptime = self.inner.started_at.elapsed();
        ExecutorStats {
            backend: BACKEND.to_string(),
            queue_depth: state.queue.len(),
            queue_depth_by_priority: state.queue.depth_by_level(),
            in_flight: state.in_flight,
            workers: Vec::new(),
            peak_workers: state.peak_in_flight,
            counters: state.counters.clone(),
            uptime_ms: uptime.as_millis() as u64,
            throughput_per_sec: metrics::throughput(
                state.counters.completed + state.counters.failed,
                uptime,
            ),
        }
    }

    async fn shutdown(&self, grace: Duration) -> AnalyzerResult<()> {
        self.inner.lock_state().accepting = false;
        info!("协作式执行器开始关闭, 宽限期 {:?}", grace);

        let drained = tokio::time::timeout(grace, async {
            while !self.inner.is_drained() {
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        })
        .await
        .is_ok();
        if !drained {
            warn!("宽限期内仍有任务未完成，剩余任务将以关闭错误结束");
        }

        let control = self.lock_control().take();
        if let Some(ControlHandle { shutdown_tx, join }) = control {
            let _ = shutdown_tx.send(());
            if let Err(e) = join.await {
                warn!("协作式执行器派发循环异常退出: {}", e);
            }
        }

        info!("协作式执行器已关闭");
        Ok(())
    }
}

impl CooperativeInner {
    fn lock_state(&self) -> MutexGuard<'_, CooperativeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_drained(&self) -> bool {
        let state = self.lock_state();
        state.queue.is_empty() && state.in_flight == 0
    }

    /// 取出下一个仍有人等待的任务，并计入在途
    fn next_job(&self) -> Option<Job> {
        let mut state = self.lock_state();
        while let Some(mut job) = state.queue.pop() {
            if job.is_abandoned() {
                debug!("任务 {} 的调用方已放弃，跳过执行", job.task.id);
                state.counters.abandoned += 1;
                metrics::record_settlement(BACKEND, "abandoned");
                continue;
            }
            job.task.attempts += 1;
            state.in_flight += 1;
            state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
            metrics::record_in_flight(BACKEND, state.in_flight);
            metrics::record_queue_depth(BACKEND, &state.queue.depth_by_level());
            return Some(job);
        }
        None
    }

    async fn run_job(self: Arc<Self>, job: Job, permit: OwnedSemaphorePermit) {
        let started = Instant::now();
        let result = execute(&self.registry, &job.task, None).await;
        let settlement = settle(job, result, None, started.elapsed(), BACKEND);

        {
            let mut state = self.lock_state();
            state.in_flight -= 1;
            metrics::record_in_flight(BACKEND, state.in_flight);
            match settlement {
                Settlement::Completed => state.counters.completed += 1,
                Settlement::Failed => state.counters.failed += 1,
                Settlement::Abandoned => state.counters.abandoned += 1,
                Settlement::Retry(job) => {
                    if state.stopped {
                        state.counters.failed += 1;
                        job.complete(Err(AnalyzerError::ShuttingDown));
                    } else {
                        state.counters.retried += 1;
                        let priority = job.task.priority;
                        state.queue.push_front(priority, job);
                        self.notify.notify_one();
                    }
                }
            }
        }

        drop(permit);
    }

    fn terminate(&self) {
        let mut state = self.lock_state();
        state.accepting = false;
        state.stopped = true;
        let pending = state.queue.drain();
        if !pending.is_empty() {
            warn!("协作式执行器终止, {} 个排队任务未执行", pending.len());
        }
        for job in pending {
            job.complete(Err(AnalyzerError::ShuttingDown));
        }
        metrics::record_queue_depth(BACKEND, &state.queue.depth_by_level());
    }
}

async fn dispatch_loop(inner: Arc<CooperativeInner>, mut shutdown_rx: oneshot::Receiver<()>) {
    'dispatch: loop {
        let permit = tokio::select! {
            _ = &mut shutdown_rx => break 'dispatch,
            permit = inner.permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break 'dispatch,
            },
        };

        let job = loop {
            if let Some(job) = inner.next_job() {
                break job;
            }
            tokio::select! {
                _ = &mut shutdown_rx => break 'dispatch,
                _ = inner.notify.notified() => {}
            }
        };

        tokio::spawn(inner.clone().run_job(job, permit));
    }

    inner.terminate();
}
