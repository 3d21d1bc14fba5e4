use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use analyzer_core::config::{ConfigValidator, SchedulerConfig};
use analyzer_core::models::{Task, TaskSpec, WorkerRecord};
use analyzer_core::{AnalyzerError, AnalyzerResult};

use crate::executor::Executor;
use crate::job::{settle, Job, Settlement, TaskHandle};
use crate::metrics::{self, ExecutorCounters, ExecutorStats};
use crate::queue::PriorityQueue;
use crate::registry::HandlerRegistry;
use crate::worker::{WorkerEvent, WorkerSlot};

const BACKEND: &str = "worker_pool";
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// 带自动扩缩容的Worker池调度器
///
/// 提交只在一个短暂的互斥锁内入队并唤醒控制循环；派发、重试、
/// Worker回收和扩缩容全部由单个控制循环完成。Worker之间相互隔离，
/// 某个任务体panic只会导致执行它的Worker被替换。
///
/// 必须在tokio运行时内创建。
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
    control: Mutex<Option<ControlHandle>>,
}

struct ControlHandle {
    shutdown_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

struct SchedulerInner {
    config: SchedulerConfig,
    registry: Arc<HandlerRegistry>,
    state: Mutex<SchedulerState>,
    notify: Notify,
    next_task_id: AtomicU64,
    next_worker_id: AtomicU64,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    started_at: Instant,
}

struct SchedulerState {
    queue: PriorityQueue<Job>,
    workers: BTreeMap<String, WorkerSlot>,
    accepting: bool,
    counters: ExecutorCounters,
    peak_workers: usize,
}

impl TaskScheduler {
    pub fn new(config: SchedulerConfig, registry: Arc<HandlerRegistry>) -> AnalyzerResult<Self> {
        config.validate()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(SchedulerInner {
            registry,
            state: Mutex::new(SchedulerState {
                queue: PriorityQueue::new(),
                workers: BTreeMap::new(),
                accepting: true,
                counters: ExecutorCounters::default(),
                peak_workers: 0,
            }),
            notify: Notify::new(),
            next_task_id: AtomicU64::new(1),
            next_worker_id: AtomicU64::new(1),
            events_tx,
            started_at: Instant::now(),
            config,
        });

        {
            let mut state = inner.lock_state();
            for _ in 0..inner.config.min_workers {
                inner.spawn_worker(&mut state);
            }
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let join = tokio::spawn(control_loop(inner.clone(), events_rx, shutdown_rx));

        info!(
            "任务调度器已启动: workers [{}, {}], 队列上限 {}",
            inner.config.min_workers, inner.config.max_workers, inner.config.max_queue_size
        );

        Ok(Self {
            inner,
            control: Mutex::new(Some(ControlHandle { shutdown_tx, join })),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// 当前排队任务数
    pub fn queue_len(&self) -> usize {
        self.inner.lock_state().queue.len()
    }

    /// 当前Worker记录
    pub fn workers(&self) -> Vec<WorkerRecord> {
        self.inner
            .lock_state()
            .workers
            .values()
            .map(|slot| slot.record.clone())
            .collect()
    }

    fn lock_control(&self) -> MutexGuard<'_, Option<ControlHandle>> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Executor for TaskScheduler {
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
            in_flight: state.workers.values().filter(|s| s.record.is_busy()).count(),
            workers: state.workers.values().map(|s| s.record.clone()).collect(),
            peak_workers: state.peak_workers,
            counters: state.counters.clone(),
            uptime_ms: uptime.as_millis() as u64,
            throughput_per_sec: metrics::throughput(
                state.counters.completed + state.counters.failed,
                uptime,
            ),
        }
    }

    async fn shutdown(&self, grace: Duration) -> AnalyzerResult<()> {
        {
            let mut state = self.inner.lock_state();
            if !state.accepting {
                debug!("任务调度器已经在关闭中");
            }
            state.accepting = false;
        }
        info!("任务调度器开始关闭, 宽限期 {:?}", grace);

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
                warn!("调度器控制循环异常退出: {}", e);
            }
        }

        info!("任务调度器已关闭");
        Ok(())
    }
}

impl SchedulerInner {
    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_drained(&self) -> bool {
        let state = self.lock_state();
        state.queue.is_empty() && !state.workers.values().any(|s| s.record.is_busy())
    }

    fn spawn_worker(&self, state: &mut SchedulerState) -> String {
        let id = format!(
            "worker-{}",
            self.next_worker_id.fetch_add(1, Ordering::Relaxed)
        );
        let slot = WorkerSlot::spawn(id.clone(), self.registry.clone(), self.events_tx.clone());
        state.workers.insert(id.clone(), slot);
        state.peak_workers = state.peak_workers.max(state.workers.len());
        debug!("新增Worker {}, 当前 {} 个", id, state.workers.len());
        id
    }

    /// 替换一个Worker，池大小不变
    fn recycle_worker(&self, state: &mut SchedulerState, worker_id: &str, reason: &'static str) {
        if let Some(slot) = state.workers.remove(worker_id) {
            let record = slot.retire();
            state.counters.workers_recycled += 1;
            metrics::record_worker_recycled(reason);
            let replacement = self.spawn_worker(state);
            info!(
                "回收Worker {} (原因: {}, 完成 {} 个任务, 错误 {} 次), 由 {} 替换",
                worker_id, reason, record.tasks_completed, record.error_count, replacement
            );
        }
    }

    fn handle_event(&self, event: WorkerEvent) {
        let WorkerEvent::Finished {
            worker_id,
            job,
            result,
            elapsed,
        } = event;

        let mut guard = self.lock_state();
        let state = &mut *guard;

        let faulted = result.is_fault();
        let recycle_reason = match state.workers.get_mut(&worker_id) {
            Some(slot) if faulted => {
                slot.record.record_fault();
                Some("fault")
            }
            Some(slot) => {
                slot.record.record_completion(elapsed.as_millis() as u64);
                (slot.record.tasks_completed >= self.config.max_tasks_per_worker)
                    .then_some("max_tasks")
            }
            None => None,
        };

        match settle(job, result, Some(&worker_id), elapsed, BACKEND) {
            Settlement::Completed => state.counters.completed += 1,
            Settlement::Failed => state.counters.failed += 1,
            Settlement::Abandoned => state.counters.abandoned += 1,
            Settlement::Retry(job) => {
                state.counters.retried += 1;
                let priority = job.task.priority;
                state.queue.push_front(priority, job);
            }
        }

        if let Some(reason) = recycle_reason {
            if faulted {
                warn!("Worker {} 执行任务时发生故障，准备回收", worker_id);
            }
            self.recycle_worker(state, &worker_id, reason);
        }
    }

    /// 把排队任务派发给空闲Worker，直到没有空闲Worker或队列为空
    fn dispatch(&self) {
        let mut guard = self.lock_state();
        let state = &mut *guard;

        while !state.queue.is_empty() {
            let Some(worker_id) = state
                .workers
                .iter()
                .find(|(_, slot)| slot.record.is_available())
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            let Some(mut job) = state.queue.pop() else {
                break;
            };
            if job.is_abandoned() {
                debug!("任务 {} 的调用方已放弃，跳过执行", job.task.id);
                state.counters.abandoned += 1;
                metrics::record_settlement(BACKEND, "abandoned");
                continue;
            }

            let Some(slot) = state.workers.get_mut(&worker_id) else {
                state.queue.push_front(job.task.priority, job);
                break;
            };
            job.task.attempts += 1;
            match slot.sender.try_send(job) {
                Ok(()) => slot.record.mark_busy(),
                Err(TrySendError::Full(mut job)) | Err(TrySendError::Closed(mut job)) => {
                    job.task.attempts -= 1;
                    let priority = job.task.priority;
                    state.queue.push_front(priority, job);
                    warn!("Worker {} 无法接收任务，进行替换", worker_id);
                    self.recycle_worker(state, &worker_id, "unreachable");
                }
            }
        }

        metrics::record_queue_depth(BACKEND, &state.queue.depth_by_level());
        let busy = state.workers.values().filter(|s| s.record.is_busy()).count();
        metrics::record_workers(state.workers.len(), busy);
    }

    /// 定时扩缩容检查，每次最多增减一个Worker
    fn autoscale(&self) {
        let mut guard = self.lock_state();
        let state = &mut *guard;

        let pool = state.workers.len();
        let busy = state.workers.values().filter(|s| s.record.is_busy()).count();
        let idle = state
            .workers
            .values()
            .filter(|s| s.record.is_available())
            .count();
        let queued = state.queue.len();
        let busy_ratio = if pool == 0 {
            1.0
        } else {
            busy as f64 / pool as f64
        };

        let config = &self.config;
        if pool < config.max_workers
            && (queued > config.scale_up_queue_threshold
                || busy_ratio > config.busy_ratio_threshold)
        {
            let id = self.spawn_worker(state);
            state.counters.scale_ups += 1;
            metrics::record_scale("up");
            info!(
                "扩容: 新增 {} (队列 {}, 忙碌率 {:.2}), 当前 {} 个Worker",
                id,
                queued,
                busy_ratio,
                state.workers.len()
            );
        } else if queued == 0 && idle > config.scale_down_idle_threshold && pool > config.min_workers
        {
            let idle_id = state
                .workers
                .iter()
                .rev()
                .find(|(_, slot)| slot.record.is_available())
                .map(|(id, _)| id.clone());
            if let Some(id) = idle_id {
                if let Some(slot) = state.workers.remove(&id) {
                    slot.retire();
                    state.counters.scale_downs += 1;
                    metrics::record_scale("down");
                    info!("缩容: 移除空闲Worker {}, 当前 {} 个Worker", id, state.workers.len());
                }
            }
        }
    }

    /// 终止全部Worker，排队中的任务以关闭错误结束
    fn terminate(&self) {
        let mut state = self.lock_state();
        state.accepting = false;

        let pending = state.queue.drain();
        if !pending.is_empty() {
            warn!("调度器终止, {} 个排队任务未执行", pending.len());
        }
        for job in pending {
            job.complete(Err(AnalyzerError::ShuttingDown));
        }

        let workers = std::mem::take(&mut state.workers);
        for (_, slot) in workers {
            slot.terminate();
        }

        metrics::record_queue_depth(BACKEND, &state.queue.depth_by_level());
        metrics::record_workers(0, 0);
    }
}

async fn control_loop(
    inner: Arc<SchedulerInner>,
    mut events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut scale_interval = tokio::time::interval(inner.config.scale_interval());
    scale_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // interval的第一次tick立即完成，跳过
    scale_interval.tick().await;

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                debug!("控制循环收到关闭信号");
                break;
            }
            Some(event) = events_rx.recv() => inner.handle_event(event),
            _ = inner.notify.notified() => {}
            _ = scale_interval.tick() => inner.autoscale(),
        }
        inner.dispatch();
    }

    inner.terminate();
}
