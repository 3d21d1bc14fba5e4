use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use analyzer_core::config::{ConfigValidator, MemoryConfig};
use analyzer_core::models::GcStrategy;
use analyzer_core::{AnalyzerError, AnalyzerResult};

use super::probe::{MemoryProbe, MemorySnapshot, SystemMemoryProbe};

/// 回收钩子，返回释放的条目数
pub type ReclaimHook = Arc<dyn Fn() -> usize + Send + Sync>;

/// 相对内存上限的压力等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureLevel {
    Normal,
    Elevated,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub current_usage_mb: f64,
    pub peak_usage_mb: f64,
    pub available_mb: f64,
    pub total_mb: f64,
    pub ceiling_mb: Option<f64>,
    pub usage_ratio: Option<f64>,
    pub pressure: PressureLevel,
    pub gc_strategy: GcStrategy,
    pub samples: usize,
    pub leak_counter: u64,
    pub forced_collections: u64,
    pub reclaim_hooks: usize,
}

struct ControllerState {
    samples: VecDeque<f64>,
    ceiling_mb: Option<f64>,
    peak_usage_mb: f64,
    leak_counter: u64,
    forced_collections: u64,
    gc_strategy: GcStrategy,
    last_snapshot: Option<MemorySnapshot>,
}

struct TimerHandle {
    shutdown_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl TimerHandle {
    async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.join.await;
    }
}

#[derive(Default)]
struct Timers {
    gc: Option<TimerHandle>,
    sampler: Option<TimerHandle>,
}

/// 内存压力控制器
///
/// 维护最近的内存采样用于泄漏检测，按回收策略定期触发回收钩子，
/// 并为流式处理提供批次之间的压力检查。
pub struct MemoryController {
    config: MemoryConfig,
    probe: Arc<dyn MemoryProbe>,
    state: Mutex<ControllerState>,
    hooks: Mutex<Vec<(String, ReclaimHook)>>,
    timers: tokio::sync::Mutex<Timers>,
}

impl MemoryController {
    pub fn new(config: MemoryConfig, probe: Arc<dyn MemoryProbe>) -> AnalyzerResult<Self> {
        config.validate()?;
        let state = ControllerState {
            samples: VecDeque::with_capacity(config.sample_window),
            ceiling_mb: config.ceiling_mb,
            peak_usage_mb: 0.0,
            leak_counter: 0,
            forced_collections: 0,
            gc_strategy: config.gc_strategy,
            last_snapshot: None,
        };
        Ok(Self {
            config,
            probe,
            state: Mutex::new(state),
            hooks: Mutex::new(Vec::new()),
            timers: tokio::sync::Mutex::new(Timers::default()),
        })
    }

    /// 使用 sysinfo 探针
    pub fn with_system_probe(config: MemoryConfig) -> AnalyzerResult<Self> {
        Self::new(config, Arc::new(SystemMemoryProbe::new()?))
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 读取探针；失败时沿用上一次读数
    fn snapshot(&self) -> MemorySnapshot {
        match self.probe.snapshot() {
            Ok(snapshot) => {
                self.state().last_snapshot = Some(snapshot);
                snapshot
            }
            Err(e) => {
                warn!("读取内存信息失败: {}", e);
                self.state().last_snapshot.unwrap_or(MemorySnapshot {
                    total_mb: 0.0,
                    available_mb: 0.0,
                    process_mb: 0.0,
                })
            }
        }
    }

    pub fn available_memory_mb(&self) -> f64 {
        self.snapshot().available_mb
    }

    pub fn total_memory_mb(&self) -> f64 {
        self.snapshot().total_mb
    }

    pub fn current_usage_mb(&self) -> f64 {
        self.snapshot().process_mb
    }

    pub fn ceiling_mb(&self) -> Option<f64> {
        self.state().ceiling_mb
    }

    pub fn set_ceiling(&self, ceiling_mb: f64) -> AnalyzerResult<()> {
        if !ceiling_mb.is_finite() || ceiling_mb <= 0.0 {
            return Err(AnalyzerError::config_error(format!(
                "内存上限必须为正数: {ceiling_mb}"
            )));
        }
        self.state().ceiling_mb = Some(ceiling_mb);
        gauge!("analyzer_memory_ceiling_mb").set(ceiling_mb);
        info!("内存上限设置为 {:.1}MB", ceiling_mb);
        Ok(())
    }

    pub fn gc_strategy(&self) -> GcStrategy {
        self.state().gc_strategy
    }

    pub fn register_reclaim_hook(&self, name: impl Into<String>, hook: ReclaimHook) {
        let name = name.into();
        debug!("注册回收钩子: {}", name);
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name, hook));
    }

    /// 采样一次当前进程内存并做泄漏检测
    pub fn sample(&self) -> f64 {
        let usage = self.current_usage_mb();
        self.record_sample(usage);
        usage
    }

    /// 记录一个采样，返回是否判定为疑似泄漏
    ///
    /// 最近 `leak_window` 个采样首尾之差超过 `leak_threshold_mb` 时泄漏计数加一，
    /// 并立即强制回收一次。
    pub fn record_sample(&self, usage_mb: f64) -> bool {
        let trend_mb = {
            let mut state = self.state();
            if state.samples.len() == self.config.sample_window {
                state.samples.pop_front();
            }
            state.samples.push_back(usage_mb);
            state.peak_usage_mb = state.peak_usage_mb.max(usage_mb);

            let window = self.config.leak_window;
            if state.samples.len() < window {
                None
            } else {
                let first = state.samples[state.samples.len() - window];
                let trend = usage_mb - first;
                if trend > self.config.leak_threshold_mb {
                    state.leak_counter += 1;
                    Some(trend)
                } else {
                    None
                }
            }
        };
        gauge!("analyzer_memory_usage_mb").set(usage_mb);

        match trend_mb {
            Some(trend_mb) => {
                let signal = AnalyzerError::LeakSuspected { trend_mb };
                warn!("{}", signal);
                counter!("analyzer_memory_leak_suspected_total").increment(1);
                self.force_collect();
                true
            }
            None => false,
        }
    }

    /// 运行全部回收钩子；没有钩子时只记录日志
    pub fn force_collect(&self) -> usize {
        let hooks: Vec<(String, ReclaimHook)> = self
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        self.state().forced_collections += 1;
        counter!("analyzer_memory_forced_collections_total").increment(1);

        if hooks.is_empty() {
            debug!("强制回收: 没有注册的回收钩子");
            return 0;
        }

        let mut reclaimed = 0;
        for (name, hook) in &hooks {
            let count = hook();
            if count > 0 {
                debug!("回收钩子 {} 释放 {} 个条目", name, count);
            }
            reclaimed += count;
        }
        debug!("强制回收完成: 共释放 {} 个条目", reclaimed);
        reclaimed
    }

    pub fn pressure(&self) -> PressureLevel {
        let usage = self.current_usage_mb();
        self.pressure_for(usage)
    }

    pub fn pressure_for(&self, usage_mb: f64) -> PressureLevel {
        match self.ceiling_mb() {
            Some(ceiling) => {
                let ratio = usage_mb / ceiling;
                if ratio >= self.config.critical_ratio {
                    PressureLevel::Critical
                } else if ratio >= self.config.elevated_ratio {
                    PressureLevel::Elevated
                } else {
                    PressureLevel::Normal
                }
            }
            None => PressureLevel::Normal,
        }
    }

    /// 流式批次之间调用：采样，超过上限的 `streaming_collect_ratio` 时强制回收
    pub fn check_between_batches(&self) -> bool {
        let usage = self.sample();
        match self.ceiling_mb() {
            Some(ceiling) if usage > ceiling * self.config.streaming_collect_ratio => {
                debug!(
                    "批次间内存 {:.1}MB 超过上限 {:.1}MB 的 {:.0}%，强制回收",
                    usage,
                    ceiling,
                    self.config.streaming_collect_ratio * 100.0
                );
                self.force_collect();
                true
            }
            _ => false,
        }
    }

    pub fn stats(&self) -> MemoryStats {
        let snapshot = self.snapshot();
        let reclaim_hooks = self
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        let state = self.state();
        let usage_ratio = state.ceiling_mb.map(|ceiling| snapshot.process_mb / ceiling);
        let ceiling_mb = state.ceiling_mb;
        let stats = MemoryStats {
            current_usage_mb: snapshot.process_mb,
            peak_usage_mb: state.peak_usage_mb.max(snapshot.process_mb),
            available_mb: snapshot.available_mb,
            total_mb: snapshot.total_mb,
            ceiling_mb,
            usage_ratio,
            pressure: PressureLevel::Normal,
            gc_strategy: state.gc_strategy,
            samples: state.samples.len(),
            leak_counter: state.leak_counter,
            forced_collections: state.forced_collections,
            reclaim_hooks,
        };
        drop(state);

        MemoryStats {
            pressure: self.pressure_for(stats.current_usage_mb),
            ..stats
        }
    }

    pub fn leak_counter(&self) -> u64 {
        self.state().leak_counter
    }

    /// 启动采样定时器和当前回收策略的定时器
    pub async fn start(self: &Arc<Self>) {
        let mut timers = self.timers.lock().await;
        if timers.sampler.is_none() {
            let interval = Duration::from_millis(self.config.sample_interval_ms);
            timers.sampler = Some(spawn_timer(Arc::downgrade(self), interval, |controller| {
                controller.sample();
            }));
        }
        if timers.gc.is_none() {
            timers.gc = self.spawn_gc_timer(self.gc_strategy());
        }
    }

    /// 切换回收策略：先停止旧定时器，再按新策略启动
    pub async fn set_gc_strategy(self: &Arc<Self>, strategy: GcStrategy) {
        let mut timers = self.timers.lock().await;
        if let Some(previous) = timers.gc.take() {
            previous.stop().await;
        }
        self.state().gc_strategy = strategy;
        timers.gc = self.spawn_gc_timer(strategy);
        info!("回收策略切换为 {}", strategy.as_str());
    }

    fn spawn_gc_timer(self: &Arc<Self>, strategy: GcStrategy) -> Option<TimerHandle> {
        let interval = strategy.interval()?;
        Some(spawn_timer(Arc::downgrade(self), interval, |controller| {
            controller.force_collect();
        }))
    }

    pub async fn gc_timer_running(&self) -> bool {
        self.timers.lock().await.gc.is_some()
    }

    /// 停止所有定时器
    pub async fn dispose(&self) {
        let mut timers = self.timers.lock().await;
        if let Some(gc) = timers.gc.take() {
            gc.stop().await;
        }
        if let Some(sampler) = timers.sampler.take() {
            sampler.stop().await;
        }
        debug!("内存控制器定时器已停止");
    }
}

fn spawn_timer<F>(controller: Weak<MemoryController>, interval: Duration, on_tick: F) -> TimerHandle
where
    F: Fn(&MemoryController) + Send + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = ticker.tick() => {
                    let Some(controller) = controller.upgrade() else { break };
                    on_tick(&controller);
                }
            }
        }
    });
    TimerHandle { shutdown_tx, join }
}
