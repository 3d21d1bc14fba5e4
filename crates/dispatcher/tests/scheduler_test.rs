#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use analyzer_core::config::SchedulerConfig;
    use analyzer_core::models::TaskSpec;
    use analyzer_core::traits::TaskContext;
    use analyzer_core::AnalyzerError;
    use analyzer_dispatcher::{Executor, FnHandler, HandlerRegistry, TaskScheduler};
    use serde_json::json;
    use tokio::sync::Semaphore;

    /// 注册一个被信号量卡住的 "gate" 任务和一个记录完成顺序的 "record" 任务
    fn gated_registry(
        gate: Arc<Semaphore>,
        order: Arc<Mutex<Vec<String>>>,
    ) -> Arc<HandlerRegistry> {
        let registry = HandlerRegistry::new()
            .with_handler(
                "gate",
                FnHandler::arc("gate", move |_ctx: TaskContext| {
                    let gate = gate.clone();
                    async move {
                        match gate.acquire().await {
                            Ok(_permit) => Ok(json!("gate")),
                            Err(e) => Err(AnalyzerError::Internal(e.to_string())),
                        }
                    }
                }),
            )
            .with_handler(
                "record",
                FnHandler::arc("record", move |ctx: TaskContext| {
                    let order = order.clone();
                    async move {
                        let label = ctx.payload.as_str().unwrap_or_default().to_string();
                        order.lock().unwrap().push(label.clone());
                        Ok(json!(label))
                    }
                }),
            );
        Arc::new(registry)
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_strict_priority_with_single_worker() {
        let gate = Arc::new(Semaphore::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));
        let scheduler = TaskScheduler::new(
            SchedulerConfig::fixed(1),
            gated_registry(gate.clone(), order.clone()),
        )
        .unwrap();

        let blocker = scheduler.submit(TaskSpec::new("gate", json!(null))).unwrap();
        wait_until(|| scheduler.stats().in_flight == 1).await;

        let handles: Vec<_> = [(0, "first-high"), (2, "normal"), (0, "second-high")]
            .into_iter()
            .map(|(priority, label)| {
                scheduler
                    .submit(TaskSpec::new("record", json!(label)).with_priority(priority))
                    .unwrap()
            })
            .collect();
        assert_eq!(scheduler.stats().queue_depth_by_priority, [2, 0, 1, 0, 0]);

        gate.add_permits(1);
        blocker.wait().await.unwrap();
        for handle in handles {
            handle.wait().await.unwrap();
        }

        assert_eq!(
            *order.lock().unwrap(),
            vec!["first-high", "second-high", "normal"]
        );
        scheduler.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_queue_full_rejects_without_touching_queued_tasks() {
        let gate = Arc::new(Semaphore::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));
        let config = SchedulerConfig {
            max_queue_size: 2,
            ..SchedulerConfig::fixed(1)
        };
        let scheduler =
            TaskScheduler::new(config, gated_registry(gate.clone(), order.clone())).unwrap();

        let blocker = scheduler.submit(TaskSpec::new("gate", json!(null))).unwrap();
        wait_until(|| scheduler.stats().in_flight == 1).await;

        let first = scheduler.submit(TaskSpec::new("record", json!("a"))).unwrap();
        let second = scheduler.submit(TaskSpec::new("record", json!("b"))).unwrap();
        let rejected = scheduler.submit(TaskSpec::new("record", json!("c")));

        assert!(matches!(
            rejected,
            Err(AnalyzerError::QueueFull { capacity: 2 })
        ));
        assert_eq!(scheduler.queue_len(), 2);
        assert_eq!(scheduler.stats().counters.rejected, 1);

        gate.add_permits(1);
        blocker.wait().await.unwrap();
        assert_eq!(first.wait().await.unwrap().output, json!("a"));
        assert_eq!(second.wait().await.unwrap().output, json!("b"));
        assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
        scheduler.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_worker_count_stays_within_bounds() {
        let registry = HandlerRegistry::new().with_handler(
            "slow",
            FnHandler::arc("slow", |ctx: TaskContext| async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(ctx.payload)
            }),
        );
        let config = SchedulerConfig {
            min_workers: 1,
            max_workers: 3,
            scale_interval_ms: 10,
            scale_up_queue_threshold: 0,
            ..SchedulerConfig::default()
        };
        let scheduler = Arc::new(TaskScheduler::new(config, Arc::new(registry)).unwrap());

        let sampler = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                let mut samples = Vec::new();
                for _ in 0..60 {
                    samples.push(scheduler.stats().worker_count());
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                samples
            })
        };

        let outcomes = scheduler
            .submit_batch((0..24).map(|i| TaskSpec::new("slow", json!(i))).collect())
            .await;
        assert!(outcomes.iter().all(|o| o.is_ok()));

        let samples = sampler.await.unwrap();
        assert!(samples.iter().all(|&n| (1..=3).contains(&n)));

        let stats = scheduler.stats();
        assert!(stats.peak_workers > 1);
        assert!(stats.peak_workers <= 3);
        assert!(stats.counters.scale_ups >= 1);
        scheduler.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_task_recycles_only_its_worker() {
        let registry = HandlerRegistry::new()
            .with_handler(
                "explode",
                FnHandler::arc("explode", |_ctx: TaskContext| async move {
                    if true {
                        panic!("malformed manifest");
                    }
                    Ok(json!(null))
                }),
            )
            .with_handler(
                "echo",
                FnHandler::arc("echo", |ctx: TaskContext| async move { Ok(ctx.payload) }),
            );
        let scheduler = TaskScheduler::new(SchedulerConfig::fixed(1), Arc::new(registry)).unwrap();
        let original = scheduler.workers()[0].id.clone();

        let outcome = scheduler
            .submit(TaskSpec::new("explode", json!(null)))
            .unwrap()
            .wait()
            .await;
        match outcome {
            Err(AnalyzerError::WorkerFault { worker_id, message }) => {
                assert_eq!(worker_id, original);
                assert!(message.contains("malformed manifest"));
            }
            other => panic!("expected worker fault, got {other:?}"),
        }

        let output = scheduler
            .submit(TaskSpec::new("echo", json!("still alive")))
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(output.output, json!("still alive"));
        assert_ne!(output.worker_id.as_deref(), Some(original.as_str()));

        let stats = scheduler.stats();
        assert_eq!(stats.counters.workers_recycled, 1);
        assert_eq!(stats.worker_count(), 1);
        scheduler.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_recycled_after_max_tasks() {
        let registry = HandlerRegistry::new().with_handler(
            "echo",
            FnHandler::arc("echo", |ctx: TaskContext| async move { Ok(ctx.payload) }),
        );
        let config = SchedulerConfig {
            max_tasks_per_worker: 2,
            ..SchedulerConfig::fixed(1)
        };
        let scheduler = TaskScheduler::new(config, Arc::new(registry)).unwrap();

        let mut workers = Vec::new();
        for i in 0..3 {
            let output = scheduler
                .submit(TaskSpec::new("echo", json!(i)))
                .unwrap()
                .wait()
                .await
                .unwrap();
            workers.push(output.worker_id.unwrap());
        }

        assert_eq!(workers[0], workers[1]);
        assert_ne!(workers[1], workers[2]);
        assert_eq!(scheduler.stats().counters.workers_recycled, 1);
        scheduler.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_does_not_block_later_tasks() {
        let registry = HandlerRegistry::new()
            .with_handler(
                "slow",
                FnHandler::arc("slow", |_ctx: TaskContext| async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(json!("late"))
                }),
            )
            .with_handler(
                "echo",
                FnHandler::arc("echo", |ctx: TaskContext| async move { Ok(ctx.payload) }),
            );
        let scheduler = TaskScheduler::new(SchedulerConfig::fixed(2), Arc::new(registry)).unwrap();

        let slow = scheduler
            .submit(TaskSpec::new("slow", json!(null)).with_timeout(Duration::from_millis(50)))
            .unwrap();
        let slow_id = slow.id();
        assert!(matches!(
            slow.wait().await,
            Err(AnalyzerError::TaskTimeout { task_id, timeout_ms: 50 }) if task_id == slow_id
        ));

        let output = scheduler
            .submit(TaskSpec::new("echo", json!("next")))
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(output.output, json!("next"));
        scheduler.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_task_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let registry = HandlerRegistry::new().with_handler(
            "flaky",
            FnHandler::arc("flaky", move |ctx: TaskContext| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(AnalyzerError::execution(ctx.task_id, "registry unavailable"))
                    } else {
                        Ok(json!("ok"))
                    }
                }
            }),
        );
        let scheduler = TaskScheduler::new(SchedulerConfig::fixed(1), Arc::new(registry)).unwrap();

        let output = scheduler
            .submit(TaskSpec::new("flaky", json!(null)).with_max_retries(2))
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(output.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let second = scheduler
            .submit(TaskSpec::new("flaky", json!(null)))
            .unwrap()
            .wait()
            .await;
        assert_eq!(second.unwrap().attempts, 1);
        assert_eq!(scheduler.stats().counters.retried, 2);
        scheduler.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_fails_pending_tasks() {
        let gate = Arc::new(Semaphore::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));
        let scheduler =
            TaskScheduler::new(SchedulerConfig::fixed(1), gated_registry(gate, order.clone()))
                .unwrap();

        let blocker = scheduler.submit(TaskSpec::new("gate", json!(null))).unwrap();
        wait_until(|| scheduler.stats().in_flight == 1).await;
        let queued = scheduler.submit(TaskSpec::new("record", json!("never"))).unwrap();

        scheduler.shutdown(Duration::from_millis(50)).await.unwrap();

        assert!(matches!(blocker.wait().await, Err(AnalyzerError::ShuttingDown)));
        assert!(matches!(queued.wait().await, Err(AnalyzerError::ShuttingDown)));
        assert!(order.lock().unwrap().is_empty());
        assert!(matches!(
            scheduler.submit(TaskSpec::new("record", json!("late"))),
            Err(AnalyzerError::ShuttingDown)
        ));
    }
}
