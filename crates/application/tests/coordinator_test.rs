#[cfg(test)]
mod coordinator_tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use analyzer_application::{
        synthetic_packages, AnalysisCoordinator, PackageAnalysisHandler, PackageDescriptor,
        ResultSource, PACKAGE_ANALYSIS,
    };
    use analyzer_core::models::ProcessingMode;
    use analyzer_core::traits::TaskContext;
    use analyzer_core::{AnalyzerError, AnalyzerResult, AppConfig};
    use analyzer_dispatcher::{FnHandler, HandlerRegistry};
    use analyzer_infrastructure::{
        AnalysisCache, MemoryController, MemoryProbe, MemorySnapshot, MultiTierCache,
    };
    use serde_json::json;

    struct FixedProbe;

    impl MemoryProbe for FixedProbe {
        fn snapshot(&self) -> AnalyzerResult<MemorySnapshot> {
            Ok(MemorySnapshot {
                total_mb: 8192.0,
                available_mb: 4096.0,
                process_mb: 128.0,
            })
        }
    }

    fn build(registry: HandlerRegistry) -> AnalysisCoordinator {
        build_with(registry, AppConfig::default())
    }

    fn build_with(registry: HandlerRegistry, mut config: AppConfig) -> AnalysisCoordinator {
        config.coordinator.max_retries = 0;
        let cache = Arc::new(AnalysisCache::new(
            Arc::new(MultiTierCache::new(&config.cache.l1)),
            &config.cache,
        ));
        let memory = Arc::new(
            MemoryController::new(config.memory.clone(), Arc::new(FixedProbe)).unwrap(),
        );
        AnalysisCoordinator::new(&config, Arc::new(registry), cache, memory)
    }

    fn default_registry() -> HandlerRegistry {
        HandlerRegistry::new().with_handler(PACKAGE_ANALYSIS, Arc::new(PackageAnalysisHandler))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_batch_run_then_cache_hits() {
        let coordinator = build(default_registry());
        coordinator.init().await;
        let packages = synthetic_packages(20);

        let first = coordinator.analyze(&packages, None).await.unwrap();
        assert_eq!(first.plan.processing_mode, ProcessingMode::Batch);
        assert_eq!(first.results.len(), 20);
        assert_eq!(first.failed, 0);
        assert_eq!(first.cache_hits, 0);
        assert_eq!(first.executed, 20);
        assert!(first.executor.is_some());
        for (package, result) in packages.iter().zip(&first.results) {
            let output = result.result.as_ref().unwrap();
            assert_eq!(output["name"], package.name.as_str());
            assert_eq!(result.source, ResultSource::Executed);
        }

        let second = coordinator.analyze(&packages, None).await.unwrap();
        assert_eq!(second.cache_hits, 20);
        assert_eq!(second.executed, 0);
        assert!(second
            .results
            .iter()
            .all(|r| r.source == ResultSource::Cache));
        assert_eq!(
            second.results[3].result.as_ref().unwrap(),
            first.results[3].result.as_ref().unwrap()
        );

        coordinator.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failures_stay_per_item_and_are_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let registry = HandlerRegistry::new().with_handler(
            PACKAGE_ANALYSIS,
            FnHandler::arc(PACKAGE_ANALYSIS, move |ctx: TaskContext| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let name = ctx.payload["name"].as_str().unwrap_or_default().to_string();
                    if name == "broken" {
                        Err(AnalyzerError::execution(ctx.task_id, "analysis crashed"))
                    } else {
                        Ok(json!({"name": name, "risk_level": "low"}))
                    }
                }
            }),
        );
        let coordinator = build(registry);
        let packages = vec![
            PackageDescriptor::new("ok-1", "1.0.0"),
            PackageDescriptor::new("broken", "0.0.1"),
            PackageDescriptor::new("ok-2", "2.0.0"),
        ];

        let report = coordinator.analyze(&packages, None).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.results[0].result.as_ref().unwrap()["name"], "ok-1");
        assert!(matches!(
            report.results[1].result,
            Err(AnalyzerError::TaskExecution { .. })
        ));
        assert_eq!(report.results[2].result.as_ref().unwrap()["name"], "ok-2");

        let again = coordinator.analyze(&packages, None).await.unwrap();
        assert_eq!(again.cache_hits, 2);
        assert_eq!(again.executed, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        coordinator.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_large_input_uses_streaming_mode() {
        let coordinator = build(default_registry());
        coordinator.init().await;
        let packages = synthetic_packages(5_001);

        let report = coordinator.analyze(&packages, None).await.unwrap();
        assert_eq!(report.plan.processing_mode, ProcessingMode::Streaming);
        assert_eq!(report.results.len(), 5_001);
        assert_eq!(report.failed, 0);
        assert_eq!(report.results[4_321].result.as_ref().unwrap()["name"], "synthetic-4321");
        let executor = report.executor.as_ref().unwrap();
        assert_eq!(executor.backend, "cooperative");
        // 每个批次之后都会采样一次内存
        assert!(report.memory.samples >= 11);

        coordinator.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_hybrid_mode_uses_worker_pool() {
        let coordinator = build(default_registry());
        let packages = synthetic_packages(600);

        let report = coordinator.analyze(&packages, None).await.unwrap();
        assert_eq!(report.plan.processing_mode, ProcessingMode::Hybrid);
        assert_eq!(report.failed, 0);
        let executor = report.executor.as_ref().unwrap();
        assert_eq!(executor.backend, "worker_pool");
        assert!(executor.peak_workers <= report.plan.parallelism);

        coordinator.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_hybrid_mode_collects_under_memory_pressure() {
        let mut config = AppConfig::default();
        // 进程占用 128MB，超过上限的 80%
        config.memory.ceiling_mb = Some(100.0);
        let coordinator = build_with(default_registry(), config);

        let reclaimed = Arc::new(AtomicUsize::new(0));
        let counter = reclaimed.clone();
        coordinator.memory().register_reclaim_hook(
            "test_hook",
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                0
            }),
        );

        let report = coordinator
            .analyze(&synthetic_packages(600), None)
            .await
            .unwrap();
        assert_eq!(report.plan.processing_mode, ProcessingMode::Hybrid);
        assert_eq!(report.failed, 0);
        assert!(report.memory.forced_collections > 0);
        assert!(reclaimed.load(Ordering::SeqCst) > 0);

        coordinator.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shutdown_during_run_keeps_per_item_results() {
        let started = Arc::new(AtomicUsize::new(0));
        let counter = started.clone();
        let registry = HandlerRegistry::new().with_handler(
            PACKAGE_ANALYSIS,
            FnHandler::arc(PACKAGE_ANALYSIS, move |ctx: TaskContext| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(json!({"name": ctx.payload["name"], "risk_level": "low"}))
                }
            }),
        );
        let mut config = AppConfig::default();
        config.coordinator.shutdown_grace_ms = 10;
        let coordinator = Arc::new(build_with(registry, config));

        let run = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                let packages = synthetic_packages(8);
                coordinator.analyze(&packages, None).await
            })
        };
        while started.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        coordinator.shutdown().await.unwrap();

        let report = run.await.unwrap().unwrap();
        assert_eq!(report.plan.processing_mode, ProcessingMode::Batch);
        assert_eq!(report.results.len(), 8);
        assert_eq!(report.executed, 8);
        assert!(report.executor.is_some());
        assert!(report
            .results
            .iter()
            .all(|r| r.source == ResultSource::Executed));
    }
}
