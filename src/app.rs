use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{info, warn};

use analyzer_application::{
    synthetic_packages, AnalysisCoordinator, AnalysisReport, PackageAnalysisHandler,
    PackageDescriptor, PACKAGE_ANALYSIS,
};
use analyzer_core::AppConfig;
use analyzer_dispatcher::HandlerRegistry;
use analyzer_infrastructure::{AnalysisCache, MemoryController};

/// 待分析的输入来源
#[derive(Debug, Clone)]
pub enum PackageSource {
    /// JSON 数组文件，每个元素是一个包描述
    File(String),
    Synthetic(usize),
}

impl PackageSource {
    pub fn load(&self) -> Result<Vec<PackageDescriptor>> {
        match self {
            PackageSource::File(path) => load_packages(path),
            PackageSource::Synthetic(count) => Ok(synthetic_packages(*count)),
        }
    }
}

pub fn load_packages(path: impl AsRef<Path>) -> Result<Vec<PackageDescriptor>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("读取输入文件失败: {}", path.display()))?;
    let packages: Vec<PackageDescriptor> = serde_json::from_str(&content)
        .with_context(|| format!("解析输入文件失败: {}", path.display()))?;
    Ok(packages)
}

/// 组装缓存、内存控制器、处理器注册表和协调器
pub struct Application {
    config: AppConfig,
    coordinator: Arc<AnalysisCoordinator>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let registry = HandlerRegistry::new()
            .with_handler(PACKAGE_ANALYSIS, Arc::new(PackageAnalysisHandler));

        let cache = Arc::new(AnalysisCache::from_config(&config.cache).await);
        let memory = Arc::new(
            MemoryController::with_system_probe(config.memory.clone())
                .context("创建内存控制器失败")?,
        );

        let coordinator = Arc::new(AnalysisCoordinator::new(
            &config,
            Arc::new(registry),
            cache,
            memory,
        ));

        Ok(Self {
            config,
            coordinator,
        })
    }

    pub async fn init(&self) {
        self.coordinator.init().await;
        info!(
            "应用初始化完成, 默认任务类型: {}",
            self.config.coordinator.default_task_type
        );
    }

    /// 执行一次分析；收到关闭信号时放弃本次运行并返回 None
    pub async fn run(
        &self,
        packages: Vec<PackageDescriptor>,
        task_type: Option<&str>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<Option<AnalysisReport>> {
        info!("开始分析 {} 个包", packages.len());

        tokio::select! {
            report = self.coordinator.analyze(&packages, task_type) => {
                let report = report.context("分析运行失败")?;
                info!(
                    "分析完成: 成功 {}, 失败 {}, 缓存命中 {}, 耗时 {}ms",
                    report.succeeded(),
                    report.failed,
                    report.cache_hits,
                    report.elapsed_ms
                );
                Ok(Some(report))
            }
            _ = shutdown_rx.recv() => {
                warn!("收到关闭信号，放弃当前分析");
                Ok(None)
            }
        }
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.coordinator
            .shutdown()
            .await
            .context("关闭协调器失败")?;
        info!("应用已关闭");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_packages_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"name": "left-pad", "version": "1.3.0"}}, {{"name": "lodash", "license": "MIT"}}]"#
        )
        .unwrap();

        let packages = PackageSource::File(file.path().display().to_string())
            .load()
            .unwrap();
        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].name, "left-pad");
        assert_eq!(packages[1].version, None);
        assert_eq!(packages[1].extra["license"], "MIT");
    }

    #[test]
    fn test_load_packages_rejects_non_array() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"name": "left-pad"}}"#).unwrap();
        assert!(load_packages(file.path()).is_err());
        assert!(load_packages("/nonexistent/packages.json").is_err());
    }

    #[test]
    fn test_synthetic_source() {
        let packages = PackageSource::Synthetic(3).load().unwrap();
        assert_eq!(packages.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_and_shutdown() {
        let mut config = AppConfig::default();
        // 不依赖宿主机的可用内存
        config.memory.ceiling_mb = Some(1024.0);
        let app = Application::new(config).await.unwrap();
        app.init().await;

        let (_tx, rx) = broadcast::channel(1);
        let report = app
            .run(synthetic_packages(5), None, rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.results.len(), 5);
        assert_eq!(report.failed, 0);

        app.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_task_type_fails() {
        let app = Application::new(AppConfig::default()).await.unwrap();
        let (_tx, rx) = broadcast::channel(1);
        let result = app.run(synthetic_packages(1), Some("nope"), rx).await;
        assert!(result.is_err());
    }
}
