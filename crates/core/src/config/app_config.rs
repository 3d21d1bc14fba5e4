use std::path::Path;

use anyhow::{Context, Result};
use ::config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::{
    cache::CacheConfig, coordinator::CoordinatorConfig, memory::MemoryConfig,
    scheduler::SchedulerConfig, validation::ConfigValidator,
};
use crate::logging::LogConfig;
use crate::AnalyzerResult;

/// 未指定配置文件时依次查找的路径
const DEFAULT_CONFIG_PATHS: [&str; 2] = ["config/analyzer.toml", "analyzer.toml"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub cache: CacheConfig,
    pub memory: MemoryConfig,
    pub coordinator: CoordinatorConfig,
    pub logging: LogConfig,
}

impl AppConfig {
    /// 默认值 -> TOML文件 -> `ANALYZER_` 环境变量，后者覆盖前者
    ///
    /// 环境变量用 `__` 分隔层级，例如 `ANALYZER_SCHEDULER__MAX_WORKERS=8`。
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults =
            ConfigBuilder::try_from(&AppConfig::default()).context("构建默认配置失败")?;
        let mut builder = ConfigBuilder::builder().add_source(defaults);

        match config_path {
            Some(path) => {
                if !Path::new(path).exists() {
                    return Err(anyhow::anyhow!("配置文件不存在: {}", path));
                }
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
            None => {
                if let Some(path) = DEFAULT_CONFIG_PATHS
                    .iter()
                    .find(|path| Path::new(path).exists())
                {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("ANALYZER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> AnalyzerResult<()> {
        self.scheduler.validate()?;
        self.cache.validate()?;
        self.memory.validate()?;
        self.coordinator.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_roundtrip_keeps_overrides() {
        let mut config = AppConfig::default();
        config.scheduler.min_workers = 1;
        config.scheduler.max_workers = 3;
        config.cache.hard_cap = 42;

        let toml_str = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&toml_str).unwrap();
        assert_eq!(parsed.scheduler.max_workers, 3);
        assert_eq!(parsed.cache.hard_cap, 42);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed = AppConfig::from_toml(
            r#"
            [scheduler]
            min_workers = 2
            max_workers = 4
            max_queue_size = 50
            "#,
        )
        .unwrap();
        assert_eq!(parsed.scheduler.max_queue_size, 50);
        assert_eq!(parsed.cache.risk_ttl.critical_seconds, 300);
        assert_eq!(parsed.coordinator.default_task_type, "package_analysis");
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        let result = AppConfig::from_toml(
            r#"
            [scheduler]
            min_workers = 8
            max_workers = 2
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[scheduler]\nmin_workers = 1\nmax_workers = 2\n\n[cache]\nhard_cap = 7"
        )
        .unwrap();

        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.scheduler.max_workers, 2);
        assert_eq!(config.cache.hard_cap, 7);
        assert_eq!(config.memory.sample_window, 100);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/definitely/not/here.toml")).is_err());
    }
}
