//! 包描述与内置的启发式分析处理器

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use analyzer_core::traits::{TaskContext, TaskHandler};
use analyzer_core::{AnalyzerError, AnalyzerResult};

pub const PACKAGE_ANALYSIS: &str = "package_analysis";

const INSTALL_SCRIPTS: [&str; 3] = ["preinstall", "install", "postinstall"];
const SUSPICIOUS_COMMANDS: [&str; 5] = ["curl ", "wget ", "eval ", "| sh", "| bash"];

/// 包的元数据描述，未列出的字段保存在 `extra` 中
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<Value>,
    #[serde(default)]
    pub maintainers: Option<Value>,
    #[serde(default)]
    pub keywords: Option<Value>,
    #[serde(default)]
    pub repository: Option<Value>,
    #[serde(default)]
    pub scripts: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PackageDescriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: Some(version.into()),
            ..Default::default()
        }
    }

    fn install_scripts(&self) -> Vec<(&str, &str)> {
        let Some(scripts) = &self.scripts else {
            return Vec::new();
        };
        INSTALL_SCRIPTS
            .iter()
            .filter_map(|hook| {
                scripts
                    .get(*hook)
                    .and_then(Value::as_str)
                    .map(|command| (*hook, command))
            })
            .collect()
    }

    /// 按安装脚本、仓库与维护信息给出风险等级和发现项
    pub fn assess(&self) -> (&'static str, Vec<String>) {
        let mut findings = Vec::new();
        let install_scripts = self.install_scripts();

        let suspicious: Vec<&str> = install_scripts
            .iter()
            .filter(|(_, command)| {
                SUSPICIOUS_COMMANDS
                    .iter()
                    .any(|pattern| command.contains(pattern))
            })
            .map(|(hook, _)| *hook)
            .collect();
        for hook in &suspicious {
            findings.push(format!("{hook} 脚本会下载或执行远程代码"));
        }
        for (hook, _) in &install_scripts {
            if !suspicious.contains(hook) {
                findings.push(format!("包含 {hook} 安装脚本"));
            }
        }
        if self.repository.is_none() {
            findings.push("缺少源码仓库信息".to_string());
        }
        if self.author.is_none() && self.maintainers.is_none() {
            findings.push("缺少作者与维护者信息".to_string());
        }

        let level = if !suspicious.is_empty() {
            "critical"
        } else if !install_scripts.is_empty() {
            "high"
        } else if self.repository.is_none() {
            "medium"
        } else if self.author.is_none() && self.maintainers.is_none() {
            "low"
        } else {
            "none"
        };
        (level, findings)
    }
}

/// 生成 `count` 个合成包，用于压测执行引擎
pub fn synthetic_packages(count: usize) -> Vec<PackageDescriptor> {
    (0..count)
        .map(|i| {
            let mut package = PackageDescriptor::new(format!("synthetic-{i}"), "1.0.0");
            package.description = Some(format!("synthetic package #{i}"));
            if i % 3 != 0 {
                package.repository = Some(json!({
                    "type": "git",
                    "url": format!("https://example.invalid/synthetic-{i}.git"),
                }));
            }
            if i % 5 != 0 {
                package.author = Some(json!("analyzer"));
            }
            if i % 17 == 0 {
                let mut scripts = Map::new();
                scripts.insert("postinstall".to_string(), json!("node setup.js"));
                package.scripts = Some(scripts);
            }
            package
        })
        .collect()
}

/// 内置的包分析处理器，payload 为 [`PackageDescriptor`]
#[derive(Debug, Default)]
pub struct PackageAnalysisHandler;

#[async_trait]
impl TaskHandler for PackageAnalysisHandler {
    async fn handle(&self, context: TaskContext) -> AnalyzerResult<Value> {
        let package: PackageDescriptor =
            serde_json::from_value(context.payload).map_err(|e| {
                AnalyzerError::execution(context.task_id, format!("无效的包描述: {e}"))
            })?;
        let (risk_level, findings) = package.assess();
        Ok(json!({
            "name": package.name,
            "version": package.version,
            "risk_level": risk_level,
            "findings": findings,
        }))
    }

    fn name(&self) -> &str {
        PACKAGE_ANALYSIS
    }
}
