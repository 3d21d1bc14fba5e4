use std::time::Duration;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, Command};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde_json::{json, Value};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use analyzer_core::{AppConfig, LogLevel, OutputFormat};

mod app;
mod shutdown;

use app::{Application, PackageSource};
use shutdown::{wait_for_shutdown_signal, ShutdownManager};

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("analyzer")
        .version("1.0.0")
        .about("批量依赖分析执行引擎")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，未指定时依次查找 config/analyzer.toml 和 analyzer.toml"),
        )
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .value_name("FILE")
                .help("包描述的JSON数组文件")
                .conflicts_with("synthetic")
                .required_unless_present("synthetic"),
        )
        .arg(
            Arg::new("synthetic")
                .long("synthetic")
                .value_name("N")
                .help("生成N个合成包进行分析")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("task-type")
                .short('t')
                .long("task-type")
                .value_name("TYPE")
                .help("使用的任务处理器，默认取配置中的 default_task_type"),
        )
        .arg(
            Arg::new("max-concurrency")
                .long("max-concurrency")
                .value_name("N")
                .help("限制优化计划可用的CPU核数")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("把逐条结果写入该文件"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty", "text"]),
        )
        .arg(
            Arg::new("print-metrics")
                .long("print-metrics")
                .help("运行结束后输出Prometheus格式的指标")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");
    let source = match matches.get_one::<String>("input") {
        Some(path) => PackageSource::File(path.clone()),
        None => PackageSource::Synthetic(
            matches.get_one::<usize>("synthetic").copied().unwrap_or_default(),
        ),
    };
    let task_type = matches.get_one::<String>("task-type").cloned();
    let output_path = matches.get_one::<String>("output").cloned();
    let print_metrics = matches.get_flag("print-metrics");

    // 加载配置
    let mut config = AppConfig::load(config_path.map(String::as_str))
        .context("加载配置失败")?;
    if let Some(max) = matches.get_one::<usize>("max-concurrency") {
        config.coordinator.max_concurrency = Some(*max);
    }

    // 命令行参数优先，其次是配置文件与 LOG_LEVEL / LOG_FORMAT
    let log_config = config.logging.clone().with_env_overrides();
    let log_level = match matches.get_one::<String>("log-level") {
        Some(level) => level.parse::<LogLevel>()?,
        None => log_config.level,
    };
    let log_format = match matches.get_one::<String>("log-format") {
        Some(format) => format.parse::<OutputFormat>()?,
        None => log_config.format,
    };
    init_logging(log_level, log_format, log_config.include_target)?;

    let metrics_handle = if print_metrics {
        Some(install_metrics_recorder()?)
    } else {
        None
    };

    info!("启动批量依赖分析");
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    let packages = source.load()?;
    let app = Application::new(config).await?;
    app.init().await;

    // 创建优雅关闭管理器
    let shutdown_manager = ShutdownManager::new();
    let shutdown_rx = shutdown_manager.subscribe().await;
    let signal_task = {
        let shutdown_manager = shutdown_manager.clone();
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            info!("收到关闭信号，开始优雅关闭...");
            shutdown_manager.shutdown().await;
        })
    };

    let outcome = app.run(packages, task_type.as_deref(), shutdown_rx).await;
    signal_task.abort();

    // 协调器关闭有宽限期，这里再兜一层总超时
    match tokio::time::timeout(Duration::from_secs(30), app.shutdown()).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e:#}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    let report = match outcome? {
        Some(report) => report,
        None => {
            warn!("分析被中断，没有输出结果");
            return Ok(());
        }
    };

    if let Some(path) = output_path {
        let results: Vec<Value> = report.results.iter().map(|r| r.to_json()).collect();
        let document = json!({ "summary": report.summary(), "results": results });
        let content = serde_json::to_string_pretty(&document)?;
        std::fs::write(&path, content).with_context(|| format!("写入结果文件失败: {path}"))?;
        info!("结果已写入: {path}");
    }

    println!("{}", serde_json::to_string_pretty(&report.summary())?);

    if let Some(handle) = metrics_handle {
        println!("{}", handle.render());
    }

    if report.failed > 0 {
        warn!("{} 个包分析失败", report.failed);
    }
    Ok(())
}

/// 初始化日志系统，日志写到 stderr，stdout 只留给报告
fn init_logging(level: LogLevel, format: OutputFormat, include_target: bool) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(include_target);

    match format {
        OutputFormat::Json => registry
            .with(layer.json())
            .try_init()
            .context("初始化JSON日志格式失败")?,
        OutputFormat::Pretty => registry
            .with(layer.pretty())
            .try_init()
            .context("初始化Pretty日志格式失败")?,
        OutputFormat::Text => registry
            .with(layer.compact())
            .try_init()
            .context("初始化文本日志格式失败")?,
    }

    Ok(())
}

fn install_metrics_recorder() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("安装Prometheus指标记录器失败")
}
