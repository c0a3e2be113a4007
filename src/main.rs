use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use evaluator_config::{AppConfig, ConfigValidator, LogLevel, OutputFormat};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod app;
mod shutdown;

use app::Application;
use shutdown::install_shutdown_handler;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("evaluator")
        .version(env!("CARGO_PKG_VERSION"))
        .about("提交评估 worker")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时搜索默认位置"),
        )
        .arg(
            Arg::new("worker-id")
                .long("worker-id")
                .value_name("ID")
                .help("覆盖配置中的 worker ID"),
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
                .value_parser(["json", "pretty"]),
        )
        .arg(
            Arg::new("once")
                .long("once")
                .help("最多处理一条消息后退出")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("enqueue")
                .long("enqueue")
                .value_name("JSON_FILE")
                .help("启动前发布一条任务消息"),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mut config = AppConfig::load(config_path).context("加载配置失败")?;

    if let Some(id) = matches.get_one::<String>("worker-id") {
        config.worker.worker_id = id.clone();
    }
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.parse::<LogLevel>().map_err(anyhow::Error::msg)?;
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format =
            format.parse::<OutputFormat>().map_err(anyhow::Error::msg)?;
    }
    config.validate().context("配置校验失败")?;

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    )?;
    init_metrics(config.observability.metrics_listen_address.as_deref())?;

    info!("启动评估 worker {}", config.worker.worker_id);
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    let app = Application::new(config).await?;
    if let Some(path) = matches.get_one::<String>("enqueue") {
        app.enqueue_file(Path::new(path)).await?;
    }

    let shutdown = install_shutdown_handler();
    app.run(shutdown, matches.get_flag("once")).await?;

    info!("评估 worker 已退出");
    Ok(())
}

/// 初始化日志系统，`RUST_LOG` 优先于配置的级别
fn init_logging(log_level: &LogLevel, log_format: &OutputFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        OutputFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("初始化JSON日志格式失败")?,
        OutputFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .context("初始化Pretty日志格式失败")?,
    }

    Ok(())
}

fn init_metrics(listen_address: Option<&str>) -> Result<()> {
    let Some(address) = listen_address else {
        return Ok(());
    };
    let address: SocketAddr = address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {address}"))?;
    PrometheusBuilder::new()
        .with_http_listener(address)
        .install()
        .context("启动 Prometheus 导出器失败")?;
    info!("Prometheus 指标监听于 {address}");
    Ok(())
}
