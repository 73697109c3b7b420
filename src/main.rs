use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use tracing::{error, info, warn};

use taskflow::demo;
use taskflow::shutdown::{wait_for_shutdown_signal, ShutdownManager};
use taskflow::Engine;
use taskflow_core::logging::init_logging_from_config;
use taskflow_core::AppConfig;
use taskflow_infrastructure::create_task_store;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("taskflow")
        .version(env!("CARGO_PKG_VERSION"))
        .about("DAG任务引擎")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，未指定时使用默认配置和环境变量"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .arg(
            Arg::new("submit")
                .short('s')
                .long("submit")
                .value_name("TEMPLATE")
                .help("启动后立即手动提交的模板，可重复")
                .action(ArgAction::Append),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");
    let mut config = AppConfig::load(config_path.map(String::as_str))
        .with_context(|| format!("加载配置失败: {config_path:?}"))?;
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }

    init_logging_from_config(&config.observability)?;
    info!("启动DAG任务引擎");
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    let store = create_task_store(&config.database)
        .await
        .context("初始化存储失败")?;
    let (actions, templates) = demo::registries().context("注册演示动作失败")?;
    let engine = Arc::new(Engine::new(
        config,
        store,
        actions,
        templates,
        vec![Arc::new(demo::LogHook)],
    ));
    engine.seed_definitions().await?;

    if let Some(submits) = matches.get_many::<String>("submit") {
        for template in submits {
            let task = engine
                .operations()
                .submit_task(template, None, "cli")
                .await
                .with_context(|| format!("提交模板 {template} 失败"))?;
            info!("已提交任务 {}({})", task.name, task.id);
        }
    }

    let shutdown_manager = ShutdownManager::new();
    let engine_handle = {
        let engine = Arc::clone(&engine);
        let shutdown_rx = shutdown_manager.subscribe().await;
        tokio::spawn(async move {
            if let Err(e) = engine.run(shutdown_rx).await {
                error!("引擎运行失败: {e}");
            }
        })
    };

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(Duration::from_secs(30), engine_handle).await {
        Ok(Ok(())) => info!("引擎已优雅关闭"),
        Ok(Err(e)) => error!("引擎关闭时发生错误: {e}"),
        Err(_) => warn!("引擎关闭超时，强制退出"),
    }

    info!("DAG任务引擎已退出");
    Ok(())
}
