use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use tokio::signal;
use tracing::{error, info, warn};
use validator::{load_inputs, Application, EnvelopeEngineFactory, ShutdownManager};
use validator_core::{init_logging, LogFormat, PipelineStatus, ValidatorConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("validator")
        .version("1.0.0")
        .about("医疗记录批量验证")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时查找 config/validator.toml"),
        )
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .value_name("DIR")
                .help("待验证记录所在目录")
                .required(true),
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
                .value_parser(["json", "pretty", "compact"]),
        )
        .arg(
            Arg::new("force")
                .long("force")
                .help("忽略缓存与已存储结果，强制重新验证")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");
    let input_dir = matches
        .get_one::<String>("input")
        .map(PathBuf::from)
        .context("缺少 --input 参数")?;
    let force = matches.get_flag("force");

    // 加载配置
    let mut config = ValidatorConfig::load(config_path.map(String::as_str))
        .with_context(|| match config_path {
            Some(path) => format!("加载配置文件失败: {path}"),
            None => "加载默认配置失败".to_string(),
        })?;

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.format = LogFormat::from_str(format)
            .map_err(|e| anyhow::anyhow!(e))
            .context("解析日志格式失败")?;
    }

    // 初始化日志系统
    init_logging(&config.observability)?;

    info!("启动医疗记录验证");
    info!("输入目录: {}", input_dir.display());

    let inputs = load_inputs(&input_dir)?;
    info!("共读取 {} 条记录", inputs.len());

    let app = Arc::new(Application::new(
        config,
        Arc::new(EnvelopeEngineFactory),
        None,
    )?);

    // 创建优雅关闭管理器
    let shutdown_manager = ShutdownManager::new();
    let listener_handle = app.start_listeners(shutdown_manager.subscribe());

    let run = {
        let app = Arc::clone(&app);
        tokio::spawn(async move { app.validate(inputs, force).await })
    };

    let outcome = tokio::select! {
        joined = run => Some(joined.context("验证任务异常退出")?),
        _ = wait_for_shutdown_signal() => {
            info!("收到关闭信号，取消运行中的流水线...");
            None
        }
    };

    app.shutdown().await;
    shutdown_manager.shutdown();
    if let Err(e) = listener_handle.await {
        warn!("设置监听退出异常: {e}");
    }

    let result = match outcome {
        Some(result) => result?,
        None => {
            info!("验证已取消");
            return Ok(());
        }
    };

    let output = serde_json::to_string_pretty(&result).context("序列化验证结果失败")?;
    println!("{output}");

    match result.status {
        PipelineStatus::Completed => {
            info!(
                "验证完成: 有效 {}, 无效 {}, 失败 {}",
                result.summary.valid_resources,
                result.summary.invalid_resources,
                result.summary.failed_validations
            );
            Ok(())
        }
        status => {
            error!("验证未完成: {:?}", status);
            Err(anyhow::anyhow!(
                "流水线以 {:?} 状态结束: {}",
                status,
                result.error.unwrap_or_default()
            ))
        }
    }
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
