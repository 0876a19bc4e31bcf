use kawase_core::config::LogConfig;
use std::error::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const LOG_FILE_PREFIX: &str = "kawase.log";

/// # Summary
/// 安装全局日志订阅者。
///
/// # Logic
/// 1. 过滤级别优先取 `RUST_LOG`，否则使用配置中的 `log.level`。
/// 2. 始终输出到标准输出。
/// 3. 配置了 `log.dir` 时，额外按天滚动写入该目录（非阻塞写入）。
///
/// # Returns
/// 文件写入器的守卫，需在进程退出前保持存活；未启用文件日志时为 None。
pub fn init_tracing(log: &LogConfig) -> Result<Option<WorkerGuard>, Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));

    let (file_layer, guard) = match &log.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}
