use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

const DEFAULT_FILTER: &str = "info,agent_api_server=debug";

/// Install the global JSON subscriber.
///
/// Logs go to a daily-rolling file under `logging.directory` when it is set and to stdout
/// otherwise. The returned guard flushes the background writer and must outlive the server.
pub fn init_tracing(config: &LoggingConfig) -> Result<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?;

    let (writer, guard) = match &config.directory {
        Some(directory) => {
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("agent-api")
                .filename_suffix("log")
                .build(directory)?;
            tracing_appender::non_blocking(appender)
        }
        None => tracing_appender::non_blocking(std::io::stdout()),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true),
        )
        .try_init()?;

    Ok(guard)
}
