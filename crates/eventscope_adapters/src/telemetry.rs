use std::path::PathBuf;

use directories::ProjectDirs;
use tracing::subscriber::set_global_default;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_log::LogTracer;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Directory the rolling log files are written to.
pub fn log_directory() -> PathBuf {
    ProjectDirs::from("com", "eventscope", "eventscope")
        .map(|d| d.data_local_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

/// Install the global subscriber: `RUST_LOG` (or `env_filter`) on a pretty
/// stderr layer plus a daily file under [`log_directory`].
///
/// Stdout is left to command output. Keep the returned guard alive for the
/// lifetime of the process or buffered file logs are lost.
pub fn init_subscriber(name: &str, env_filter: &str) -> WorkerGuard {
    LogTracer::init().expect("failed to initialize log tracer bridge");

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env_filter));

    let formatting_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .pretty();

    let file_appender = tracing_appender::rolling::daily(log_directory(), format!("{}.log", name));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer().with_ansi(false).with_writer(non_blocking);

    let subscriber = Registry::default()
        .with(env_filter)
        .with(formatting_layer)
        .with(file_layer);

    set_global_default(subscriber).expect("failed to set global tracing subscriber");

    guard
}
