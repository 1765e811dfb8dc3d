use std::{path::Path, sync::LazyLock};

use anyhow::Result;
use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::{
    fmt::{format::FmtSpan, writer::MakeWriterExt},
    EnvFilter,
};

pub const CLI_PREFIX: &str = "cli";
pub const DAEMON_PREFIX: &str = "daemon";
pub const LOGS_DIR: &str = "logs";

const MAX_LOG_FILES: usize = 5;

/// Directives for the crate at `level`. The http stack only reports warnings, it is chatty at
/// debug level and would bury delivery logs.
fn filter_directives(level: &str) -> String {
    format!(
        "{}={level},reqwest=warn,hyper=warn",
        env!("CARGO_PKG_NAME").replace("-", "_"),
    )
}

/// Logs into `<app_dir>/logs/<prefix>.<date>`, rotated daily. `log_level` takes precedence over
/// `RUST_LOG`.
pub fn enable_logging(
    prefix: &str,
    app_dir: &Path,
    log_level: Option<LevelFilter>,
    show_std: bool,
) -> Result<()> {
    let appender = tracing_appender::rolling::Builder::new()
        .rotation(Rotation::DAILY)
        .max_log_files(MAX_LOG_FILES)
        .filename_prefix(prefix)
        .build(app_dir.join(LOGS_DIR))?;

    let stdout = std::io::stdout.with_filter(move |_| show_std);

    let level = log_level
        .map(|v| v.to_string())
        .unwrap_or_else(|| std::env::var("RUST_LOG").unwrap_or_else(|_| "debug".into()));

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter_directives(&level)))
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(stdout.and(appender))
        .with_ansi(false)
        .init();
    Ok(())
}

pub static TEST_LOGGING: LazyLock<()> = LazyLock::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::TRACE)
        .with_test_writer()
        .pretty()
        .try_init();
});
