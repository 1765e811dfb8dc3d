use std::path::PathBuf;

use clap::Parser;
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
pub struct DaemonArgs {
    /// Run in the current process instead of detaching.
    #[arg(long)]
    pub force: bool,
    #[arg(long)]
    pub dir: Option<PathBuf>,
    /// This option is for debugging purposes only.
    #[arg(long = "log-console")]
    pub log_console: bool,
    #[arg(long = "log-filter")]
    pub log: Option<LevelFilter>,
    /// Seconds between scheduler wake-ups.
    #[arg(long = "tick-seconds", default_value_t = 60)]
    pub tick_seconds: u64,
}
