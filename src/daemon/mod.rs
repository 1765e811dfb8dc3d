use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use scheduler::{ReportScheduler, SchedulerConfig};
use storage::usage_store::{open_store, JsonUsageStore};
use ticker::TickModule;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    email::{emailjs::EmailJsSender, EmailSender},
    tracking::SiteMatcher,
    utils::clock::{Clock, DefaultClock},
};

pub mod args;
pub mod delivery;
pub mod scheduler;
pub mod shutdown;
pub mod storage;
pub mod ticker;

/// Scheduler wired to the production store, transport and clock of an application directory.
pub fn create_scheduler(
    dir: &std::path::Path,
    config: SchedulerConfig,
) -> Result<ReportScheduler<Arc<JsonUsageStore>>> {
    let store = Arc::new(open_store(dir, SiteMatcher::default().site_names())?);
    let sender: Arc<dyn EmailSender> = Arc::new(EmailJsSender::new()?);
    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
    Ok(ReportScheduler::new(store, sender, clock, config))
}

/// Represents the starting point for the daemon
pub async fn start_daemon(dir: PathBuf, config: SchedulerConfig) -> Result<()> {
    let scheduler = Arc::new(create_scheduler(&dir, config)?);

    let shutdown_token = CancellationToken::new();
    let ticker = TickModule::new(scheduler, shutdown_token.clone(), Arc::new(DefaultClock));

    info!("Daemon started in {dir:?}");
    let (_, ticker_result) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token),
        ticker.run(),
    );

    if let Err(ticker_result) = ticker_result {
        error!("Scheduler loop got an error {:?}", ticker_result);
    }

    Ok(())
}
