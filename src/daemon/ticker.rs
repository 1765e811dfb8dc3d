use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use crate::utils::clock::Clock;

use super::{scheduler::ReportScheduler, storage::usage_store::UsageStore};

/// Drives [ReportScheduler] from a fixed-rate timer until shutdown.
pub struct TickModule<S> {
    scheduler: Arc<ReportScheduler<S>>,
    shutdown: CancellationToken,
    time_provider: Arc<dyn Clock>,
}

impl<S: UsageStore> TickModule<S> {
    pub fn new(
        scheduler: Arc<ReportScheduler<S>>,
        shutdown: CancellationToken,
        time_provider: Arc<dyn Clock>,
    ) -> Self {
        Self {
            scheduler,
            shutdown,
            time_provider,
        }
    }

    /// Runs the startup sequence and then the tick loop.
    pub async fn run(self) -> Result<()> {
        if let Err(e) = self
            .scheduler
            .startup()
            .instrument(info_span!("Startup reconciliation"))
            .await
        {
            error!("Startup sequence failed {e:?}");
        }

        let tick_interval = self.scheduler.config().tick_interval;
        let mut tick_point = self.time_provider.instant();
        loop {
            tick_point += tick_interval;

            tokio::select! {
                // Cancellation only interrupts waiting, a tick in progress is never cut short.
                _ = self.shutdown.cancelled() => {
                    info!("Stopping scheduler");
                    return Ok(())
                }
                _ = self.time_provider.sleep_until(tick_point) => ()
            }

            debug!("Tick");
            if let Err(e) = self.scheduler.on_tick().await {
                error!("Scheduler tick failed {e:?}");
            }
        }
    }
}
