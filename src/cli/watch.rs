use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    select,
};
use tracing::{debug, warn};

use crate::{
    daemon::{scheduler::ReportScheduler, storage::usage_store::UsageStore},
    tracking::{SiteMatcher, TrackingSession, UsageIncrement},
    utils::clock::{Clock, DefaultClock},
};

const SAMPLE_INTERVAL: Duration = Duration::from_secs(30);

/// One line of the watch protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabEvent {
    Focus(Option<String>),
    Blur,
}

pub fn parse_event(line: &str) -> Result<TabEvent> {
    let line = line.trim();
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    match command {
        "focus" => {
            let url = rest.trim();
            Ok(TabEvent::Focus((!url.is_empty()).then(|| url.to_owned())))
        }
        "blur" => Ok(TabEvent::Blur),
        _ => Err(anyhow!("Unknown event {line:?}")),
    }
}

fn apply_event(
    session: &mut TrackingSession,
    matcher: &SiteMatcher,
    event: TabEvent,
    now: DateTime<Utc>,
) -> Option<UsageIncrement> {
    match event {
        TabEvent::Focus(url) => session.focus(matcher, url.as_deref(), now),
        TabEvent::Blur => session.blur(now),
    }
}

async fn record<S: UsageStore>(scheduler: &ReportScheduler<S>, increment: Option<UsageIncrement>) {
    let Some(UsageIncrement { site, elapsed_ms }) = increment else {
        return;
    };
    if elapsed_ms == 0 {
        return;
    }
    if let Err(e) = scheduler.add_time(&site, elapsed_ms).await {
        warn!("Failed to record {elapsed_ms}ms of {site} {e:?}");
    }
}

/// Feeds tab events from `input` into the scheduler until the input closes. The running interval
/// is flushed periodically so that long sessions are visible before the tab changes.
pub async fn watch_events<S: UsageStore>(
    scheduler: Arc<ReportScheduler<S>>,
    input: impl AsyncBufRead + Unpin,
    clock: Arc<dyn Clock>,
) -> Result<()> {
    let matcher = SiteMatcher::default();
    let mut session = TrackingSession::new();
    let mut lines = input.lines();
    let mut sampler = tokio::time::interval(SAMPLE_INTERVAL);
    sampler.tick().await;

    loop {
        select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_event(&line) {
                    Ok(event) => {
                        debug!("Received {event:?}");
                        let increment = apply_event(&mut session, &matcher, event, clock.time());
                        record(&scheduler, increment).await;
                    }
                    Err(e) => warn!("{e}"),
                }
            }
            _ = sampler.tick() => {
                record(&scheduler, session.sample(clock.time())).await;
            }
        }
    }

    record(&scheduler, session.blur(clock.time())).await;
    Ok(())
}

pub async fn watch_stdin<S: UsageStore>(scheduler: Arc<ReportScheduler<S>>) -> Result<()> {
    watch_events(
        scheduler,
        BufReader::new(tokio::io::stdin()),
        Arc::new(DefaultClock),
    )
    .await
}
