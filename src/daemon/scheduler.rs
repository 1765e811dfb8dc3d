use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    email::EmailSender,
    report::{compose_batch_report, compose_day_report, compose_test_report},
    utils::{clock::Clock, time::DayKey},
};

use super::{
    delivery::{DeliveryPolicy, DeliveryState, DeliveryTracker, Trigger},
    storage::{
        entities::{DayRecord, DestinationConfig},
        usage_store::UsageStore,
    },
};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub delivery: DeliveryPolicy,
    /// More pending days than this are sent as one combined report.
    pub batch_threshold: usize,
    pub retention_days: u64,
    /// Delay between individual sends, the email service rate limits callers.
    pub pacing_delay: Duration,
    /// Wait after noticing a new day before looking at the previous one.
    pub day_boundary_settle: Duration,
    /// How often failed reports are retried while the process stays alive.
    pub sweep_interval: Duration,
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            delivery: DeliveryPolicy::default(),
            batch_threshold: 3,
            retention_days: 30,
            pacing_delay: Duration::from_secs(1),
            day_boundary_settle: Duration::from_secs(2),
            sweep_interval: Duration::from_secs(60 * 60),
            tick_interval: Duration::from_secs(60),
        }
    }
}

/// What a pending sweep did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepSummary {
    pub sent: Vec<DayKey>,
    pub failed: Vec<DayKey>,
    pub not_configured: bool,
}

/// Response of the manually triggered operations. Errors never cross this boundary as faults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualSendResult {
    pub success: bool,
    pub error: Option<String>,
}

impl ManualSendResult {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

enum DayOutcome {
    Sent,
    Failed,
    Skipped,
}

/// Decides when reports are due and hands them to delivery. All entry points are meant to be
/// called by an outside timer, they can safely run redundantly or concurrently.
pub struct ReportScheduler<S> {
    store: S,
    tracker: DeliveryTracker<S>,
    sender: Arc<dyn EmailSender>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    // Process local, only used to notice the day changing while alive.
    last_observed_day: Mutex<Option<DayKey>>,
    last_sweep: Mutex<Option<DateTime<Utc>>>,
}

impl<S: UsageStore + Clone> ReportScheduler<S> {
    pub fn new(
        store: S,
        sender: Arc<dyn EmailSender>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        let tracker = DeliveryTracker::new(store.clone(), clock.clone(), config.delivery);
        Self {
            store,
            tracker,
            sender,
            clock,
            config,
            last_observed_day: Mutex::new(None),
            last_sweep: Mutex::new(None),
        }
    }
}

impl<S: UsageStore> ReportScheduler<S> {
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Records time spent on a site today.
    pub async fn add_time(&self, site: &str, elapsed_ms: u64) -> Result<()> {
        let today = self.clock.today();
        debug!("Adding {elapsed_ms}ms of {site} to {today}");
        self.store.add_time(today, site, elapsed_ms).await
    }

    /// Runs on every process start. Stuck latches are cleared before the sweep so that it
    /// doesn't skip days falsely marked as in progress.
    pub async fn startup(&self) -> Result<()> {
        let today = self.clock.today();

        if self.store.migrate_legacy(today).await? {
            info!("Upgraded legacy usage data");
        }
        if self.store.ensure_day(today, true).await? {
            info!("Tracking started partway through {today}");
        }
        self.observe_day(today).await?;

        match self.tracker.reconcile_stuck().await {
            Ok(cleared) if !cleared.is_empty() => {
                info!("Recovered {} interrupted deliveries", cleared.len())
            }
            Ok(_) => {}
            Err(e) => error!("Failed to reconcile stuck deliveries {e:?}"),
        }

        if let Err(e) = self.check_and_send_pending_reports().await {
            error!("Pending sweep failed during startup {e:?}");
        }

        if let Err(e) = self.cleanup_old_data().await {
            error!("Cleanup failed during startup {e:?}");
        }
        Ok(())
    }

    /// Stores the observed day, returning the previously observed one.
    async fn observe_day(&self, today: DayKey) -> Result<Option<DayKey>> {
        let previous = self
            .last_observed_day
            .lock()
            .expect("Observed day lock poisoned")
            .replace(today);
        if previous != Some(today) {
            self.store.set_current_date(today).await?;
        }
        Ok(previous)
    }

    /// Periodic entry point.
    pub async fn on_tick(&self) -> Result<()> {
        let today = self.clock.today();

        // A clock moving backwards changes the day too, but the observed day hasn't ended.
        match self.observe_day(today).await? {
            Some(previous) if previous < today => self.on_day_boundary(previous).await?,
            Some(previous) if previous > today => {
                warn!("Clock moved back from {previous} to {today}")
            }
            _ => {}
        }

        if self.sweep_due() {
            self.check_and_send_pending_reports().await?;
        }

        if self.store.last_cleanup_date().await? != Some(today) {
            self.cleanup_old_data().await?;
        }
        Ok(())
    }

    fn sweep_due(&self) -> bool {
        let last = *self.last_sweep.lock().expect("Sweep lock poisoned");
        match last {
            None => true,
            Some(last) => (self.clock.time() - last)
                .to_std()
                .map_or(true, |v| v >= self.config.sweep_interval),
        }
    }

    /// Sends the report for the day that just ended, if it is still pending.
    pub async fn on_day_boundary(&self, previous: DayKey) -> Result<()> {
        if previous >= self.clock.today() {
            warn!("Ignoring day boundary for {previous}, it hasn't ended yet");
            return Ok(());
        }
        info!("Day changed, {previous} is over");
        self.clock.sleep(self.config.day_boundary_settle).await;

        if self.tracker.state(previous).await? != DeliveryState::Pending {
            debug!("Nothing to send for {previous}");
            return Ok(());
        }

        let Some(config) = self.configured_destination().await? else {
            return Ok(());
        };
        self.deliver_day(previous, Trigger::Automatic, &config)
            .await?;
        Ok(())
    }

    /// Automatic sweep over all past days that still need a report.
    pub async fn check_and_send_pending_reports(&self) -> Result<SweepSummary> {
        self.sweep(Trigger::Automatic).await
    }

    /// Manual request from a user interface. Exhausted days are retried too.
    pub async fn send_pending_reports_now(&self) -> ManualSendResult {
        match self.sweep(Trigger::Manual).await {
            Ok(summary) if summary.not_configured => {
                ManualSendResult::failed("Email not configured")
            }
            Ok(summary) if !summary.failed.is_empty() => {
                let days = summary
                    .failed
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                ManualSendResult::failed(format!("Failed to send reports for {days}"))
            }
            Ok(summary) => {
                info!("Manual send finished, {} reports sent", summary.sent.len());
                ManualSendResult::ok()
            }
            Err(e) => {
                error!("Manual send failed {e:?}");
                ManualSendResult::failed(e.to_string())
            }
        }
    }

    /// Sends today's report marked as a test. Delivery state is not touched.
    pub async fn send_test_report(&self) -> ManualSendResult {
        let result = async {
            let Some(config) = self.configured_destination().await? else {
                return Ok(ManualSendResult::failed("Email not configured"));
            };
            let today = self.clock.today();
            let record = match self.store.get_day(today).await? {
                Some(record) => record,
                None => DayRecord::new(self.store.tracked_sites(), false),
            };
            let report = compose_test_report(today, &record, &config);
            self.sender.send(&config, &report).await?;
            Ok::<_, anyhow::Error>(ManualSendResult::ok())
        }
        .await;

        result.unwrap_or_else(|e| {
            warn!("Test email failed {e:?}");
            ManualSendResult::failed(e.to_string())
        })
    }

    /// Deletes sent records older than the retention window. Unsent ones are kept so that no
    /// usage silently disappears.
    pub async fn cleanup_old_data(&self) -> Result<Vec<DayKey>> {
        let today = self.clock.today();
        let Some(cutoff) = today.days_before(self.config.retention_days) else {
            return Ok(vec![]);
        };

        let removed = self
            .store
            .update(|state| {
                let expired = state
                    .days()
                    .iter()
                    .filter(|(day, record)| **day < cutoff && record.email_sent)
                    .map(|(day, _)| *day)
                    .collect::<Vec<_>>();
                let days = state.days_mut();
                for day in &expired {
                    days.remove(day);
                }
                state.last_cleanup_date = Some(today);
                expired
            })
            .await?;

        if !removed.is_empty() {
            info!("Removed {} days older than {cutoff}", removed.len());
        }
        Ok(removed)
    }

    async fn configured_destination(&self) -> Result<Option<DestinationConfig>> {
        let config = self.store.email_config().await?.unwrap_or_default();
        if config.is_complete() {
            Ok(Some(config))
        } else {
            info!("Email not configured, missing {:?}", config.missing_fields());
            Ok(None)
        }
    }

    async fn sweep(&self, trigger: Trigger) -> Result<SweepSummary> {
        *self.last_sweep.lock().expect("Sweep lock poisoned") = Some(self.clock.time());

        let mut summary = SweepSummary::default();
        let Some(config) = self.configured_destination().await? else {
            summary.not_configured = true;
            return Ok(summary);
        };

        let today = self.clock.today();
        let days = self.tracker.sendable_days(today, trigger).await?;
        if days.is_empty() {
            debug!("No pending reports");
            return Ok(summary);
        }

        if days.len() > self.config.batch_threshold {
            info!("Sending {} pending days as one report", days.len());
            return self.deliver_batch(days, trigger, &config).await;
        }

        for (index, day) in days.into_iter().enumerate() {
            if index > 0 {
                self.clock.sleep(self.config.pacing_delay).await;
            }
            match self.deliver_day(day, trigger, &config).await {
                Ok(DayOutcome::Sent) => summary.sent.push(day),
                Ok(DayOutcome::Failed) => summary.failed.push(day),
                Ok(DayOutcome::Skipped) => {}
                Err(e) => {
                    error!("Delivery of {day} failed {e:?}");
                    summary.failed.push(day);
                }
            }
        }
        Ok(summary)
    }

    async fn deliver_day(
        &self,
        day: DayKey,
        trigger: Trigger,
        config: &DestinationConfig,
    ) -> Result<DayOutcome> {
        let Some(record) = self.tracker.begin(day, trigger).await? else {
            return Ok(DayOutcome::Skipped);
        };

        let report = compose_day_report(day, &record, config);
        let outcome = self
            .sender
            .send(config, &report)
            .instrument(info_span!("Sending report", %day))
            .await;

        match self.tracker.complete(day, &outcome).await? {
            DeliveryState::Sent => Ok(DayOutcome::Sent),
            _ => Ok(DayOutcome::Failed),
        }
    }

    /// All claimed days share one send and therefore one outcome.
    async fn deliver_batch(
        &self,
        days: Vec<DayKey>,
        trigger: Trigger,
        config: &DestinationConfig,
    ) -> Result<SweepSummary> {
        let mut claimed = vec![];
        for day in days {
            if let Some(record) = self.tracker.begin(day, trigger).await? {
                claimed.push((day, record));
            }
        }

        let mut summary = SweepSummary::default();
        if claimed.is_empty() {
            return Ok(summary);
        }

        let report = compose_batch_report(&claimed, config);
        let outcome = self
            .sender
            .send(config, &report)
            .instrument(info_span!("Sending batch report", days = claimed.len()))
            .await;

        let days = claimed.iter().map(|(day, _)| *day).collect::<Vec<_>>();
        for (day, state) in self.tracker.complete_all(&days, &outcome).await? {
            match state {
                DeliveryState::Sent => summary.sent.push(day),
                _ => summary.failed.push(day),
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use tempfile::{tempdir, TempDir};

    use crate::{
        daemon::storage::usage_store::JsonUsageStore,
        email::MockEmailSender,
        report::Report,
        utils::{clock::test_clock::ManualClock, logging::TEST_LOGGING},
    };

    use super::*;

    fn day(s: &str) -> DayKey {
        s.parse().unwrap()
    }

    fn destination() -> DestinationConfig {
        DestinationConfig {
            recipients: vec!["a@example.com".into(), "b@example.com".into()],
            service_id: Some("service".into()),
            template_id: Some("template".into()),
            public_key: Some("key".into()),
            report_owner: None,
        }
    }

    /// Keeps every report it is given. Optionally fails and optionally takes its time.
    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<Report>>,
        fail: AtomicBool,
        delay: Duration,
    }

    impl RecordingSender {
        fn reports(&self) -> Vec<Report> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EmailSender for RecordingSender {
        async fn send(&self, _destination: &DestinationConfig, report: &Report) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            self.sent.lock().unwrap().push(report.clone());
            if self.fail.load(Ordering::SeqCst) {
                Err(anyhow!("service unavailable"))
            } else {
                Ok(())
            }
        }
    }

    struct Harness {
        _dir: TempDir,
        store: Arc<JsonUsageStore>,
        clock: ManualClock,
        scheduler: ReportScheduler<Arc<JsonUsageStore>>,
    }

    /// Today is 2024-01-10 at noon.
    async fn harness(sender: Arc<dyn EmailSender>, configured: bool) -> Result<Harness> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let store = Arc::new(JsonUsageStore::new(
            dir.path().join("state.json"),
            vec!["instagram".into(), "youtube".into()],
        )?);
        if configured {
            store.set_email_config(destination()).await?;
        }
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap());
        let scheduler = ReportScheduler::new(
            store.clone(),
            sender,
            Arc::new(clock.clone()),
            SchedulerConfig::default(),
        );
        Ok(Harness {
            _dir: dir,
            store,
            clock,
            scheduler,
        })
    }

    #[tokio::test]
    async fn test_batch_threshold_sends_one_report() -> Result<()> {
        let mut sender = MockEmailSender::new();
        sender
            .expect_send()
            .withf(|destination, report| {
                destination.to_field() == "a@example.com, b@example.com"
                    && report.subject.contains("4 days")
                    && report.body.contains("Usage for 2024-01-06")
                    && report.body.contains("Usage for 2024-01-09")
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let h = harness(Arc::new(sender), true).await?;
        for key in ["2024-01-06", "2024-01-07", "2024-01-08", "2024-01-09"] {
            h.store.add_time(day(key), "instagram", 60_000).await?;
        }

        let summary = h.scheduler.check_and_send_pending_reports().await?;

        assert_eq!(summary.sent.len(), 4);
        assert!(summary.failed.is_empty());
        for (key, record) in h.store.all_days().await? {
            assert!(record.email_sent, "{key} should be sent");
        }
        assert!(h.clock.sleeps().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_batch_counts_against_every_day() -> Result<()> {
        let sender = Arc::new(RecordingSender::default());
        sender.fail.store(true, Ordering::SeqCst);
        let h = harness(sender.clone(), true).await?;
        for key in ["2024-01-05", "2024-01-06", "2024-01-07", "2024-01-08"] {
            h.store.add_time(day(key), "instagram", 1).await?;
        }

        let summary = h.scheduler.check_and_send_pending_reports().await?;

        assert_eq!(sender.reports().len(), 1);
        assert_eq!(summary.failed.len(), 4);
        for (_, record) in h.store.all_days().await? {
            assert_eq!(record.email_attempts, 1);
            assert!(!record.email_send_in_progress);
            assert!(!record.email_sent);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_few_days_are_sent_individually_with_pacing() -> Result<()> {
        let sender = Arc::new(RecordingSender::default());
        let h = harness(sender.clone(), true).await?;
        h.store.add_time(day("2024-01-08"), "instagram", 3_600_000).await?;
        h.store.add_time(day("2024-01-09"), "youtube", 1_800_000).await?;
        h.store.add_time(day("2024-01-10"), "youtube", 1).await?;

        let summary = h.scheduler.check_and_send_pending_reports().await?;

        assert_eq!(summary.sent, vec![day("2024-01-08"), day("2024-01-09")]);
        let reports = sender.reports();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].subject, "Daily Usage Report - 2024-01-08");
        assert!(reports[0].body.contains("instagram: 1h 0m"));
        assert_eq!(reports[1].subject, "Daily Usage Report - 2024-01-09");
        assert_eq!(h.clock.sleeps(), vec![Duration::from_secs(1)]);

        let today = h.store.get_day(day("2024-01-10")).await?.unwrap();
        assert!(!today.email_sent);
        Ok(())
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() -> Result<()> {
        let sender = Arc::new(RecordingSender::default());
        let h = harness(sender.clone(), true).await?;
        h.store.add_time(day("2024-01-09"), "instagram", 1).await?;

        h.scheduler.check_and_send_pending_reports().await?;
        let second = h.scheduler.check_and_send_pending_reports().await?;

        assert_eq!(second, SweepSummary::default());
        assert_eq!(sender.reports().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_retries_stop_after_max_attempts() -> Result<()> {
        let sender = Arc::new(RecordingSender::default());
        sender.fail.store(true, Ordering::SeqCst);
        let h = harness(sender.clone(), true).await?;
        h.store.add_time(day("2024-01-09"), "instagram", 1).await?;

        for _ in 0..5 {
            h.scheduler.check_and_send_pending_reports().await?;
        }

        assert_eq!(sender.reports().len(), 3);
        let record = h.store.get_day(day("2024-01-09")).await?.unwrap();
        assert_eq!(record.email_attempts, 3);

        // Manual trigger ignores the limit.
        sender.fail.store(false, Ordering::SeqCst);
        let result = h.scheduler.send_pending_reports_now().await;
        assert_eq!(result, ManualSendResult::ok());
        assert!(h.store.get_day(day("2024-01-09")).await?.unwrap().email_sent);
        Ok(())
    }

    #[tokio::test]
    async fn test_timer_and_manual_trigger_send_once() -> Result<()> {
        let sender = Arc::new(RecordingSender {
            delay: Duration::from_millis(20),
            ..Default::default()
        });
        let h = harness(sender.clone(), true).await?;
        h.store.add_time(day("2024-01-09"), "instagram", 1).await?;

        let (automatic, manual, boundary) = tokio::join!(
            h.scheduler.check_and_send_pending_reports(),
            h.scheduler.send_pending_reports_now(),
            h.scheduler.on_day_boundary(day("2024-01-09")),
        );
        automatic?;
        boundary?;
        assert!(manual.success);

        assert_eq!(sender.reports().len(), 1);
        let record = h.store.get_day(day("2024-01-09")).await?.unwrap();
        assert!(record.email_sent);
        assert!(!record.email_send_in_progress);
        Ok(())
    }

    #[tokio::test]
    async fn test_not_configured_skips_sending() -> Result<()> {
        let mut sender = MockEmailSender::new();
        sender.expect_send().never();
        let h = harness(Arc::new(sender), false).await?;
        h.store.add_time(day("2024-01-09"), "instagram", 1).await?;

        let summary = h.scheduler.check_and_send_pending_reports().await?;
        assert!(summary.not_configured);

        let record = h.store.get_day(day("2024-01-09")).await?.unwrap();
        assert_eq!(record.email_attempts, 0);
        assert!(!record.email_send_in_progress);

        let result = h.scheduler.send_pending_reports_now().await;
        assert_eq!(result, ManualSendResult::failed("Email not configured"));
        Ok(())
    }

    #[tokio::test]
    async fn test_manual_send_reports_failures() -> Result<()> {
        let sender = Arc::new(RecordingSender::default());
        sender.fail.store(true, Ordering::SeqCst);
        let h = harness(sender, true).await?;
        h.store.add_time(day("2024-01-09"), "instagram", 1).await?;

        let result = h.scheduler.send_pending_reports_now().await;

        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("Failed to send reports for 2024-01-09")
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_startup_sequence() -> Result<()> {
        let sender = Arc::new(RecordingSender::default());
        let h = harness(sender.clone(), true).await?;

        // Interrupted mid-send two minutes ago.
        let mut stuck = DayRecord::new(&["instagram"], false);
        stuck.email_send_in_progress = true;
        stuck.email_attempts = 1;
        stuck.last_attempt_time = Some(h.clock.time() - ChronoDuration::minutes(2));
        h.store.set_day(day("2024-01-09"), stuck).await?;

        let mut old_sent = DayRecord::new(&["instagram"], false);
        old_sent.email_sent = true;
        h.store.set_day(day("2023-12-01"), old_sent).await?;

        let mut old_unsent = DayRecord::new(&["instagram"], false);
        old_unsent.email_attempts = 3;
        h.store.set_day(day("2023-12-02"), old_unsent).await?;

        h.scheduler.startup().await?;

        let reports = sender.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].subject, "Daily Usage Report - 2024-01-09");

        let days = h.store.all_days().await?;
        assert!(days[&day("2024-01-09")].email_sent);
        assert!(!days.contains_key(&day("2023-12-01")));
        assert!(days.contains_key(&day("2023-12-02")));
        assert!(days[&day("2024-01-10")].is_partial_day);

        let state = h.store.read().await?;
        assert_eq!(state.current_date, Some(day("2024-01-10")));
        assert_eq!(state.last_cleanup_date, Some(day("2024-01-10")));
        Ok(())
    }

    #[tokio::test]
    async fn test_retention_boundary() -> Result<()> {
        let h = harness(Arc::new(RecordingSender::default()), true).await?;
        let mut sent = DayRecord::new(&["instagram"], false);
        sent.email_sent = true;
        // 31 and 30 days before 2024-01-10.
        h.store.set_day(day("2023-12-10"), sent.clone()).await?;
        h.store.set_day(day("2023-12-11"), sent).await?;
        h.store
            .set_day(day("2023-11-01"), DayRecord::new(&["instagram"], false))
            .await?;

        let removed = h.scheduler.cleanup_old_data().await?;

        assert_eq!(removed, vec![day("2023-12-10")]);
        let days = h.store.all_days().await?;
        assert!(days.contains_key(&day("2023-12-11")));
        assert!(days.contains_key(&day("2023-11-01")));
        Ok(())
    }

    #[tokio::test]
    async fn test_tick_detects_day_boundary() -> Result<()> {
        let sender = Arc::new(RecordingSender::default());
        let h = harness(sender.clone(), true).await?;

        h.scheduler.on_tick().await?;
        h.scheduler.add_time("instagram", 600_000).await?;
        h.scheduler.on_tick().await?;
        assert!(sender.reports().is_empty());

        h.clock.set(Utc.with_ymd_and_hms(2024, 1, 11, 0, 0, 30).unwrap());
        h.scheduler.on_tick().await?;

        let reports = sender.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].subject, "Daily Usage Report - 2024-01-10");
        assert!(reports[0].body.contains("instagram: 10m"));
        assert_eq!(h.clock.sleeps(), vec![Duration::from_secs(2)]);

        let state = h.store.read().await?;
        assert_eq!(state.current_date, Some(day("2024-01-11")));
        Ok(())
    }

    #[tokio::test]
    async fn test_clock_moving_back_is_not_a_day_boundary() -> Result<()> {
        let sender = Arc::new(RecordingSender::default());
        let h = harness(sender.clone(), true).await?;
        h.clock.set(Utc.with_ymd_and_hms(2024, 1, 11, 0, 5, 0).unwrap());
        h.store.add_time(day("2024-01-10"), "instagram", 1).await?;
        h.scheduler.on_tick().await?;
        let swept = sender.reports().len();

        h.scheduler.add_time("instagram", 60_000).await?;
        h.clock.set(Utc.with_ymd_and_hms(2024, 1, 10, 23, 50, 0).unwrap());
        h.scheduler.on_tick().await?;

        assert_eq!(sender.reports().len(), swept);
        let unfinished = h.store.get_day(day("2024-01-11")).await?.unwrap();
        assert!(!unfinished.email_sent);
        assert!(!unfinished.email_send_in_progress);

        // Explicit calls for a day that hasn't ended are refused too.
        h.scheduler.on_day_boundary(day("2024-01-11")).await?;
        assert_eq!(sender.reports().len(), swept);
        assert!(h.clock.sleeps().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_tick_retries_after_sweep_interval() -> Result<()> {
        let sender = Arc::new(RecordingSender::default());
        sender.fail.store(true, Ordering::SeqCst);
        let h = harness(sender.clone(), true).await?;
        h.store.add_time(day("2024-01-09"), "instagram", 1).await?;

        h.scheduler.on_tick().await?;
        h.clock.advance(ChronoDuration::minutes(1));
        h.scheduler.on_tick().await?;
        assert_eq!(sender.reports().len(), 1);

        sender.fail.store(false, Ordering::SeqCst);
        h.clock.advance(ChronoDuration::hours(1));
        h.scheduler.on_tick().await?;

        assert_eq!(sender.reports().len(), 2);
        assert!(h.store.get_day(day("2024-01-09")).await?.unwrap().email_sent);
        Ok(())
    }

    #[tokio::test]
    async fn test_test_report_leaves_state_alone() -> Result<()> {
        let sender = Arc::new(RecordingSender::default());
        let h = harness(sender.clone(), true).await?;
        h.scheduler.add_time("youtube", 120_000).await?;

        let result = h.scheduler.send_test_report().await;

        assert_eq!(result, ManualSendResult::ok());
        let reports = sender.reports();
        assert_eq!(reports[0].subject, "Usage Report (TEST)");
        assert!(reports[0].body.contains("youtube: 2m"));
        let record = h.store.get_day(day("2024-01-10")).await?.unwrap();
        assert!(!record.email_sent);
        assert_eq!(record.last_attempt_time, None);

        sender.fail.store(true, Ordering::SeqCst);
        let result = h.scheduler.send_test_report().await;
        assert_eq!(result.error.as_deref(), Some("service unavailable"));
        Ok(())
    }
}
