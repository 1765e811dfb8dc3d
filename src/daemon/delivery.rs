use std::{sync::Arc, time::Duration};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::utils::{clock::Clock, time::DayKey};

use super::storage::{entities::DayRecord, usage_store::UsageStore};

/// Delivery lifecycle of one day's report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    NoData,
    Pending,
    InProgress,
    Sent,
    Exhausted,
}

/// Decides whether a send may start. Manual requests ignore the attempt limit, but never the
/// in-progress latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Automatic,
    Manual,
}

#[derive(Debug, Clone, Copy)]
pub struct DeliveryPolicy {
    pub max_attempts: u32,
    /// After this an in-progress latch is considered abandoned by a dead process.
    pub stuck_timeout: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            stuck_timeout: Duration::from_secs(60),
        }
    }
}

impl DeliveryPolicy {
    fn is_stale(&self, record: &DayRecord, now: DateTime<Utc>) -> bool {
        match record.last_attempt_time {
            None => true,
            Some(last) => (now - last).to_std().map_or(false, |v| v > self.stuck_timeout),
        }
    }

    /// State of a record, treating a stale latch as already cleared.
    pub fn state_of(&self, record: Option<&DayRecord>, now: DateTime<Utc>) -> DeliveryState {
        let Some(record) = record else {
            return DeliveryState::NoData;
        };
        if record.email_sent {
            DeliveryState::Sent
        } else if record.email_send_in_progress && !self.is_stale(record, now) {
            DeliveryState::InProgress
        } else if record.email_attempts >= self.max_attempts {
            DeliveryState::Exhausted
        } else {
            DeliveryState::Pending
        }
    }

    fn may_start(&self, state: DeliveryState, trigger: Trigger) -> bool {
        match (state, trigger) {
            (DeliveryState::Pending, _) => true,
            (DeliveryState::Exhausted, Trigger::Manual) => true,
            _ => false,
        }
    }
}

/// Drives the state machine of each day's report, persisting every transition through the
/// store before anything else happens.
pub struct DeliveryTracker<S> {
    store: S,
    clock: Arc<dyn Clock>,
    policy: DeliveryPolicy,
}

impl<S: UsageStore> DeliveryTracker<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>, policy: DeliveryPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &DeliveryPolicy {
        &self.policy
    }

    pub async fn state(&self, day: DayKey) -> Result<DeliveryState> {
        let record = self.store.get_day(day).await?;
        Ok(self.policy.state_of(record.as_ref(), self.clock.time()))
    }

    /// Days strictly before `before` whose report may be sent by `trigger`, oldest first.
    pub async fn sendable_days(&self, before: DayKey, trigger: Trigger) -> Result<Vec<DayKey>> {
        let now = self.clock.time();
        let days = self.store.all_days().await?;
        Ok(days
            .iter()
            .filter(|(day, _)| **day < before)
            .filter(|(_, record)| {
                self.policy
                    .may_start(self.policy.state_of(Some(*record), now), trigger)
            })
            .map(|(day, _)| *day)
            .collect())
    }

    /// `Pending -> InProgress`. The latch is persisted before the caller talks to the network,
    /// so a crash mid-send leaves a marker that reconciliation can clear. Returns the record
    /// to report on, or `None` when the day may not be sent right now.
    pub async fn begin(&self, day: DayKey, trigger: Trigger) -> Result<Option<DayRecord>> {
        let now = self.clock.time();
        let policy = self.policy;
        let claimed = self
            .store
            .update(|state| {
                let record = state.days_mut().get_mut(&day)?;
                let current = policy.state_of(Some(&*record), now);
                if !policy.may_start(current, trigger) {
                    debug!("Not starting delivery of {day}, state is {current:?}");
                    return None;
                }
                if record.email_send_in_progress {
                    warn!("Taking over abandoned delivery of {day}");
                }
                record.email_send_in_progress = true;
                record.last_attempt_time = Some(now);
                Some(record.clone())
            })
            .await?;

        if claimed.is_some() {
            info!("Started delivery of {day} ({trigger:?})");
        }
        Ok(claimed)
    }

    /// `InProgress -> Sent | Pending | Exhausted` depending on the transport outcome.
    pub async fn complete(&self, day: DayKey, outcome: &Result<()>) -> Result<DeliveryState> {
        let states = self.complete_all(&[day], outcome).await?;
        Ok(states.first().map_or(DeliveryState::NoData, |(_, state)| *state))
    }

    /// Applies one shared transport outcome to every day in a single store write, so that a
    /// batch is recorded for all of its days or for none of them.
    pub async fn complete_all(
        &self,
        days: &[DayKey],
        outcome: &Result<()>,
    ) -> Result<Vec<(DayKey, DeliveryState)>> {
        let now = self.clock.time();
        let policy = self.policy;
        let succeeded = outcome.is_ok();
        let states = self
            .store
            .update(|state| {
                let records = state.days_mut();
                days.iter()
                    .map(|day| {
                        let Some(record) = records.get_mut(day) else {
                            return (*day, DeliveryState::NoData);
                        };
                        record.email_send_in_progress = false;
                        record.last_attempt_time = Some(now);
                        if succeeded {
                            record.email_sent = true;
                            record.email_sent_time = Some(now);
                        } else if !record.email_sent {
                            record.email_attempts += 1;
                        }
                        (*day, policy.state_of(Some(&*record), now))
                    })
                    .collect::<Vec<_>>()
            })
            .await?;

        for (day, state) in &states {
            match (outcome, state) {
                (Ok(()), _) => info!("Report for {day} was sent"),
                (Err(e), DeliveryState::Exhausted) => {
                    error!("Giving up on report for {day} after {} attempts: {e:?}", policy.max_attempts)
                }
                (Err(e), _) => warn!("Report for {day} failed, will retry: {e:?}"),
            }
        }
        Ok(states)
    }

    /// Clears in-progress latches left behind by a process that died mid-send. Delivery
    /// counters are left untouched. Returns the cleared days.
    pub async fn reconcile_stuck(&self) -> Result<Vec<DayKey>> {
        let now = self.clock.time();
        let policy = self.policy;
        let cleared = self
            .store
            .update(|state| {
                state
                    .days_mut()
                    .iter_mut()
                    .filter(|(_, record)| {
                        record.email_send_in_progress && policy.is_stale(record, now)
                    })
                    .map(|(day, record)| {
                        record.email_send_in_progress = false;
                        *day
                    })
                    .collect::<Vec<_>>()
            })
            .await?;

        for day in &cleared {
            info!("Cleared stuck delivery of {day}");
        }
        Ok(cleared)
    }
}
