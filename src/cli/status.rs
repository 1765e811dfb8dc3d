use std::{collections::BTreeMap, path::Path};

use ansi_term::Colour;
use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::{
    daemon::{
        delivery::{DeliveryPolicy, DeliveryState},
        storage::{
            entities::DayRecord,
            usage_store::{open_store, UsageStore},
        },
    },
    tracking::SiteMatcher,
    utils::{
        clock::{Clock, DefaultClock},
        time::{format_time, DayKey},
    },
};

const HISTORY_DAYS: u64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Badge {
    Tracking,
    Sent,
    Failed,
    Pending,
    Sending,
    NoData,
}

impl Badge {
    fn paint(&self) -> String {
        match self {
            Badge::Tracking => Colour::Blue.paint("tracking"),
            Badge::Sent => Colour::Green.paint("sent"),
            Badge::Failed => Colour::Red.paint("failed"),
            Badge::Pending => Colour::Yellow.paint("pending"),
            Badge::Sending => Colour::Yellow.paint("sending"),
            Badge::NoData => Colour::White.dimmed().paint("no data"),
        }
        .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRow {
    pub day: DayKey,
    pub total_ms: u64,
    pub badge: Badge,
}

/// Newest first, today included.
pub fn history_rows(
    days: &BTreeMap<DayKey, DayRecord>,
    today: DayKey,
    policy: &DeliveryPolicy,
    now: DateTime<Utc>,
) -> Vec<HistoryRow> {
    (0..HISTORY_DAYS)
        .filter_map(|offset| today.days_before(offset))
        .map(|day| {
            let record = days.get(&day);
            let total_ms = record.map_or(0, DayRecord::total_ms);
            let badge = if day == today {
                Badge::Tracking
            } else {
                match policy.state_of(record, now) {
                    DeliveryState::Sent => Badge::Sent,
                    DeliveryState::Exhausted => Badge::Failed,
                    DeliveryState::Pending => Badge::Pending,
                    DeliveryState::InProgress => Badge::Sending,
                    DeliveryState::NoData => Badge::NoData,
                }
            };
            HistoryRow {
                day,
                total_ms,
                badge,
            }
        })
        .collect()
}

/// Past days the next automatic sweep would send. Days without usage are reported as well.
pub fn pending_count(
    days: &BTreeMap<DayKey, DayRecord>,
    today: DayKey,
    policy: &DeliveryPolicy,
    now: DateTime<Utc>,
) -> usize {
    days.iter()
        .filter(|(day, record)| {
            **day < today && policy.state_of(Some(*record), now) == DeliveryState::Pending
        })
        .count()
}

pub async fn print_status(app_dir: &Path) -> Result<()> {
    let store = open_store(app_dir, SiteMatcher::default().site_names())?;
    let clock = DefaultClock;
    let days = store.all_days().await?;
    let today = clock.today();

    if let Some(record) = days.get(&today) {
        println!("Today");
        for (site, ms) in &record.site_durations {
            println!("  {site}: {}", format_time(*ms));
        }
        println!("  Total: {}", format_time(record.total_ms()));
    }

    let policy = DeliveryPolicy::default();
    let now = clock.time();
    println!("History");
    for row in history_rows(&days, today, &policy, now) {
        println!("  {}  {:>8}  {}", row.day, format_time(row.total_ms), row.badge.paint());
    }

    let pending = pending_count(&days, today, &policy, now);
    if pending > 0 {
        println!("{pending} report(s) pending");
    }

    match store.email_config().await? {
        Some(config) if config.is_complete() => println!("Reports go to {}", config.to_field()),
        _ => println!("{}", Colour::Red.paint("Email not configured")),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(v: &str) -> DayKey {
        v.parse().unwrap()
    }

    fn record(ms: u64) -> DayRecord {
        let mut record = DayRecord::new(&["instagram"], false);
        record.site_durations.insert("instagram".into(), ms);
        record
    }

    #[test]
    fn test_history_badges() {
        let today = day("2024-01-10");
        let mut days = BTreeMap::new();
        days.insert(today, record(1000));
        days.insert(day("2024-01-09"), DayRecord {
            email_sent: true,
            ..record(5000)
        });
        days.insert(day("2024-01-08"), DayRecord {
            email_attempts: 3,
            ..record(5000)
        });
        days.insert(day("2024-01-07"), record(5000));
        days.insert(day("2024-01-06"), record(0));
        // Outside of the window.
        days.insert(day("2024-01-01"), record(5000));

        let rows = history_rows(&days, today, &DeliveryPolicy::default(), Utc::now());

        assert_eq!(rows.len(), 7);
        assert_eq!(rows[0].day, today);
        let badges = rows.iter().map(|v| v.badge).collect::<Vec<_>>();
        assert_eq!(
            badges,
            vec![
                Badge::Tracking,
                Badge::Sent,
                Badge::Failed,
                Badge::Pending,
                Badge::Pending,
                Badge::NoData,
                Badge::NoData,
            ]
        );
        assert_eq!(rows[1].total_ms, 5000);
        assert_eq!(rows[6].day, day("2024-01-04"));
    }

    #[test]
    fn test_pending_count_matches_automatic_sweep() {
        let today = day("2024-01-10");
        let mut days = BTreeMap::new();
        days.insert(today, record(1000));
        days.insert(day("2024-01-09"), record(1000));
        days.insert(day("2024-01-08"), record(0));
        days.insert(day("2024-01-01"), record(1000));
        days.insert(day("2024-01-02"), DayRecord {
            email_sent: true,
            ..record(1000)
        });
        days.insert(day("2024-01-03"), DayRecord {
            email_attempts: 3,
            ..record(1000)
        });

        // Today, sent and exhausted days are left out. The empty day is still reported.
        assert_eq!(
            pending_count(&days, today, &DeliveryPolicy::default(), Utc::now()),
            3
        );
    }
}
