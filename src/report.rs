//! Turns recorded usage into email text. Everything here is pure: the same records always
//! give the same report and records are never modified.

use std::fmt::Write;

use crate::{
    daemon::storage::entities::{DayRecord, DestinationConfig},
    utils::time::{format_time, DayKey},
};

const PARTIAL_DAY_NOTE: &str =
    "Note: tracking started partway through this day, so the numbers may be incomplete.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub subject: String,
    pub body: String,
}

fn subject_prefix(config: &DestinationConfig) -> String {
    match config.report_owner.as_deref().map(str::trim) {
        Some(owner) if !owner.is_empty() => format!("{owner} "),
        _ => String::new(),
    }
}

fn day_section(day: DayKey, record: &DayRecord) -> String {
    let mut section = format!("Usage for {day}\n");
    for (site, ms) in &record.site_durations {
        let _ = writeln!(section, "{site}: {}", format_time(*ms));
    }
    let _ = write!(section, "Total: {}", format_time(record.total_ms()));
    if record.is_partial_day {
        let _ = write!(section, "\n{PARTIAL_DAY_NOTE}");
    }
    section
}

/// Report for a single day.
pub fn compose_day_report(day: DayKey, record: &DayRecord, config: &DestinationConfig) -> Report {
    Report {
        subject: format!("{}Daily Usage Report - {day}", subject_prefix(config)),
        body: day_section(day, record),
    }
}

/// One report covering several days, ordered as given, followed by a grand total.
pub fn compose_batch_report(days: &[(DayKey, DayRecord)], config: &DestinationConfig) -> Report {
    let range = match (days.first(), days.last()) {
        (Some((first, _)), Some((last, _))) if first != last => format!("{first} to {last}"),
        (Some((first, _)), _) => first.to_string(),
        _ => String::new(),
    };

    let mut body = format!("Usage for {} days that were not reported yet.", days.len());
    for (day, record) in days {
        let _ = write!(body, "\n\n{}", day_section(*day, record));
    }
    let grand_total: u64 = days.iter().map(|(_, record)| record.total_ms()).sum();
    let _ = write!(body, "\n\nGrand total: {}", format_time(grand_total));

    Report {
        subject: format!(
            "{}Usage Report - {} days ({range})",
            subject_prefix(config),
            days.len()
        ),
        body,
    }
}

/// Report used to check that delivery is configured correctly.
pub fn compose_test_report(day: DayKey, record: &DayRecord, config: &DestinationConfig) -> Report {
    Report {
        subject: format!("{}Usage Report (TEST)", subject_prefix(config)),
        body: format!(
            "{}\n\nThis is a test email from your usage tracker.",
            day_section(day, record)
        ),
    }
}
