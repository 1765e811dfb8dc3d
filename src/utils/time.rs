use std::{fmt::Display, str::FromStr};

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

const DAY_KEY_FORMAT: &str = "%Y-%m-%d";

/// Local calendar day used to partition usage and report delivery. Serializes as `YYYY-MM-DD`,
/// which also makes the lexical order of keys match the chronological one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayKey(NaiveDate);

impl DayKey {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    pub fn previous(&self) -> Option<DayKey> {
        self.0.pred_opt().map(DayKey)
    }

    pub fn days_before(&self, days: u64) -> Option<DayKey> {
        self.0.checked_sub_days(Days::new(days)).map(DayKey)
    }
}

impl From<NaiveDate> for DayKey {
    fn from(value: NaiveDate) -> Self {
        Self(value)
    }
}

impl Display for DayKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format(DAY_KEY_FORMAT))
    }
}

impl FromStr for DayKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(NaiveDate::parse_from_str(s, DAY_KEY_FORMAT)?))
    }
}

/// Formats a duration in milliseconds as `Hh Mm`. Hours are dropped when there are none, seconds
/// are always truncated.
pub fn format_time(milliseconds: u64) -> String {
    let total_seconds = milliseconds / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;

    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}
