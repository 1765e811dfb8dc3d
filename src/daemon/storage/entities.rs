use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::time::DayKey;

/// Maximum amount of addresses a report is delivered to.
pub const MAX_RECIPIENTS: usize = 3;

/// Usage and email delivery state for one local calendar day.
///
/// Duration fields only grow while the day is current. Delivery fields are owned by
/// [DeliveryTracker](crate::daemon::delivery::DeliveryTracker).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayRecord {
    #[serde(default)]
    pub site_durations: BTreeMap<String, u64>,
    #[serde(default)]
    pub email_sent: bool,
    #[serde(default)]
    pub email_attempts: u32,
    #[serde(default)]
    pub email_send_in_progress: bool,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_attempt_time: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub email_sent_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_partial_day: bool,
}

impl DayRecord {
    /// Creates a pending record with a zero entry for each tracked site.
    pub fn new<S: AsRef<str>>(tracked_sites: &[S], is_partial_day: bool) -> Self {
        Self {
            site_durations: tracked_sites
                .iter()
                .map(|site| (site.as_ref().to_owned(), 0))
                .collect(),
            is_partial_day,
            ..Default::default()
        }
    }

    pub fn total_ms(&self) -> u64 {
        self.site_durations.values().sum()
    }
}

/// Where reports are delivered and which transport credentials are used for it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawDestinationConfig")]
pub struct DestinationConfig {
    pub recipients: Vec<String>,
    pub service_id: Option<String>,
    pub template_id: Option<String>,
    pub public_key: Option<String>,
    /// Name shown in report subjects, e.g. "Vincent".
    pub report_owner: Option<String>,
}

impl DestinationConfig {
    /// Non-empty recipients in their configured order, capped at [MAX_RECIPIENTS].
    pub fn active_recipients(&self) -> Vec<&str> {
        self.recipients
            .iter()
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .take(MAX_RECIPIENTS)
            .collect()
    }

    /// Value for the transport's `to` field.
    pub fn to_field(&self) -> String {
        self.active_recipients().join(", ")
    }

    /// Names the fields that still have to be filled before anything can be sent.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        fn blank(v: &Option<String>) -> bool {
            v.as_deref().map_or(true, |v| v.trim().is_empty())
        }

        let mut missing = vec![];
        if self.active_recipients().is_empty() {
            missing.push("recipient");
        }
        if blank(&self.service_id) {
            missing.push("service id");
        }
        if blank(&self.template_id) {
            missing.push("template id");
        }
        if blank(&self.public_key) {
            missing.push("public key");
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }
}

/// Accepts both the list form and the older `toEmail1..3` fields.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDestinationConfig {
    #[serde(default)]
    recipients: Vec<String>,
    to_email1: Option<String>,
    to_email2: Option<String>,
    to_email3: Option<String>,
    service_id: Option<String>,
    template_id: Option<String>,
    public_key: Option<String>,
    report_owner: Option<String>,
}

impl From<RawDestinationConfig> for DestinationConfig {
    fn from(raw: RawDestinationConfig) -> Self {
        let mut recipients = raw.recipients;
        recipients.extend([raw.to_email1, raw.to_email2, raw.to_email3].into_iter().flatten());
        Self {
            recipients,
            service_id: raw.service_id,
            template_id: raw.template_id,
            public_key: raw.public_key,
            report_owner: raw.report_owner,
        }
    }
}

/// The whole persisted document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_data: Option<BTreeMap<DayKey, DayRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_config: Option<DestinationConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_date: Option<DayKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cleanup_date: Option<DayKey>,
    /// Single aggregate written by the first version of the tracker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_time: Option<BTreeMap<String, u64>>,
}

impl StoreState {
    pub fn days(&self) -> &BTreeMap<DayKey, DayRecord> {
        static EMPTY: BTreeMap<DayKey, DayRecord> = BTreeMap::new();
        self.tracking_data.as_ref().unwrap_or(&EMPTY)
    }

    pub fn days_mut(&mut self) -> &mut BTreeMap<DayKey, DayRecord> {
        self.tracking_data.get_or_insert_with(BTreeMap::new)
    }
}
