use tracing::info;

use crate::utils::time::DayKey;

use super::entities::{DayRecord, StoreState};

/// Moves the aggregate `dailyTime` map of the first tracker version into a record for `today`.
/// The aggregate is only converted when no per-day data exists yet, otherwise it is stale and
/// just dropped. Running it again is a no-op.
pub fn migrate_legacy_state<S: AsRef<str>>(
    state: &mut StoreState,
    today: DayKey,
    tracked_sites: &[S],
) -> bool {
    let Some(daily_time) = state.daily_time.take() else {
        return false;
    };

    if state.tracking_data.is_some() {
        info!("Dropping legacy usage aggregate, per-day data already exists");
        return true;
    }

    let mut record = DayRecord::new(tracked_sites, false);
    for (site, ms) in daily_time {
        *record.site_durations.entry(site).or_insert(0) += ms;
    }
    info!("Migrated legacy usage aggregate into {today}");
    state.days_mut().insert(today, record);
    true
}
