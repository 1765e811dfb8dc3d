use std::{
    collections::BTreeMap,
    future::Future,
    ops::Deref,
    path::PathBuf,
};

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    fs::operations::{read_json_or_default, sibling_path, write_json_atomic, FileLock},
    utils::time::DayKey,
};

use super::{
    entities::{DayRecord, DestinationConfig, StoreState},
    migration::migrate_legacy_state,
};

/// Interface for the persisted usage and delivery state.
///
/// Every mutation is durable once the returned future resolves, since the process can be
/// terminated between any two operations.
pub trait UsageStore: Send + Sync {
    /// Sites that get a zero entry in newly created records.
    fn tracked_sites(&self) -> &[String];

    fn read(&self) -> impl Future<Output = Result<StoreState>> + Send;

    /// Atomically applies `f` to the stored state and persists the result.
    fn update<R, F>(&self, f: F) -> impl Future<Output = Result<R>> + Send
    where
        F: FnOnce(&mut StoreState) -> R + Send,
        R: Send;

    /// Adds `delta_ms` to the site, creating the day if it doesn't exist yet.
    fn add_time(
        &self,
        day: DayKey,
        site: &str,
        delta_ms: u64,
    ) -> impl Future<Output = Result<()>> + Send {
        async move {
            let sites = self.tracked_sites();
            self.update(|state| {
                let record = state
                    .days_mut()
                    .entry(day)
                    .or_insert_with(|| DayRecord::new(sites, false));
                *record.site_durations.entry(site.to_owned()).or_insert(0) += delta_ms;
            })
            .await
        }
    }

    /// Creates an empty record for the day if none exists. Returns whether it was created.
    fn ensure_day(
        &self,
        day: DayKey,
        is_partial_day: bool,
    ) -> impl Future<Output = Result<bool>> + Send {
        async move {
            let sites = self.tracked_sites();
            self.update(|state| {
                let days = state.days_mut();
                if days.contains_key(&day) {
                    false
                } else {
                    days.insert(day, DayRecord::new(sites, is_partial_day));
                    true
                }
            })
            .await
        }
    }

    fn get_day(&self, day: DayKey) -> impl Future<Output = Result<Option<DayRecord>>> + Send {
        async move { Ok(self.read().await?.days().get(&day).cloned()) }
    }

    fn set_day(&self, day: DayKey, record: DayRecord) -> impl Future<Output = Result<()>> + Send {
        async move {
            self.update(|state| {
                state.days_mut().insert(day, record);
            })
            .await
        }
    }

    fn all_days(&self) -> impl Future<Output = Result<BTreeMap<DayKey, DayRecord>>> + Send {
        async move { Ok(self.read().await?.tracking_data.unwrap_or_default()) }
    }

    fn delete_day(&self, day: DayKey) -> impl Future<Output = Result<Option<DayRecord>>> + Send {
        async move { self.update(|state| state.days_mut().remove(&day)).await }
    }

    fn email_config(&self) -> impl Future<Output = Result<Option<DestinationConfig>>> + Send {
        async move { Ok(self.read().await?.email_config) }
    }

    fn set_email_config(
        &self,
        config: DestinationConfig,
    ) -> impl Future<Output = Result<()>> + Send {
        async move { self.update(|state| state.email_config = Some(config)).await }
    }

    fn set_current_date(&self, day: DayKey) -> impl Future<Output = Result<()>> + Send {
        async move { self.update(|state| state.current_date = Some(day)).await }
    }

    fn last_cleanup_date(&self) -> impl Future<Output = Result<Option<DayKey>>> + Send {
        async move { Ok(self.read().await?.last_cleanup_date) }
    }

    fn set_last_cleanup_date(&self, day: DayKey) -> impl Future<Output = Result<()>> + Send {
        async move { self.update(|state| state.last_cleanup_date = Some(day)).await }
    }

    /// Converts the single-aggregate format of the first tracker version. Returns whether
    /// anything changed.
    fn migrate_legacy(&self, today: DayKey) -> impl Future<Output = Result<bool>> + Send {
        async move {
            let sites = self.tracked_sites();
            self.update(|state| migrate_legacy_state(state, today, sites))
                .await
        }
    }
}

impl<T: Deref + Send + Sync> UsageStore for T
where
    T::Target: UsageStore,
{
    fn tracked_sites(&self) -> &[String] {
        self.deref().tracked_sites()
    }

    fn read(&self) -> impl Future<Output = Result<StoreState>> + Send {
        self.deref().read()
    }

    fn update<R, F>(&self, f: F) -> impl Future<Output = Result<R>> + Send
    where
        F: FnOnce(&mut StoreState) -> R + Send,
        R: Send,
    {
        self.deref().update(f)
    }
}

/// The main realization of [UsageStore]. Keeps the whole state in one json document.
pub struct JsonUsageStore {
    path: PathBuf,
    lock_path: PathBuf,
    tracked_sites: Vec<String>,
    // Serializes tasks of this process. The file lock is only meaningful between processes and
    // blocks the thread, so it must not be contended from within one runtime.
    guard: Mutex<()>,
}

impl JsonUsageStore {
    pub fn new(path: PathBuf, tracked_sites: Vec<String>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lock_path = sibling_path(&path, "lock");

        Ok(Self {
            path,
            lock_path,
            tracked_sites,
            guard: Mutex::new(()),
        })
    }
}

impl UsageStore for JsonUsageStore {
    fn tracked_sites(&self) -> &[String] {
        &self.tracked_sites
    }

    async fn read(&self) -> Result<StoreState> {
        let _guard = self.guard.lock().await;
        let lock = FileLock::acquire(&self.lock_path).await?;
        let result = read_json_or_default(&self.path).await;
        lock.release().await?;
        result
    }

    async fn update<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut StoreState) -> R + Send,
        R: Send,
    {
        let _guard = self.guard.lock().await;
        let lock = FileLock::acquire(&self.lock_path).await?;

        let result = async {
            let mut state: StoreState = read_json_or_default(&self.path).await?;
            let before = state.clone();
            let value = f(&mut state);
            if state != before {
                write_json_atomic(&self.path, &state).await?;
            } else {
                debug!("Update left state unchanged, skipping write");
            }
            Ok::<_, anyhow::Error>(value)
        }
        .await;

        lock.release().await?;
        result
    }
}

/// Opens the default store in an application directory.
pub fn open_store(app_dir: &std::path::Path, tracked_sites: Vec<String>) -> Result<JsonUsageStore> {
    let path = crate::utils::dir::state_file_path(app_dir);
    info!("Using state file {path:?}");
    JsonUsageStore::new(path, tracked_sites)
}
