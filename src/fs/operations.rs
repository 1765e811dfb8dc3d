use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::Utc;
use fs4::tokio::AsyncFileExt;
use serde::{de::DeserializeOwned, Serialize};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};

/// Exclusive advisory lock on a side file. Guards read-modify-write cycles between processes
/// sharing the same state file.
pub struct FileLock {
    file: File,
}

impl FileLock {
    pub async fn acquire(path: &Path) -> Result<Self> {
        let file = File::options()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open lock file {path:?}"))?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }

    pub async fn release(self) -> Result<()> {
        self.file.unlock_async().await?;
        Ok(())
    }
}

/// Reads a json document. A missing file gives the default value. A document that can't be
/// parsed is moved aside so that it can be inspected later, and the default value is returned.
pub async fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {path:?}")),
    };

    match serde_json::from_slice(&bytes) {
        Ok(v) => Ok(v),
        Err(e) => {
            let aside = sibling_path(path, &format!("corrupt-{}", Utc::now().timestamp()));
            warn!("State file {path:?} is not valid json ({e}), moving it to {aside:?}");
            fs::rename(path, &aside).await?;
            Ok(T::default())
        }
    }
}

/// Replaces the file with serialized value. Data is written into a temporary file first and
/// then renamed over the target, so readers see either the old or the new document.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let payload = serde_json::to_vec_pretty(value)?;
    let temporary = sibling_path(path, "tmp");

    let mut file = File::create(&temporary)
        .await
        .with_context(|| format!("Failed to create {temporary:?}"))?;
    file.write_all(&payload).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&temporary, path)
        .await
        .with_context(|| format!("Failed to replace {path:?}"))?;
    debug!("Persisted {} bytes into {path:?}", payload.len());
    Ok(())
}

/// `state.json` + `lock` -> `state.json.lock`
pub fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use anyhow::Result;
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn test_missing_file_gives_default() -> Result<()> {
        let dir = tempdir()?;
        let value: BTreeMap<String, u64> = read_json_or_default(&dir.path().join("none.json")).await?;
        assert!(value.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_write_then_read() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("state.json");
        let value = BTreeMap::from([("instagram".to_string(), 10u64)]);

        write_json_atomic(&path, &value).await?;
        write_json_atomic(&path, &value).await?;

        let read: BTreeMap<String, u64> = read_json_or_default(&path).await?;
        assert_eq!(read, value);
        assert!(!sibling_path(&path, "tmp").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupted_file_is_moved_aside() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{\"instagram\": 1")?;

        let read: BTreeMap<String, u64> = read_json_or_default(&path).await?;
        assert!(read.is_empty());
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_lock_can_be_reacquired() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("state.json.lock");
        FileLock::acquire(&path).await?.release().await?;
        FileLock::acquire(&path).await?.release().await?;
        Ok(())
    }

    #[test]
    fn test_sibling_path() {
        assert_eq!(
            sibling_path(Path::new("/a/state.json"), "lock"),
            PathBuf::from("/a/state.json.lock")
        );
    }
}
