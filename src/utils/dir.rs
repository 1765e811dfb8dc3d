use std::{
    env, io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

pub const STATE_FILE_NAME: &str = "state.json";

pub fn create_application_default_path() -> Result<PathBuf> {
    let path = {
        #[cfg(windows)]
        {
            let mut path =
                PathBuf::from(env::var("APPDATA").context("APPDATA should be present on Windows")?);
            path.push("sitetime");
            path
        }
        #[cfg(not(windows))]
        {
            let mut path = env::var("XDG_STATE_HOME")
                .map(PathBuf::from)
                .or_else(|_| {
                    env::var("HOME").map(|home| {
                        let mut path = PathBuf::from(home);
                        path.push(".local/state");
                        path
                    })
                })
                .context("Couldn't find neither XDG_STATE_HOME nor HOME")?;
            path.push("sitetime");
            path
        }
    };

    match std::fs::create_dir_all(&path) {
        Ok(_) => Ok(path),
        Err(v) if v.kind() == io::ErrorKind::AlreadyExists => Ok(path),
        Err(v) => Err(v.into()),
    }
}

/// Resolves the application directory, falling back to the default one.
pub fn resolve_application_path(dir: Option<PathBuf>) -> Result<PathBuf> {
    match dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            Ok(dir)
        }
        None => create_application_default_path(),
    }
}

pub fn state_file_path(app_dir: &Path) -> PathBuf {
    app_dir.join(STATE_FILE_NAME)
}
