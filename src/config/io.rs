use std::env::current_exe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use directories_next::ProjectDirs;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use serde_json;
use fd_lock::{RwLock, RwLockWriteGuard};
use log::{info, warn};
use std::fs::OpenOptions;
use std::str;

use crate::config::types::Settings;
use crate::error::StoreError;

const SETTINGS_FILE_NAME: &str = "signlink.json";
const HISTORY_FILE_NAME: &str = "history.json";
const PROFILE_FILE_NAME: &str = "profile.json";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "signlink", "signlink")
}

// creates a path to signlink.json next to the executable, so a copy on a usb stick carries
// its own settings
fn get_portable_settings_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
            if !path.set_extension("json") {
                warn!("current exe has no filename: {}", path.to_string_lossy());
                return None
            }

            Some(path)
        },
        Err(err) => {
            warn!("failed to get current exe path: {:?}", err);
            None
        },
    }
}

fn get_local_settings_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join(SETTINGS_FILE_NAME))
}

pub fn get_settings_path() -> Result<PathBuf, StoreError> {
    if let Some(path) = get_portable_settings_path() {
        if let Ok(attr) = std::fs::metadata(&path) {
            if attr.is_file() {
                return Ok(path);
            }
        }
    }

    get_local_settings_path().ok_or(StoreError::NoDataPath)
}

pub fn get_history_path() -> Result<PathBuf, StoreError> {
    project_dirs()
        .map(|dirs| dirs.data_dir().join(HISTORY_FILE_NAME))
        .ok_or(StoreError::NoDataPath)
}

pub fn get_profile_path() -> Result<PathBuf, StoreError> {
    project_dirs()
        .map(|dirs| dirs.data_dir().join(PROFILE_FILE_NAME))
        .ok_or(StoreError::NoDataPath)
}

/// Holds the exclusive lock on the settings file; only one instance may run per file.
pub struct SettingsLocker {
    rw_lock: RwLock<std::fs::File>,
}

impl SettingsLocker {
    pub fn lock(&mut self) -> Result<RwLockWriteGuard<'_, std::fs::File>, StoreError> {
        self.rw_lock.try_write().map_err(|source| StoreError::CanNotLock { source })
    }
}

struct SettingsIOInner {
    file: std::fs::File,
}

#[derive(Clone)]
pub struct SettingsIO {
    path: PathBuf,
    inner: Arc<Mutex<SettingsIOInner>>,
}

impl SettingsIO {
    pub fn new_sync() -> Result<Self, StoreError> {
        Self::open(get_settings_path()?)
    }

    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        info!("Using settings file {}", path.to_string_lossy());

        if let Some(directory) = path.parent() {
            std::fs::create_dir_all(directory)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .truncate(false)
            .append(false)
            .create(true)
            .open(&path)?;

        Ok(SettingsIO {
            path,
            inner: Arc::new(Mutex::new(SettingsIOInner { file })),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn locker(&self) -> Result<SettingsLocker, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        Ok(SettingsLocker {
            rw_lock: RwLock::new(inner.file.try_clone()?),
        })
    }

    // The File returned from here should never be closed!
    fn get_file(&self) -> Result<File, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let file = inner.file.try_clone()?; // std File
        Ok(File::from_std(file)) // tokio File
    }

    pub async fn read(&self) -> Result<Settings, StoreError> {
        let mut file = self.get_file()?;

        let mut content = vec![];
        file.rewind().await?;
        file.read_to_end(&mut content).await?;

        if content.is_empty() {
            return Ok(Settings::default());
        }

        let content = str::from_utf8(&content)?;

        let mut settings: Settings = serde_json::from_str(content)?;
        settings.sanitize();
        Ok(settings)
    }

    pub async fn save(&self, settings: &Settings) -> Result<(), StoreError> {
        let mut file = self.get_file()?;
        info!("Saving settings");

        let content = serde_json::to_string_pretty(settings)?;
        file.rewind().await?;
        file.set_len(0).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    pub async fn reset(&self) -> Result<Settings, StoreError> {
        let settings = Settings::default();
        self.save(&settings).await?;
        Ok(settings)
    }
}
