use std::path::{Path, PathBuf};
use std::str;
use std::sync::Arc;
use std::time::SystemTime;
use log::{debug, info};
use tokio::fs;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::profile::types::UserProfile;

/// The single user profile, kept as one JSON document. A profile is created the first time
/// it is read.
#[derive(Clone)]
pub struct ProfileStore {
    path: PathBuf,
    // serializes read-modify-write cycles
    write_lock: Arc<Mutex<()>>,
}

impl ProfileStore {
    pub fn new(path: PathBuf) -> Self {
        ProfileStore {
            path,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Option<UserProfile>, StoreError> {
        let content = match fs::read(&self.path).await {
            Ok(content) => content,
            Err(source) => {
                let err = StoreError::from(source);
                if err.is_file_not_found_error() {
                    return Ok(None);
                }
                return Err(err);
            },
        };

        let content = str::from_utf8(&content)?;
        if content.trim().is_empty() {
            return Ok(None);
        }

        Ok(Some(serde_json::from_str(content)?))
    }

    async fn write(&self, profile: &UserProfile) -> Result<(), StoreError> {
        if let Some(directory) = self.path.parent() {
            fs::create_dir_all(directory).await?;
        }

        let content = serde_json::to_string_pretty(profile)?;
        fs::write(&self.path, content.as_bytes()).await?;
        Ok(())
    }

    pub async fn load(&self) -> Result<UserProfile, StoreError> {
        let _write = self.write_lock.lock().await;

        if let Some(profile) = self.read().await? {
            return Ok(profile);
        }

        let profile = UserProfile::new(SystemTime::now());
        info!("Creating profile {} at {}", profile.id, self.path.to_string_lossy());
        self.write(&profile).await?;
        Ok(profile)
    }

    /// Load, apply `change`, stamp `lastUpdated` and save. Nothing is written if `change`
    /// fails.
    pub async fn update<F>(&self, change: F) -> Result<Result<UserProfile, String>, StoreError>
    where
        F: FnOnce(&mut UserProfile) -> Result<(), String>,
    {
        let _write = self.write_lock.lock().await;

        let mut profile = match self.read().await? {
            Some(profile) => profile,
            None => UserProfile::new(SystemTime::now()),
        };

        if let Err(reason) = change(&mut profile) {
            debug!("Profile change rejected: {}", reason);
            return Ok(Err(reason));
        }

        profile.last_updated = Some(humantime::format_rfc3339_millis(SystemTime::now()).to_string());
        self.write(&profile).await?;
        Ok(Ok(profile))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn first_load_creates_profile() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("profile.json");
        let store = ProfileStore::new(path.clone());

        let created = store.load().await.unwrap();
        assert!(path.is_file());
        assert!(!created.id.is_empty());

        // the same profile comes back, not a new one
        assert_eq!(store.load().await.unwrap(), created);
    }

    #[tokio::test]
    async fn update_persists_edits() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profile.json"));
        let created = store.load().await.unwrap();

        let updated = store.update(|profile| profile.set("preferredLanguage", "de")).await.unwrap().unwrap();
        assert_eq!(updated.id, created.id);
        assert!(updated.last_updated.is_some());

        let reopened = ProfileStore::new(dir.path().join("profile.json"));
        assert_eq!(reopened.load().await.unwrap().preferred_language, "de");
    }

    #[tokio::test]
    async fn rejected_update_writes_nothing() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profile.json"));
        let created = store.load().await.unwrap();

        let result = store.update(|profile| profile.set("preferredLanguage", "xx")).await.unwrap();
        assert!(result.is_err());
        assert_eq!(store.load().await.unwrap(), created);
    }

    #[tokio::test]
    async fn corrupt_profile_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("profile.json");
        std::fs::write(&path, "[1, 2").unwrap();

        let store = ProfileStore::new(path);
        assert!(matches!(store.load().await, Err(StoreError::JsonError { .. })));
    }
}
