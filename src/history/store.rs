use std::path::{Path, PathBuf};
use std::str;
use std::sync::Arc;
use log::{debug, info};
use tokio::fs;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::history::types::{Conversation, ConversationStats};

/// Append-only list of saved conversations, kept as one JSON array on disk (oldest first).
#[derive(Clone)]
pub struct HistoryStore {
    path: PathBuf,
    // serializes read-modify-write cycles
    write_lock: Arc<Mutex<()>>,
}

impl HistoryStore {
    pub fn new(path: PathBuf) -> Self {
        HistoryStore {
            path,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<Conversation>, StoreError> {
        let content = match fs::read(&self.path).await {
            Ok(content) => content,
            Err(source) => {
                let err = StoreError::from(source);
                if err.is_file_not_found_error() {
                    debug!("No history file yet at {}", self.path.to_string_lossy());
                    return Ok(Vec::new());
                }
                return Err(err);
            },
        };

        let content = str::from_utf8(&content)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        Ok(serde_json::from_str(content)?)
    }

    async fn write_all(&self, conversations: &[Conversation]) -> Result<(), StoreError> {
        if let Some(directory) = self.path.parent() {
            fs::create_dir_all(directory).await?;
        }

        let content = serde_json::to_string_pretty(conversations)?;
        fs::write(&self.path, content.as_bytes()).await?;
        Ok(())
    }

    /// Newest first.
    pub async fn list(&self) -> Result<Vec<Conversation>, StoreError> {
        let mut conversations = self.read_all().await?;
        conversations.reverse();
        Ok(conversations)
    }

    pub async fn get(&self, id: u64) -> Result<Option<Conversation>, StoreError> {
        Ok(self.read_all().await?.into_iter().find(|c| c.id == id))
    }

    pub async fn append(&self, conversation: Conversation) -> Result<(), StoreError> {
        let _write = self.write_lock.lock().await;
        let mut conversations = self.read_all().await?;
        info!("Saving conversation {} ({} messages)", conversation.id, conversation.messages.len());
        conversations.push(conversation);
        self.write_all(&conversations).await
    }

    /// Returns false if no conversation had that id.
    pub async fn delete(&self, id: u64) -> Result<bool, StoreError> {
        let _write = self.write_lock.lock().await;
        let mut conversations = self.read_all().await?;
        let before = conversations.len();
        conversations.retain(|c| c.id != id);

        if conversations.len() == before {
            return Ok(false);
        }

        self.write_all(&conversations).await?;
        Ok(true)
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        let _write = self.write_lock.lock().await;
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(source) => {
                let err = StoreError::from(source);
                if err.is_file_not_found_error() { Ok(()) } else { Err(err) }
            },
        }
    }

    /// Newest first.
    pub async fn search(&self, query: &str) -> Result<Vec<Conversation>, StoreError> {
        Ok(self.list().await?.into_iter().filter(|c| c.matches(query)).collect())
    }

    pub async fn stats(&self) -> Result<ConversationStats, StoreError> {
        Ok(ConversationStats::from_conversations(&self.read_all().await?))
    }
}
