use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;
use log::debug;

use crate::bus::Subscription;
use crate::device::types::TranslationEvent;
use crate::error::StoreError;
use crate::history::store::HistoryStore;
use crate::history::types::Conversation;
use crate::translation::stream::TranslationStream;

/// "[HH:MM:SS] text", time of day in UTC.
pub fn format_entry(event: &TranslationEvent) -> String {
    let stamp = humantime::format_rfc3339_seconds(event.timestamp).to_string();
    let time_of_day = stamp.get(11..19).unwrap_or("--:--:--");
    format!("[{}] {}", time_of_day, event.text)
}

/// Rolling transcript of the current conversation. Lives on the presentation side: the core
/// never writes history, this recorder does when asked to save.
pub struct TranscriptRecorder {
    entries: Arc<Mutex<Vec<String>>>,
    _subscription: Subscription,
}

fn lock(entries: &Mutex<Vec<String>>) -> MutexGuard<'_, Vec<String>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TranscriptRecorder {
    pub fn attach(stream: &TranslationStream) -> Self {
        let entries = Arc::new(Mutex::new(Vec::new()));
        let sink = entries.clone();
        let subscription = stream.subscribe(move |event| {
            lock(&sink).push(format_entry(event));
            Ok(())
        });

        TranscriptRecorder {
            entries,
            _subscription: subscription,
        }
    }

    pub fn entries(&self) -> Vec<String> {
        lock(&self.entries).clone()
    }

    pub fn latest(&self) -> Option<String> {
        lock(&self.entries).last().cloned()
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }

    /// Store the transcript as a conversation and start a new one. Nothing is written for an
    /// empty transcript.
    pub async fn save(&self, store: &HistoryStore) -> Result<Option<Conversation>, StoreError> {
        let messages = std::mem::take(&mut *lock(&self.entries));
        if messages.is_empty() {
            debug!("Transcript empty, nothing to save");
            return Ok(None);
        }

        let conversation = Conversation::new(messages, SystemTime::now());
        match store.append(conversation.clone()).await {
            Ok(()) => Ok(Some(conversation)),
            Err(err) => {
                // keep what we had so the caller can retry
                let mut entries = lock(&self.entries);
                let newer = std::mem::take(&mut *entries);
                *entries = conversation.messages;
                entries.extend(newer);
                Err(err)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::tempdir;
    use crate::bus::EventBus;
    use crate::device::types::DeviceEvent;

    fn translation(text: &str, secs: u64) -> DeviceEvent {
        DeviceEvent::Translation(TranslationEvent {
            text: text.to_string(),
            confidence: 90,
            timestamp: UNIX_EPOCH + Duration::from_secs(secs),
            sequence: 1,
        })
    }

    #[test]
    fn entry_format() {
        let event = TranslationEvent {
            text: "Thank you".to_string(),
            confidence: 92,
            timestamp: UNIX_EPOCH + Duration::from_secs(3_600 * 13 + 62),
            sequence: 3,
        };
        assert_eq!(format_entry(&event), "[13:01:02] Thank you");
    }

    #[tokio::test]
    async fn records_and_saves() {
        let bus = EventBus::new();
        let recorder = TranscriptRecorder::attach(&TranslationStream::new(bus.clone()));

        bus.publish(translation("Hello", 10));
        bus.publish(DeviceEvent::Listening(true));
        bus.publish(translation("Please", 20));
        assert_eq!(recorder.entries(), vec!["[00:00:10] Hello", "[00:00:20] Please"]);
        assert_eq!(recorder.latest().as_deref(), Some("[00:00:20] Please"));

        let dir = tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("history.json"));
        let saved = recorder.save(&store).await.unwrap().unwrap();
        assert_eq!(saved.messages.len(), 2);
        assert!(recorder.entries().is_empty());
        assert_eq!(store.list().await.unwrap(), vec![saved]);

        assert!(recorder.save(&store).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_save_keeps_entries() {
        let bus = EventBus::new();
        let recorder = TranscriptRecorder::attach(&TranslationStream::new(bus.clone()));
        bus.publish(translation("Hello", 10));

        let dir = tempdir().unwrap();
        // a directory where the file should be makes the write fail
        let path = dir.path().join("history.json");
        std::fs::create_dir(&path).unwrap();
        let store = HistoryStore::new(path);

        assert!(recorder.save(&store).await.is_err());
        assert_eq!(recorder.entries(), vec!["[00:00:10] Hello"]);
    }
}
