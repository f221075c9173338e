use std::sync::Arc;
use log::{info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::{EventBus, Subscription};
use crate::config::types::{Settings, SharedSettings};
use crate::device::adapter::DeviceAdapter;
use crate::device::connection::{ConnectionSession, SessionConfig};
use crate::device::registry::DeviceRegistry;
use crate::error::StoreError;
use crate::feedback::dispatcher::{attach_feedback, feedback_task};
use crate::feedback::types::FeedbackSink;
use crate::history::store::HistoryStore;
use crate::history::transcript::TranscriptRecorder;
use crate::history::types::Conversation;
use crate::translation::recognizer::RecognitionBackend;

/// One app lifetime worth of components, sharing a single bus. Must be created inside a
/// tokio runtime.
pub struct Companion {
    bus: EventBus,
    registry: DeviceRegistry,
    session: ConnectionSession,
    settings: SharedSettings,
    history: HistoryStore,
    transcript: TranscriptRecorder,
    feedback_cancel: CancellationToken,
    feedback_handle: JoinHandle<()>,
    _feedback_subscription: Subscription,
}

impl Companion {
    pub fn new(
        adapter: Arc<dyn DeviceAdapter>,
        recognizer: Arc<dyn RecognitionBackend>,
        settings: Settings,
        history: HistoryStore,
        feedback: Arc<dyn FeedbackSink>,
        config: SessionConfig,
    ) -> Self {
        let bus = EventBus::new();
        let settings = SharedSettings::new(settings);

        let registry = DeviceRegistry::new(adapter.clone(), bus.clone());
        let session = ConnectionSession::new(adapter, recognizer, bus.clone(), settings.clone(), config);
        let transcript = TranscriptRecorder::attach(&session.translations());

        let feedback_cancel = CancellationToken::new();
        let (feedback_sender, feedback_handle) = feedback_task(feedback_cancel.clone(), feedback, settings.clone());
        let feedback_subscription = attach_feedback(&bus, feedback_sender);

        Companion {
            bus,
            registry,
            session,
            settings,
            history,
            transcript,
            feedback_cancel,
            feedback_handle,
            _feedback_subscription: feedback_subscription,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn session(&self) -> &ConnectionSession {
        &self.session
    }

    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn transcript(&self) -> &TranscriptRecorder {
        &self.transcript
    }

    /// Disconnect and, when `autoSave` is on, store the transcript as a conversation.
    pub async fn end_session(&self) -> Result<Option<Conversation>, StoreError> {
        self.session.disconnect().await;

        if !self.settings.get().auto_save {
            return Ok(None);
        }

        let saved = self.transcript.save(&self.history).await?;
        if let Some(conversation) = &saved {
            info!("Conversation {} saved to history", conversation.id);
        }
        Ok(saved)
    }

    pub async fn shutdown(self) {
        self.registry.stop_scan().await;
        self.session.disconnect().await;

        self.feedback_cancel.cancel();
        if let Err(err) = self.feedback_handle.await {
            warn!("Feedback task ended abnormally: {}", err);
        }
    }
}
