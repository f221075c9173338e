use log::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Haptic {
    Success,
    Error,
    Light,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feedback {
    Haptic(Haptic),
    Speak(String),
}

/// Haptics/speech output. Called from the feedback task, never from event delivery.
pub trait FeedbackSink: Send + Sync + 'static {
    fn deliver(&self, feedback: Feedback);
}

/// Sink for hosts without haptics or a speech engine.
pub struct LogFeedbackSink;

impl FeedbackSink for LogFeedbackSink {
    fn deliver(&self, feedback: Feedback) {
        match feedback {
            Feedback::Haptic(haptic) => info!("haptic: {:?}", haptic),
            Feedback::Speak(text) => info!("speak: {}", text),
        }
    }
}
