use futures::stream::{self, BoxStream, StreamExt};
use tokio::time::{sleep, Duration};

/**
 * Pause (milliseconds) between two simulated recognitions.
 */
pub const SIMULATED_GESTURE_INTERVAL: u64 = 6000;

/**
 * How long (milliseconds) the simulated recognizer "listens" before reporting a gesture.
 */
pub const SIMULATED_LISTEN_DURATION: u64 = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GestureEvent {
    pub text: String,
    pub confidence: u8, // [0, 100]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    Listening(bool),
    Gesture(GestureEvent),
}

/// Source of recognized gestures for one connected session. Each call starts a fresh,
/// independent sequence; dropping the stream stops recognition.
pub trait RecognitionBackend: Send + Sync + 'static {
    fn recognize(&self) -> BoxStream<'static, RecognitionEvent>;
}

pub fn demo_phrases() -> Vec<GestureEvent> {
    [
        ("Hello", 95),
        ("How are you?", 89),
        ("Thank you", 92),
        ("Good morning", 87),
        ("Nice to meet you", 91),
        ("I need help", 88),
        ("Please", 93),
        ("Excuse me", 85),
    ]
    .iter()
    .map(|(text, confidence)| GestureEvent { text: text.to_string(), confidence: *confidence })
    .collect()
}

/// Cycles through a list of phrases forever: wait, listen, report, repeat.
#[derive(Debug, Clone)]
pub struct SimulatedRecognizer {
    phrases: Vec<GestureEvent>,
    interval: Duration,
    listen: Duration,
}

impl SimulatedRecognizer {
    pub fn new(phrases: Vec<GestureEvent>, interval: Duration, listen: Duration) -> Self {
        SimulatedRecognizer { phrases, interval, listen }
    }
}

impl Default for SimulatedRecognizer {
    fn default() -> Self {
        SimulatedRecognizer::new(
            demo_phrases(),
            Duration::from_millis(SIMULATED_GESTURE_INTERVAL),
            Duration::from_millis(SIMULATED_LISTEN_DURATION),
        )
    }
}

impl RecognitionBackend for SimulatedRecognizer {
    fn recognize(&self) -> BoxStream<'static, RecognitionEvent> {
        if self.phrases.is_empty() {
            return stream::pending().boxed();
        }

        let phrases = self.phrases.clone();
        let interval = self.interval;
        let listen = self.listen;

        stream::iter(phrases.into_iter().cycle())
            .then(move |phrase| async move {
                sleep(interval).await;
                let started = stream::iter(vec![RecognitionEvent::Listening(true)]);
                let finished = stream::once(async move {
                    sleep(listen).await;
                    RecognitionEvent::Gesture(phrase)
                })
                .chain(stream::iter(vec![RecognitionEvent::Listening(false)]));

                started.chain(finished)
            })
            .flatten()
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn simulated_recognizer_cycles_phrases() {
        let recognizer = SimulatedRecognizer::new(
            vec![
                GestureEvent { text: "Hello".to_string(), confidence: 95 },
                GestureEvent { text: "Please".to_string(), confidence: 60 },
            ],
            Duration::from_millis(100),
            Duration::from_millis(50),
        );

        let events: Vec<RecognitionEvent> = recognizer.recognize().take(9).collect().await;

        let gestures: Vec<&str> = events
            .iter()
            .filter_map(|event| match event {
                RecognitionEvent::Gesture(gesture) => Some(gesture.text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(gestures, vec!["Hello", "Please", "Hello"]);
        assert_eq!(events[0], RecognitionEvent::Listening(true));
        assert_eq!(events[2], RecognitionEvent::Listening(false));
    }

    #[test]
    fn demo_phrases_are_confident() {
        let phrases = demo_phrases();
        assert_eq!(phrases.len(), 8);
        assert!(phrases.iter().all(|phrase| phrase.confidence >= 85));
    }
}
