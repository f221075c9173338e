use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;
use futures::StreamExt;
use log::{debug, info};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::{EventBus, Subscription};
use crate::device::types::{DeviceEvent, EventKind, TranslationEvent};
use crate::error::HandlerError;
use crate::translation::recognizer::{GestureEvent, RecognitionBackend, RecognitionEvent};

/// Orders translation delivery against session teardown. Once `close` returns, no event
/// guarded by this gate is being delivered and none will be.
#[derive(Debug, Clone)]
pub struct EmissionGate {
    open: Arc<Mutex<bool>>,
}

impl EmissionGate {
    pub fn new() -> Self {
        EmissionGate { open: Arc::new(Mutex::new(true)) }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn close(&self) {
        *self.lock() = false;
    }

    pub fn is_open(&self) -> bool {
        *self.lock()
    }

    /// Run `emit` only while the gate is open, holding it open for the duration.
    pub fn emit_with<F: FnOnce()>(&self, emit: F) -> bool {
        let open = self.lock();
        if !*open {
            return false;
        }
        emit();
        true
    }
}

impl Default for EmissionGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscriber side of the translation stream.
#[derive(Clone)]
pub struct TranslationStream {
    bus: EventBus,
}

impl TranslationStream {
    pub fn new(bus: EventBus) -> Self {
        TranslationStream { bus }
    }

    /// `handler` receives every delivered translation, in emission order, until the returned
    /// handle is dropped.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&TranslationEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.bus.subscribe(EventKind::Translation, move |event| match event {
            DeviceEvent::Translation(translation) => handler(translation),
            _ => Ok(()),
        })
    }

    pub fn subscribe_listening<F>(&self, handler: F) -> Subscription
    where
        F: Fn(bool) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.bus.subscribe(EventKind::Listening, move |event| match event {
            DeviceEvent::Listening(listening) => handler(*listening),
            _ => Ok(()),
        })
    }
}

/// Everything one producer run needs. Owned by the session for one connected interval.
pub struct StreamContext {
    pub bus: EventBus,
    pub gate: EmissionGate,
    pub cancel: CancellationToken,
    pub threshold: u8,
}

/// Accepts a gesture for delivery, or says why not.
pub fn accept(gesture: GestureEvent, threshold: u8) -> Option<GestureEvent> {
    if gesture.confidence < threshold {
        return None;
    }
    if gesture.text.trim().is_empty() {
        return None;
    }
    Some(GestureEvent { confidence: gesture.confidence.min(100), ..gesture })
}

pub fn spawn_translation_stream(backend: Arc<dyn RecognitionBackend>, context: StreamContext) -> JoinHandle<()> {
    spawn(run_translation_stream(backend, context))
}

async fn run_translation_stream(backend: Arc<dyn RecognitionBackend>, context: StreamContext) {
    let StreamContext { bus, gate, cancel, threshold } = context;
    let mut recognitions = backend.recognize();
    let mut sequence: u64 = 0;
    let mut last_timestamp = SystemTime::UNIX_EPOCH;

    info!("Translation stream started (threshold {})", threshold);

    'mainloop: loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            recognition = recognitions.next() => {
                let event = match recognition {
                    None => {
                        debug!("Recognition backend ended");
                        break 'mainloop;
                    },
                    Some(RecognitionEvent::Listening(listening)) => DeviceEvent::Listening(listening),
                    Some(RecognitionEvent::Gesture(gesture)) => {
                        let gesture = match accept(gesture, threshold) {
                            Some(gesture) => gesture,
                            None => {
                                debug!("Suppressed gesture below threshold {}", threshold);
                                continue 'mainloop;
                            },
                        };

                        // timestamps never go backwards within one stream
                        let timestamp = SystemTime::now().max(last_timestamp);
                        last_timestamp = timestamp;
                        sequence += 1;

                        DeviceEvent::Translation(TranslationEvent {
                            text: gesture.text,
                            confidence: gesture.confidence,
                            timestamp,
                            sequence,
                        })
                    },
                };

                if cancel.is_cancelled() || !gate.emit_with(|| { bus.publish(event); }) {
                    break 'mainloop;
                }
            },
        }
    }

    info!("Translation stream stopped after {} event(s)", sequence);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translation::recognizer::SimulatedRecognizer;
    use tokio::time::Duration;

    fn gesture(text: &str, confidence: u8) -> GestureEvent {
        GestureEvent { text: text.to_string(), confidence }
    }

    #[test]
    fn accept_applies_threshold_and_blank_filter() {
        assert!(accept(gesture("Hello", 80), 75).is_some());
        assert!(accept(gesture("Hello", 75), 75).is_some());
        assert!(accept(gesture("Hello", 74), 75).is_none());
        assert!(accept(gesture("   ", 99), 0).is_none());
        assert_eq!(accept(gesture("Hi", 250), 0).unwrap().confidence, 100);
    }

    #[test]
    fn closed_gate_refuses_emission() {
        let gate = EmissionGate::new();
        let mut ran = 0;
        assert!(gate.emit_with(|| ran += 1));
        gate.close();
        assert!(!gate.emit_with(|| ran += 1));
        assert_eq!(ran, 1);
        assert!(!gate.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn stream_delivers_only_confident_translations_in_order() {
        let bus = EventBus::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let _sub = TranslationStream::new(bus.clone()).subscribe(move |event| {
            sink.lock().unwrap().push((event.text.clone(), event.confidence, event.sequence));
            Ok(())
        });

        let backend = Arc::new(SimulatedRecognizer::new(
            vec![gesture("Hello", 95), gesture("maybe", 40), gesture("Please", 80)],
            Duration::from_millis(100),
            Duration::from_millis(10),
        ));
        let cancel = CancellationToken::new();
        let handle = spawn_translation_stream(backend, StreamContext {
            bus,
            gate: EmissionGate::new(),
            cancel: cancel.clone(),
            threshold: 75,
        });

        tokio::time::sleep(Duration::from_millis(350)).await;
        cancel.cancel();
        handle.await.unwrap();

        let received = received.lock().unwrap();
        assert_eq!(
            *received,
            vec![("Hello".to_string(), 95, 1), ("Please".to_string(), 80, 2)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn closing_the_gate_stops_the_stream() {
        let bus = EventBus::new();
        let count = Arc::new(Mutex::new(0));
        let counter = count.clone();
        let _sub = TranslationStream::new(bus.clone()).subscribe(move |_| {
            *counter.lock().unwrap() += 1;
            Ok(())
        });

        let gate = EmissionGate::new();
        let backend = Arc::new(SimulatedRecognizer::new(
            vec![gesture("Hello", 95)],
            Duration::from_millis(100),
            Duration::from_millis(10),
        ));
        let handle = spawn_translation_stream(backend, StreamContext {
            bus,
            gate: gate.clone(),
            cancel: CancellationToken::new(),
            threshold: 0,
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        gate.close();
        let delivered = *count.lock().unwrap();
        assert_eq!(delivered, 1);

        // the task notices the closed gate at its next emission and exits
        handle.await.unwrap();
        assert_eq!(*count.lock().unwrap(), delivered);
    }
}
