use std::sync::{Arc, Mutex, PoisonError};
use futures::StreamExt;
use futures::channel::mpsc::{channel, Sender};
use log::{debug, info};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::{EventBus, Subscription};
use crate::config::types::{Settings, SharedSettings};
use crate::device::types::DeviceEvent;
use crate::feedback::types::{Feedback, FeedbackSink, Haptic};

/**
 * Events waiting for feedback. When full, new events are dropped rather than blocking delivery.
 */
pub const FEEDBACK_QUEUE: usize = 32;

/// What the user should feel/hear for `event`, given the current settings.
pub fn feedback_for(event: &DeviceEvent, settings: &Settings) -> Vec<Feedback> {
    let mut feedback = Vec::new();

    match event {
        DeviceEvent::ConnectionChanged(device) => {
            if settings.haptic_feedback {
                let haptic = if device.is_some() { Haptic::Success } else { Haptic::Error };
                feedback.push(Feedback::Haptic(haptic));
            }
        },
        DeviceEvent::Translation(translation) => {
            if settings.speech_enabled && !translation.text.trim().is_empty() {
                feedback.push(Feedback::Speak(translation.text.clone()));
            }
            if settings.haptic_feedback {
                feedback.push(Feedback::Haptic(Haptic::Light));
            }
        },
        _ => {},
    }

    feedback
}

pub fn feedback_task(cancel: CancellationToken, sink: Arc<dyn FeedbackSink>, settings: SharedSettings) -> (Sender<DeviceEvent>, JoinHandle<()>) {
    let (event_sender, mut event_receiver) = channel::<DeviceEvent>(FEEDBACK_QUEUE);

    let handle = spawn(async move {
        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                event = event_receiver.next() => match event {
                    None => break 'mainloop,
                    Some(event) => {
                        // settings are read per event so toggles apply immediately
                        for feedback in feedback_for(&event, &settings.get()) {
                            sink.deliver(feedback);
                        }
                    },
                },
            }
        }

        debug!("Feedback task stopped");
    });

    (event_sender, handle)
}

/// Forward connection and translation events to the feedback task without ever waiting on it.
pub fn attach_feedback(bus: &EventBus, sender: Sender<DeviceEvent>) -> Subscription {
    let sender = Mutex::new(sender);

    bus.subscribe_all(move |event| {
        if !matches!(event, DeviceEvent::ConnectionChanged(_) | DeviceEvent::Translation(_)) {
            return Ok(());
        }

        let mut sender = sender.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = sender.try_send(event.clone()) {
            if err.is_full() {
                info!("Feedback queue full, dropping feedback");
            }
        }
        Ok(())
    })
}
