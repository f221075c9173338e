use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::config::types::SharedSettings;
use crate::device::adapter::{DeviceAdapter, DeviceLink};
use crate::device::constants::{CONNECT_DEADLINE, DISCONNECT_DEADLINE, IS_CONNECTED_DEADLINE, LINK_POLL_DELAY};
use crate::device::types::{Device, DeviceEvent, SessionState};
use crate::error::DeviceError;
use crate::translation::recognizer::RecognitionBackend;
use crate::translation::stream::{spawn_translation_stream, EmissionGate, StreamContext, TranslationStream};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub connect_timeout: Duration,
    pub link_poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            connect_timeout: Duration::from_millis(CONNECT_DEADLINE),
            link_poll_interval: Duration::from_millis(LINK_POLL_DELAY),
        }
    }
}

// Resources that only exist while Connected.
struct LinkResources {
    link: Arc<dyn DeviceLink>,
    gate: EmissionGate,
    stream: Option<JoinHandle<()>>,
}

struct SessionInner {
    state: SessionState,
    device: Option<Device>,
    started_at: Option<SystemTime>,
    // bumped on every connect attempt; tasks of older generations are ignored
    generation: u64,
    cancel: Option<CancellationToken>,
    link: Option<LinkResources>,
    watcher: Option<JoinHandle<()>>,
}

struct SessionShared {
    adapter: Arc<dyn DeviceAdapter>,
    recognizer: Arc<dyn RecognitionBackend>,
    bus: EventBus,
    settings: SharedSettings,
    config: SessionConfig,
    // serializes connect / disconnect / link-loss teardown
    op_guard: tokio::sync::Mutex<()>,
    inner: Mutex<SessionInner>,
}

/// Owns the lifecycle of at most one device link and the translation stream tied to it.
///
/// ```text
/// Idle -> Connecting -> Connected -> Disconnecting -> Idle
///            |              |
///            |              +-- link lost --> Idle
///            +--> Failed --> Idle
/// ```
///
/// Every transition is published as [`DeviceEvent::StateChange`]. When the session settles,
/// [`DeviceEvent::ConnectionChanged`] carries the connected device, or `None` once it is idle
/// again.
#[derive(Clone)]
pub struct ConnectionSession {
    shared: Arc<SessionShared>,
}

impl ConnectionSession {
    pub fn new(
        adapter: Arc<dyn DeviceAdapter>,
        recognizer: Arc<dyn RecognitionBackend>,
        bus: EventBus,
        settings: SharedSettings,
        config: SessionConfig,
    ) -> Self {
        ConnectionSession {
            shared: Arc::new(SessionShared {
                adapter,
                recognizer,
                bus,
                settings,
                config,
                op_guard: tokio::sync::Mutex::new(()),
                inner: Mutex::new(SessionInner {
                    state: SessionState::Idle,
                    device: None,
                    started_at: None,
                    generation: 0,
                    cancel: None,
                    link: None,
                    watcher: None,
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.shared.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_state(&self, state: SessionState) {
        debug!("Session state: {:?}", state);
        self.shared.bus.publish(DeviceEvent::StateChange(state));
    }

    fn publish_idle(&self) {
        self.publish_state(SessionState::Idle);
        self.shared.bus.publish(DeviceEvent::ConnectionChanged(None));
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn current_device(&self) -> Option<Device> {
        self.lock().device.clone()
    }

    pub fn started_at(&self) -> Option<SystemTime> {
        self.lock().started_at
    }

    pub fn translations(&self) -> TranslationStream {
        TranslationStream::new(self.shared.bus.clone())
    }

    /// Connect to `device`. Only legal while idle; any other state, or another connect or
    /// disconnect in flight, fails fast with [`DeviceError::AlreadyConnecting`].
    pub async fn connect(&self, device: Device) -> Result<(), DeviceError> {
        let _guard = self.shared.op_guard.try_lock().map_err(|_| DeviceError::AlreadyConnecting)?;

        let (generation, cancel) = {
            let mut inner = self.lock();
            if inner.state != SessionState::Idle {
                return Err(DeviceError::AlreadyConnecting);
            }

            let cancel = CancellationToken::new();
            inner.generation += 1;
            inner.state = SessionState::Connecting;
            inner.device = Some(device.clone());
            inner.started_at = Some(SystemTime::now());
            inner.cancel = Some(cancel.clone());
            // a watcher left over from a lost link has already finished
            inner.watcher = None;
            (inner.generation, cancel)
        };

        info!("Connecting to {} ({})...", device.name, device.id);
        self.publish_state(SessionState::Connecting);
        let mut attempt = PendingAttempt { session: self, generation, armed: true };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                attempt.disarm();
                info!("Connection attempt to {} cancelled", device.id);
                return Err(DeviceError::ConnectionCancelled);
            },
            result = timeout(self.shared.config.connect_timeout, self.shared.adapter.connect(&device)) => match result {
                Err(_) => Err(DeviceError::ConnectionTimeout { device_id: device.id.clone() }),
                Ok(result) => result,
            },
        };

        let link: Arc<dyn DeviceLink> = match result {
            Ok(link) => Arc::from(link),
            Err(err) => {
                warn!("Connecting to {} failed: {}", device.id, err);
                attempt.disarm();
                self.fail(generation);
                return Err(err);
            },
        };

        let abandoned = {
            let mut inner = self.lock();
            let abandoned = cancel.is_cancelled() || inner.generation != generation;
            if !abandoned {
                inner.state = SessionState::Connected;
                inner.link = Some(LinkResources {
                    link: link.clone(),
                    gate: EmissionGate::new(),
                    stream: None,
                });
            }
            abandoned
        };
        attempt.disarm();

        if abandoned {
            // a disconnect is waiting for us; it performs the state transitions
            disconnect_link(link.as_ref()).await;
            return Err(DeviceError::ConnectionCancelled);
        }

        info!("Connected to {}", device.id);
        self.publish_state(SessionState::Connected);
        self.shared.bus.publish(DeviceEvent::ConnectionChanged(Some(device)));

        let threshold = self.shared.settings.confidence_threshold();
        let mut inner = self.lock();
        if let Some(resources) = inner.link.as_mut() {
            resources.stream = Some(spawn_translation_stream(
                self.shared.recognizer.clone(),
                StreamContext {
                    bus: self.shared.bus.clone(),
                    gate: resources.gate.clone(),
                    cancel: cancel.child_token(),
                    threshold,
                },
            ));
        }
        inner.watcher = Some(spawn(watch_link(self.clone(), generation, link, cancel.clone())));

        Ok(())
    }

    fn fail(&self, generation: u64) {
        {
            let mut inner = self.lock();
            if inner.generation != generation || inner.state != SessionState::Connecting {
                return;
            }
            inner.state = SessionState::Failed;
            inner.device = None;
            inner.started_at = None;
            inner.cancel = None;
        }
        self.publish_state(SessionState::Failed);

        self.lock().state = SessionState::Idle;
        self.publish_idle();
    }

    /// Best-effort teardown from `Connecting` or `Connected`; a no-op otherwise. When this
    /// returns the session is idle and the cancelled operation fires nothing further.
    pub async fn disconnect(&self) {
        let (cancel, watcher) = {
            let mut inner = self.lock();
            match inner.state {
                SessionState::Connecting | SessionState::Connected => {},
                _ => return,
            }
            (inner.cancel.clone(), inner.watcher.take())
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }

        // the watcher may be mid-way through a link-loss teardown; let it finish first
        if let Some(watcher) = watcher {
            if let Err(err) = watcher.await {
                warn!("Link watcher did not stop cleanly: {:?}", err);
            }
        }

        let _guard = self.shared.op_guard.lock().await;

        let gate = {
            let inner = self.lock();
            match inner.state {
                SessionState::Connecting | SessionState::Connected => {},
                _ => return,
            }
            inner.link.as_ref().map(|resources| resources.gate.clone())
        };
        if let Some(gate) = gate {
            gate.close();
        }

        let resources = {
            let mut inner = self.lock();
            inner.state = SessionState::Disconnecting;
            inner.link.take()
        };
        self.publish_state(SessionState::Disconnecting);

        if let Some(resources) = resources {
            if let Some(stream) = resources.stream {
                if let Err(err) = stream.await {
                    warn!("Translation stream did not stop cleanly: {:?}", err);
                }
            }
            disconnect_link(resources.link.as_ref()).await;
        }

        {
            let mut inner = self.lock();
            inner.state = SessionState::Idle;
            inner.device = None;
            inner.started_at = None;
            inner.cancel = None;
        }
        info!("Disconnected");
        self.publish_idle();
    }

    async fn handle_link_loss(&self, generation: u64) {
        let _guard = self.shared.op_guard.lock().await;

        let gate = {
            let inner = self.lock();
            if inner.generation != generation || inner.state != SessionState::Connected {
                return;
            }
            inner.link.as_ref().map(|resources| resources.gate.clone())
        };
        if let Some(gate) = gate {
            gate.close();
        }

        let (resources, cancel) = {
            let mut inner = self.lock();
            inner.state = SessionState::Idle;
            inner.device = None;
            inner.started_at = None;
            (inner.link.take(), inner.cancel.take())
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(resources) = resources {
            if let Some(stream) = resources.stream {
                if let Err(err) = stream.await {
                    warn!("Translation stream did not stop cleanly: {:?}", err);
                }
            }
            disconnect_link(resources.link.as_ref()).await;
        }

        self.publish_idle();
    }
}

// Settles an attempt whose `connect` future is dropped before the link is up, so the
// session does not stay in Connecting.
struct PendingAttempt<'a> {
    session: &'a ConnectionSession,
    generation: u64,
    armed: bool,
}

impl PendingAttempt<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingAttempt<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("Connection attempt dropped before it settled");
            self.session.fail(self.generation);
        }
    }
}

async fn disconnect_link(link: &dyn DeviceLink) {
    tokio::select! {
        _ = sleep(Duration::from_millis(DISCONNECT_DEADLINE)) => {
            warn!("Disconnecting the link took too long");
        }
        result = link.disconnect() => {
            if let Err(err) = result {
                warn!("Failed to disconnect link: {:?}", err);
            }
        }
    }
}

async fn watch_link(session: ConnectionSession, generation: u64, link: Arc<dyn DeviceLink>, cancel: CancellationToken) {
    let poll = session.shared.config.link_poll_interval;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = sleep(poll) => {},
        }

        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = sleep(Duration::from_millis(IS_CONNECTED_DEADLINE)) => {
                warn!("Checking for connection status took too long");
                false
            }
            result = link.is_connected() => match result {
                Err(err) => {
                    warn!("Error checking for connection state: {:?}", err);
                    false
                },
                Ok(connected) => connected,
            }
        };

        if !connected {
            warn!("Connection lost");
            session.handle_link_loss(generation).await;
            return;
        }
    }
}
