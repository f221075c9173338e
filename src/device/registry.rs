use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use futures::StreamExt;
use futures::channel::mpsc::{channel, Receiver, Sender};
use indexmap::IndexMap;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::device::adapter::DeviceAdapter;
use crate::device::constants::SCAN_CHANNEL_CAPACITY;
use crate::device::types::{Device, DeviceEvent, Observation};
use crate::error::DeviceError;

struct ActiveScan {
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct RegistryInner {
    // keyed by device id, in order of first sighting
    devices: IndexMap<String, Device>,
    scan: Option<ActiveScan>,
    starting: bool,
    generation: u64,
}

// Clears `starting` when `start_scan` returns or its future is dropped while the adapter
// is still starting the scan.
struct StartingGuard<'a> {
    registry: &'a DeviceRegistry,
}

impl Drop for StartingGuard<'_> {
    fn drop(&mut self) {
        lock(&self.registry.inner).starting = false;
    }
}

/// Devices seen during scans. Independent of the connection session.
#[derive(Clone)]
pub struct DeviceRegistry {
    adapter: Arc<dyn DeviceAdapter>,
    bus: EventBus,
    inner: Arc<Mutex<RegistryInner>>,
}

fn lock(inner: &Mutex<RegistryInner>) -> MutexGuard<'_, RegistryInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DeviceRegistry {
    pub fn new(adapter: Arc<dyn DeviceAdapter>, bus: EventBus) -> Self {
        DeviceRegistry {
            adapter,
            bus,
            inner: Arc::new(Mutex::new(RegistryInner::default())),
        }
    }

    pub async fn adapter_enabled(&self) -> bool {
        self.adapter.is_enabled().await
    }

    /// Begin a scan window of `duration`. The returned receiver yields each device as it is
    /// observed and closes when the scan ends, either by itself or through [`Self::stop_scan`].
    pub async fn start_scan(&self, duration: Duration) -> Result<Receiver<Device>, DeviceError> {
        if !self.adapter.is_enabled().await {
            return Err(DeviceError::AdapterDisabled);
        }

        {
            let mut inner = lock(&self.inner);
            if inner.scan.is_some() || inner.starting {
                return Err(DeviceError::ScanInProgress);
            }
            inner.starting = true;
        }
        let starting = StartingGuard { registry: self };

        let observations = match self.adapter.scan().await {
            Ok(observations) => observations,
            Err(err) => {
                warn!("Starting scan failed: {:?}", err);
                return Err(err);
            },
        };
        drop(starting);

        let (sender, receiver) = channel::<Device>(SCAN_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        info!("Scanning for devices ({} ms)", duration.as_millis());

        let mut inner = lock(&self.inner);
        inner.generation += 1;
        let generation = inner.generation;

        let handle = spawn(scan_task(
            self.clone(),
            generation,
            cancel.clone(),
            duration,
            observations,
            sender,
        ));
        inner.scan = Some(ActiveScan { generation, cancel, handle });

        Ok(receiver)
    }

    /// Idempotent. When this returns, the cancelled scan has published its last event.
    pub async fn stop_scan(&self) {
        let scan = lock(&self.inner).scan.take();

        if let Some(scan) = scan {
            debug!("Stopping scan {}", scan.generation);
            scan.cancel.cancel();
            if let Err(err) = scan.handle.await {
                warn!("Scan task did not stop cleanly: {:?}", err);
            }
        }
    }

    pub fn is_scanning(&self) -> bool {
        lock(&self.inner).scan.is_some()
    }

    /// Snapshot in display order.
    pub fn devices(&self) -> Vec<Device> {
        lock(&self.inner).devices.values().cloned().collect()
    }

    pub fn device(&self, id: &str) -> Option<Device> {
        lock(&self.inner).devices.get(id).cloned()
    }

    pub fn clear(&self) {
        lock(&self.inner).devices.clear();
    }

    /// Record an observation. A known id keeps its position; its metadata is replaced.
    pub fn observe(&self, observation: Observation) -> Device {
        let device = Device::from(observation);
        // IndexMap keeps the original slot of an existing key
        lock(&self.inner).devices.insert(device.id.clone(), device.clone());
        device
    }

    fn finish_scan(&self, generation: u64) {
        let mut inner = lock(&self.inner);
        if inner.scan.as_ref().map(|scan| scan.generation) == Some(generation) {
            inner.scan = None;
        }
    }
}

async fn scan_task(
    registry: DeviceRegistry,
    generation: u64,
    cancel: CancellationToken,
    duration: Duration,
    mut observations: futures::stream::BoxStream<'static, Observation>,
    mut sender: Sender<Device>,
) {
    registry.bus.publish(DeviceEvent::ScanStarted);

    let deadline = sleep(duration);
    tokio::pin!(deadline);

    'mainloop: loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Scan {} cancelled", generation);
                break 'mainloop;
            },
            _ = &mut deadline => {
                debug!("Scan {} window elapsed", generation);
                break 'mainloop;
            },
            observation = observations.next() => match observation {
                None => {
                    debug!("Adapter ended scan {}", generation);
                    break 'mainloop;
                },
                Some(observation) => {
                    let device = registry.observe(observation);
                    registry.bus.publish(DeviceEvent::DeviceDiscovered(device.clone()));

                    if let Err(err) = sender.try_send(device) {
                        if err.is_full() {
                            debug!("Scan consumer is behind, skipping {}", err.into_inner().id);
                        }
                    }
                },
            },
        }
    }

    drop(observations);
    if let Err(err) = registry.adapter.stop_scan().await {
        warn!("Failed to stop adapter scan: {:?}", err);
    }

    registry.bus.publish(DeviceEvent::ScanStopped);
    registry.finish_scan(generation);
    info!("Scan finished, {} device(s) known", registry.devices().len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::simulated::SimulatedAdapter;
    use crate::device::types::{EventKind, SignalQuality};

    fn observation(id: &str, rssi: i16) -> Observation {
        Observation {
            id: id.to_string(),
            name: format!("device {}", id),
            rssi: Some(rssi),
            is_connectable: true,
        }
    }

    fn scan_events(bus: &EventBus) -> (Arc<Mutex<Vec<DeviceEvent>>>, crate::bus::Subscription) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let log = events.clone();
        let subscription = bus.subscribe(EventKind::Scan, move |event| {
            log.lock().unwrap().push(event.clone());
            Ok(())
        });
        (events, subscription)
    }

    #[test]
    fn dedup_keeps_first_sighting_order_and_latest_metadata() {
        let registry = DeviceRegistry::new(Arc::new(SimulatedAdapter::new()), EventBus::new());

        registry.observe(observation("d1", -45));
        registry.observe(observation("d2", -80));
        registry.observe(observation("d1", -30));

        let devices = registry.devices();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].id, "d1");
        assert_eq!(devices[0].rssi, Some(-30));
        assert_eq!(devices[1].id, "d2");
        assert_eq!(devices[1].signal_quality, SignalQuality::Weak);
    }

    #[tokio::test(start_paused = true)]
    async fn scan_updates_existing_entry() {
        let adapter = Arc::new(SimulatedAdapter::with_devices(vec![observation("d1", -30)]));
        let registry = DeviceRegistry::new(adapter, EventBus::new());
        registry.observe(observation("d1", -45));

        let mut found = registry.start_scan(Duration::from_secs(5)).await.unwrap();
        let device = found.next().await.unwrap();
        assert_eq!(device.rssi, Some(-30));

        registry.stop_scan().await;

        let devices = registry.devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "d1");
        assert_eq!(devices[0].rssi, Some(-30));
    }

    #[tokio::test(start_paused = true)]
    async fn scan_fails_when_adapter_disabled() {
        let adapter = Arc::new(SimulatedAdapter::new());
        adapter.set_enabled(false);
        let registry = DeviceRegistry::new(adapter, EventBus::new());

        assert!(!registry.adapter_enabled().await);
        assert!(matches!(
            registry.start_scan(Duration::from_secs(1)).await,
            Err(DeviceError::AdapterDisabled)
        ));
        assert!(!registry.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn scan_is_not_restartable_mid_scan() {
        let registry = DeviceRegistry::new(Arc::new(SimulatedAdapter::new()), EventBus::new());

        let _found = registry.start_scan(Duration::from_secs(5)).await.unwrap();
        assert!(matches!(
            registry.start_scan(Duration::from_secs(5)).await,
            Err(DeviceError::ScanInProgress)
        ));

        registry.stop_scan().await;
        let _again = registry.start_scan(Duration::from_secs(5)).await.unwrap();
        registry.stop_scan().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_scan_is_idempotent() {
        let bus = EventBus::new();
        let (events, _sub) = scan_events(&bus);
        let registry = DeviceRegistry::new(Arc::new(SimulatedAdapter::new()), bus);

        registry.stop_scan().await;
        let _found = registry.start_scan(Duration::from_secs(30)).await.unwrap();
        registry.stop_scan().await;
        registry.stop_scan().await;

        let events = events.lock().unwrap();
        let stopped = events.iter().filter(|event| **event == DeviceEvent::ScanStopped).count();
        assert_eq!(stopped, 1);
        assert_eq!(events.last(), Some(&DeviceEvent::ScanStopped));
    }

    #[tokio::test(start_paused = true)]
    async fn scan_ends_after_duration() {
        let bus = EventBus::new();
        let (events, _sub) = scan_events(&bus);
        let registry = DeviceRegistry::new(Arc::new(SimulatedAdapter::new()), bus);

        let found: Vec<Device> = registry
            .start_scan(Duration::from_secs(3))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(found.len(), 3);
        assert_eq!(registry.devices().len(), 3);
        assert!(!registry.is_scanning());
        assert_eq!(events.lock().unwrap().last(), Some(&DeviceEvent::ScanStopped));
    }

    // adapter whose scan takes a while to start, like a real radio
    struct SlowStartAdapter {
        inner: SimulatedAdapter,
        start_delay: Duration,
    }

    #[async_trait::async_trait]
    impl DeviceAdapter for SlowStartAdapter {
        async fn is_enabled(&self) -> bool {
            self.inner.is_enabled().await
        }

        async fn scan(&self) -> Result<futures::stream::BoxStream<'static, Observation>, DeviceError> {
            sleep(self.start_delay).await;
            self.inner.scan().await
        }

        async fn stop_scan(&self) -> Result<(), DeviceError> {
            self.inner.stop_scan().await
        }

        async fn connect(&self, device: &Device) -> Result<Box<dyn crate::device::adapter::DeviceLink>, DeviceError> {
            self.inner.connect(device).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_start_does_not_block_next_scan() {
        let adapter = SlowStartAdapter {
            inner: SimulatedAdapter::new(),
            start_delay: Duration::from_millis(500),
        };
        let registry = DeviceRegistry::new(Arc::new(adapter), EventBus::new());

        let abandoned = tokio::time::timeout(Duration::from_millis(100), registry.start_scan(Duration::from_secs(1))).await;
        assert!(abandoned.is_err());
        assert!(!registry.is_scanning());

        registry.stop_scan().await;
        let found: Vec<Device> = registry
            .start_scan(Duration::from_secs(3))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(found.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn no_discoveries_after_stop() {
        let bus = EventBus::new();
        let (events, _sub) = scan_events(&bus);
        let registry = DeviceRegistry::new(Arc::new(SimulatedAdapter::new()), bus);

        let _found = registry.start_scan(Duration::from_secs(60)).await.unwrap();
        registry.stop_scan().await;
        let seen = events.lock().unwrap().len();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(events.lock().unwrap().len(), seen);
    }
}
