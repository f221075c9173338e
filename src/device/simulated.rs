use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use log::{debug, info};
use tokio::time::{sleep, Duration};

use crate::device::adapter::{DeviceAdapter, DeviceLink};
use crate::device::types::{Device, Observation};
use crate::error::DeviceError;

/**
 * How long (milliseconds) the simulated radio takes to report the first advertisements.
 */
pub const SIMULATED_SCAN_DELAY: u64 = 2000;

/**
 * How long (milliseconds) the simulated radio takes to establish a link.
 */
pub const SIMULATED_CONNECT_DELAY: u64 = 1500;

pub fn demo_devices() -> Vec<Observation> {
    vec![
        Observation {
            id: "sign-device-001".to_string(),
            name: "SignLang Pro".to_string(),
            rssi: Some(-45),
            is_connectable: true,
        },
        Observation {
            id: "sign-device-002".to_string(),
            name: "GestureGlove 2.0".to_string(),
            rssi: Some(-67),
            is_connectable: true,
        },
        Observation {
            id: "sign-device-003".to_string(),
            name: "HandTalk Device".to_string(),
            rssi: Some(-72),
            is_connectable: true,
        },
    ]
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process radio used by the CLI demo mode and by tests. Advertises a fixed set of
/// devices once per scan and hands out links that can be dropped from the outside.
pub struct SimulatedAdapter {
    enabled: AtomicBool,
    devices: Mutex<Vec<Observation>>,
    scan_delay: Mutex<Duration>,
    connect_delay: Mutex<Duration>,
    rejections: Mutex<HashMap<String, String>>,
    links: Mutex<HashMap<String, Arc<AtomicBool>>>,
    connect_attempts: AtomicUsize,
}

impl SimulatedAdapter {
    pub fn new() -> Self {
        Self::with_devices(demo_devices())
    }

    pub fn with_devices(devices: Vec<Observation>) -> Self {
        SimulatedAdapter {
            enabled: AtomicBool::new(true),
            devices: Mutex::new(devices),
            scan_delay: Mutex::new(Duration::from_millis(SIMULATED_SCAN_DELAY)),
            connect_delay: Mutex::new(Duration::from_millis(SIMULATED_CONNECT_DELAY)),
            rejections: Mutex::new(HashMap::new()),
            links: Mutex::new(HashMap::new()),
            connect_attempts: AtomicUsize::new(0),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_devices(&self, devices: Vec<Observation>) {
        *lock(&self.devices) = devices;
    }

    pub fn set_scan_delay(&self, delay: Duration) {
        *lock(&self.scan_delay) = delay;
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *lock(&self.connect_delay) = delay;
    }

    /// Make every following connection attempt to `device_id` fail.
    pub fn reject(&self, device_id: &str, reason: &str) {
        lock(&self.rejections).insert(device_id.to_string(), reason.to_string());
    }

    /// Simulate the device going out of range. Returns false if no link was up.
    pub fn drop_link(&self, device_id: &str) -> bool {
        match lock(&self.links).remove(device_id) {
            Some(connected) => connected.swap(false, Ordering::SeqCst),
            None => false,
        }
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }
}

impl Default for SimulatedAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceAdapter for SimulatedAdapter {
    async fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn scan(&self) -> Result<BoxStream<'static, Observation>, DeviceError> {
        if !self.enabled.load(Ordering::SeqCst) {
            return Err(DeviceError::AdapterDisabled);
        }

        let devices = lock(&self.devices).clone();
        let delay = *lock(&self.scan_delay);
        debug!("Simulated scan will report {} device(s) after {:?}", devices.len(), delay);

        let advertisements = stream::once(sleep(delay))
            .flat_map(move |_| stream::iter(devices.clone()))
            .chain(stream::pending());

        Ok(advertisements.boxed())
    }

    async fn stop_scan(&self) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn connect(&self, device: &Device) -> Result<Box<dyn DeviceLink>, DeviceError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.connect_delay);
        sleep(delay).await;

        if !self.enabled.load(Ordering::SeqCst) {
            return Err(DeviceError::AdapterDisabled);
        }

        if let Some(reason) = lock(&self.rejections).get(&device.id) {
            return Err(DeviceError::ConnectionRejected {
                device_id: device.id.clone(),
                reason: reason.clone(),
            });
        }

        info!("Simulated link to {} established", device.id);
        let connected = Arc::new(AtomicBool::new(true));
        lock(&self.links).insert(device.id.clone(), connected.clone());

        Ok(Box::new(SimulatedLink { connected }))
    }
}

pub struct SimulatedLink {
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl DeviceLink for SimulatedLink {
    async fn is_connected(&self) -> Result<bool, DeviceError> {
        Ok(self.connected.load(Ordering::SeqCst))
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn scan_reports_demo_devices_once() {
        let adapter = SimulatedAdapter::new();
        let mut scan = adapter.scan().await.unwrap();

        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(scan.next().await.unwrap().id);
        }
        assert_eq!(ids, vec!["sign-device-001", "sign-device-002", "sign-device-003"]);

        let more = tokio::time::timeout(Duration::from_secs(30), scan.next()).await;
        assert!(more.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_and_dropped_links() {
        let adapter = SimulatedAdapter::new();
        let device = Device::from(demo_devices().remove(0));

        adapter.reject(&device.id, "pairing refused");
        assert!(matches!(
            adapter.connect(&device).await,
            Err(DeviceError::ConnectionRejected { .. })
        ));

        lock(&adapter.rejections).clear();
        let link = adapter.connect(&device).await.unwrap();
        assert!(link.is_connected().await.unwrap());
        assert!(adapter.drop_link(&device.id));
        assert!(!link.is_connected().await.unwrap());
        assert!(!adapter.drop_link(&device.id));
        assert_eq!(adapter.connect_attempts(), 2);
    }
}
