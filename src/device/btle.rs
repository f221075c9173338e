use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use async_trait::async_trait;
use btleplug::api::{BDAddr, Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{BoxStream, StreamExt};
use log::{debug, info, warn};

use crate::device::adapter::{DeviceAdapter, DeviceLink};
use crate::device::types::{Device, Observation};
use crate::error::DeviceError;

type Peripherals = Arc<Mutex<HashMap<String, Peripheral>>>;

fn lock(peripherals: &Peripherals) -> MutexGuard<'_, HashMap<String, Peripheral>> {
    peripherals.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Real radio through the platform bluetooth stack. Uses the first adapter the platform reports.
pub struct BtleAdapter {
    adapter: Option<Adapter>,
    peripherals: Peripherals,
}

impl BtleAdapter {
    pub async fn new() -> Result<Self, DeviceError> {
        let manager = Manager::new().await?;
        let adapter = manager.adapters().await?.into_iter().next();

        match &adapter {
            Some(adapter) => info!("Using adapter {}", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string())),
            None => warn!("No bluetooth adapter found"),
        }

        Ok(BtleAdapter {
            adapter,
            peripherals: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn adapter(&self) -> Result<&Adapter, DeviceError> {
        self.adapter.as_ref().ok_or(DeviceError::AdapterDisabled)
    }
}

async fn observe_peripheral(peripheral: Peripheral) -> Option<(String, Observation)> {
    let properties = match peripheral.properties().await {
        Ok(Some(properties)) => properties,
        Ok(None) => {
            debug!("Peripheral has no properties");
            return None;
        },
        Err(err) => {
            warn!("Could not query peripheral for properties: {:?}", err);
            return None;
        },
    };

    // some platforms (macos) hide the address
    let id = if properties.address == BDAddr::default() {
        format!("{:?}", peripheral.id())
    } else {
        properties.address.to_string()
    };

    let observation = Observation {
        id: id.clone(),
        name: properties.local_name.unwrap_or_default(),
        rssi: properties.rssi,
        is_connectable: true,
    };
    Some((id, observation))
}

#[async_trait]
impl DeviceAdapter for BtleAdapter {
    async fn is_enabled(&self) -> bool {
        self.adapter.is_some()
    }

    async fn scan(&self) -> Result<BoxStream<'static, Observation>, DeviceError> {
        let adapter = self.adapter()?.clone();
        let events = adapter.events().await?;
        adapter.start_scan(ScanFilter::default()).await?;

        let peripherals = self.peripherals.clone();
        let stream = events.filter_map(move |event| {
            let adapter = adapter.clone();
            let peripherals = peripherals.clone();
            async move {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => return None,
                };

                let peripheral = match adapter.peripheral(&id).await {
                    Ok(peripheral) => peripheral,
                    Err(err) => {
                        warn!("Failed to look up peripheral {:?}: {}", id, err);
                        return None;
                    },
                };

                let (id, observation) = observe_peripheral(peripheral.clone()).await?;
                lock(&peripherals).insert(id, peripheral);
                Some(observation)
            }
        });

        Ok(stream.boxed())
    }

    async fn stop_scan(&self) -> Result<(), DeviceError> {
        self.adapter()?.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, device: &Device) -> Result<Box<dyn DeviceLink>, DeviceError> {
        let peripheral = lock(&self.peripherals).get(&device.id).cloned();
        let peripheral = peripheral.ok_or_else(|| DeviceError::ConnectionRejected {
            device_id: device.id.clone(),
            reason: "device was not seen during a scan".to_string(),
        })?;

        info!("Connecting to peripheral {}...", device.id);
        peripheral.connect().await?;
        Ok(Box::new(BtleLink { peripheral }))
    }
}

struct BtleLink {
    peripheral: Peripheral,
}

#[async_trait]
impl DeviceLink for BtleLink {
    async fn is_connected(&self) -> Result<bool, DeviceError> {
        Ok(self.peripheral.is_connected().await?)
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}
