use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::device::types::{Device, Observation};
use crate::error::DeviceError;

/// The radio. Implementations: [`crate::device::simulated::SimulatedAdapter`] and, with the
/// `ble` feature, [`crate::device::btle::BtleAdapter`].
#[async_trait]
pub trait DeviceAdapter: Send + Sync + 'static {
    /// Capability query; must not have side effects.
    async fn is_enabled(&self) -> bool;

    /// Start discovery. The stream yields every advertisement, duplicates included, until
    /// it is dropped or `stop_scan` is called.
    async fn scan(&self) -> Result<BoxStream<'static, Observation>, DeviceError>;

    async fn stop_scan(&self) -> Result<(), DeviceError>;

    /// Establish a link. Timeouts are enforced by the caller.
    async fn connect(&self, device: &Device) -> Result<Box<dyn DeviceLink>, DeviceError>;
}

#[async_trait]
pub trait DeviceLink: Send + Sync + 'static {
    async fn is_connected(&self) -> Result<bool, DeviceError>;

    async fn disconnect(&self) -> Result<(), DeviceError>;
}
