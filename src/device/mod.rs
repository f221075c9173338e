pub mod adapter;
#[cfg(feature = "ble")]
pub mod btle;
pub mod connection;
pub mod constants;
pub mod registry;
pub mod simulated;
pub mod types;
