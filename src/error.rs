use std::any::Any;
use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use serde_json;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to determine path to data file")]
    NoDataPath,

    #[error("Failed to acquire file lock on settings file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode data file as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write data file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build data file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl StoreError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            StoreError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Bluetooth adapter is disabled or unavailable")]
    AdapterDisabled,

    #[error("A scan is already running; stop it before starting a new one")]
    ScanInProgress,

    #[error("A connection attempt is already in progress or established")]
    AlreadyConnecting,

    #[error("Timed out connecting to device {device_id}")]
    ConnectionTimeout { device_id: String },

    #[error("Device {device_id} rejected the connection: {reason}")]
    ConnectionRejected { device_id: String, reason: String },

    #[error("Connection attempt was cancelled by disconnect")]
    ConnectionCancelled,

    #[cfg(feature = "ble")]
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },
}

/// Failure reported by an event bus subscriber. Never reaches the publisher.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Subscriber failed: {0}")]
    Failed(String),

    #[error("Subscriber could not persist event: {source}")]
    Store { #[from] source: StoreError },
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start runtime: {source}")]
    Runtime { #[from] source: io::Error },

    #[error("Storage error: {source}")]
    Store { #[from] source: StoreError },

    #[error("Device error: {source}")]
    Device { #[from] source: DeviceError },

    #[error("{0}")]
    Usage(String),
}

pub fn readable_panic_error(error: &Box<dyn Any + Send + 'static>) -> String {
    let mut stringified = String::from("???");

    if let Some(s) = error.downcast_ref::<&str>() {
        stringified = format!("{}", s);
    }
    else if let Some(s) = error.downcast_ref::<String>() {
        stringified = format!("{}", s);
    }

    format!("panic from handler: [{}]", stringified)
}
