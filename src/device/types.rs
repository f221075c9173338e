use std::time::SystemTime;
use serde::{Deserialize, Serialize};

use crate::device::constants::{RSSI_STRONG_ABOVE, RSSI_MEDIUM_ABOVE, RSSI_EXCELLENT_ABOVE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalQuality {
    Strong,
    Medium,
    Weak,
}

impl SignalQuality {
    pub fn from_rssi(rssi: Option<i16>) -> SignalQuality {
        match rssi {
            Some(rssi) if rssi > RSSI_STRONG_ABOVE => SignalQuality::Strong,
            Some(rssi) if rssi > RSSI_MEDIUM_ABOVE => SignalQuality::Medium,
            _ => SignalQuality::Weak,
        }
    }
}

impl std::fmt::Display for SignalQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let result = match self {
            SignalQuality::Strong => "Strong",
            SignalQuality::Medium => "Medium",
            SignalQuality::Weak => "Weak",
        };

        write!(f, "{}", result)
    }
}

/// Raw advertisement as reported by an adapter, before the registry derives metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub id: String,
    pub name: String,
    pub rssi: Option<i16>,
    pub is_connectable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub name: String,
    pub rssi: Option<i16>,
    pub signal_quality: SignalQuality,
    pub is_connectable: bool,
}

impl Device {
    /// Display percentage shown next to the signal icon.
    pub fn signal_percent(&self) -> u8 {
        match self.rssi {
            None => 0,
            Some(rssi) if rssi > RSSI_EXCELLENT_ABOVE => 100,
            Some(rssi) if rssi > RSSI_STRONG_ABOVE => 75,
            Some(rssi) if rssi > RSSI_MEDIUM_ABOVE => 50,
            Some(_) => 25,
        }
    }
}

impl From<Observation> for Device {
    fn from(observation: Observation) -> Self {
        Device {
            signal_quality: SignalQuality::from_rssi(observation.rssi),
            id: observation.id,
            name: observation.name,
            rssi: observation.rssi,
            is_connectable: observation.is_connectable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Failed,
}

impl SessionState {
    /// Whether `self -> next` is an edge of the session state machine.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Connected)
                | (Connecting, Failed)
                | (Connecting, Disconnecting)
                | (Connected, Disconnecting)
                | (Connected, Idle)
                | (Disconnecting, Idle)
                | (Failed, Idle)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranslationEvent {
    pub text: String,
    pub confidence: u8, // [0, 100]
    pub timestamp: SystemTime,
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    ScanStarted,
    DeviceDiscovered(Device),
    ScanStopped,
    StateChange(SessionState),
    // Published when the session settles: Some on Connected, None when back to Idle.
    ConnectionChanged(Option<Device>),
    Listening(bool),
    Translation(TranslationEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Scan,
    State,
    Connection,
    Listening,
    Translation,
}

impl DeviceEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DeviceEvent::ScanStarted
            | DeviceEvent::DeviceDiscovered(_)
            | DeviceEvent::ScanStopped => EventKind::Scan,
            DeviceEvent::StateChange(_) => EventKind::State,
            DeviceEvent::ConnectionChanged(_) => EventKind::Connection,
            DeviceEvent::Listening(_) => EventKind::Listening,
            DeviceEvent::Translation(_) => EventKind::Translation,
        }
    }
}
