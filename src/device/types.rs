use std::fmt;
use serde::{Deserialize, Serialize};

/// Opaque identifier of a peripheral, stable per physical radio address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        DeviceId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        DeviceId::new(value)
    }
}

impl From<String> for DeviceId {
    fn from(value: String) -> Self {
        DeviceId(value)
    }
}

/// A single advertisement as reported by the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub id: DeviceId,
    pub name: Option<String>,
    pub local_name: Option<String>,
    pub rssi: i16,
    pub connected: bool,
}

impl Advertisement {
    /// The advertised name, falling back to the local name. Blank names do not count.
    pub fn display_name(&self) -> Option<&str> {
        [self.name.as_deref(), self.local_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|name| !name.is_empty())
    }

    /// Anonymous peripherals (beacons etc) yield `None`.
    pub fn into_device(self) -> Option<Device> {
        let name = self.display_name()?.to_string();

        Some(Device {
            id: self.id,
            name,
            signal_strength: self.rssi,
            bonded: self.connected,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub signal_strength: i16,
    pub bonded: bool,
}

impl Device {
    /// Signal strength as 0 to 4 bars. -100 dBm and below is zero bars, -60 dBm and above is four.
    pub fn signal_bars(&self) -> u8 {
        let strength = ((f32::from(self.signal_strength) + 100.0) / 40.0).clamp(0.0, 1.0);
        (strength * 4.0).ceil() as u8
    }
}

/// Reference to a connected peripheral, as resolved by the adapter after service discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceHandle {
    pub id: DeviceId,
    pub name: Option<String>,
}

impl DeviceHandle {
    pub fn new(id: DeviceId, name: Option<String>) -> Self {
        DeviceHandle { id, name }
    }
}

impl From<&Device> for DeviceHandle {
    fn from(device: &Device) -> Self {
        DeviceHandle {
            id: device.id.clone(),
            name: Some(device.name.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Pairing,
    Connecting,
    Connected,
}

impl ConnectionState {
    /// Pairing, connecting and connected all count towards the single active connection.
    pub fn is_active(&self) -> bool {
        !matches!(self, ConnectionState::Disconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Pairing => "pairing",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };

        write!(f, "{}", result)
    }
}
