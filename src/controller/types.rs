use std::collections::HashMap;
use futures::channel::oneshot;
use serde::Serialize;

use crate::device::connection::ConnectOutcome;
use crate::device::types::{ConnectionState, Device, DeviceHandle, DeviceId};
use crate::error::ControllerError;

pub(crate) type Reply<T> = oneshot::Sender<Result<T, ControllerError>>;

#[derive(Debug)]
pub(crate) enum Intent {
    StartScan(Reply<()>),
    StopScan(Reply<()>),
    Connect(DeviceId, Reply<ConnectOutcome>),
    Disconnect(Reply<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Everything the view layer renders. A new snapshot is published after every transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerState {
    pub is_scanning: bool,
    pub devices: Vec<Device>,
    pub connected_device: Option<DeviceHandle>,
    pub connection_states: HashMap<DeviceId, ConnectionState>,
    pub last_error: Option<ControllerError>,
    /// False once the controller has been torn down.
    pub running: bool,
}

impl ControllerState {
    /// Devices without an entry are disconnected.
    pub fn connection_state_of(&self, id: &DeviceId) -> ConnectionState {
        self.connection_states.get(id).copied().unwrap_or_default()
    }

    pub fn device(&self, id: &DeviceId) -> Option<&Device> {
        self.devices.iter().find(|device| &device.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_devices_are_disconnected() {
        let mut state = ControllerState::default();
        let id = DeviceId::from("AA:BB");
        assert_eq!(state.connection_state_of(&id), ConnectionState::Disconnected);

        state.connection_states.insert(id.clone(), ConnectionState::Pairing);
        assert_eq!(state.connection_state_of(&id), ConnectionState::Pairing);
    }

    #[test]
    fn state_serializes_for_the_view_layer() {
        let state = ControllerState {
            is_scanning: true,
            devices: vec![Device {
                id: DeviceId::from("AA:BB"),
                name: "Thermo1".to_string(),
                signal_strength: -60,
                bonded: false,
            }],
            last_error: Some(ControllerError::Busy),
            ..ControllerState::default()
        };

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["isScanning"], true);
        assert_eq!(json["devices"][0]["signalStrength"], -60);
        assert_eq!(json["connectedDevice"], serde_json::Value::Null);
        assert_eq!(json["lastError"], "Another connection attempt is in progress");
    }
}
