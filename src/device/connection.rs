use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use futures::FutureExt;
use futures::channel::mpsc::UnboundedSender;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::spawn;
use tokio::task::JoinHandle;

use crate::device::adapter::{ConnectOptions, RadioAdapter};
use crate::device::pairing::PairingPolicy;
use crate::device::types::{ConnectionState, Device, DeviceHandle, DeviceId};
use crate::error::{readable_thread_panic_error, AdapterError, ControllerError};

/// Result of a connection attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectOutcome {
    Connected,
    /// The user cancelled the pairing confirmation.
    Declined,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEventKind {
    Pairing,
    Connecting,
    Connected(DeviceHandle),
    Declined,
    Failed(String),
    Disconnected,
    DisconnectFailed(String),
}

/// Progress reported by a connect or disconnect task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub id: DeviceId,
    pub kind: ConnectionEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Connect(Result<ConnectOutcome, ControllerError>),
    Disconnect(Result<(), ControllerError>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operation {
    Connect(DeviceId),
    Disconnect(DeviceId),
}

impl Operation {
    fn id(&self) -> &DeviceId {
        match self {
            Operation::Connect(id) | Operation::Disconnect(id) => id,
        }
    }
}

/// Next state of a device given a progress event. Failures and teardown always land in
/// `Disconnected`, whatever the current state.
pub fn next_state(current: ConnectionState, event: &ConnectionEventKind) -> ConnectionState {
    match event {
        ConnectionEventKind::Pairing => ConnectionState::Pairing,
        ConnectionEventKind::Connecting => ConnectionState::Connecting,
        ConnectionEventKind::Connected(_) => ConnectionState::Connected,
        ConnectionEventKind::Declined
        | ConnectionEventKind::Failed(_)
        | ConnectionEventKind::Disconnected
        | ConnectionEventKind::DisconnectFailed(_) => {
            if current != ConnectionState::Disconnected {
                debug!("{} -> disconnected", current);
            }
            ConnectionState::Disconnected
        },
    }
}

/// Per-device connection states plus the single connected device.
///
/// Only the owner mutates this; the tasks doing the radio work report [`ConnectionEvent`]s
/// which are applied here one by one.
#[derive(Debug, Default)]
pub struct ConnectionStateMachine {
    states: HashMap<DeviceId, ConnectionState>,
    connected: Option<DeviceHandle>,
    in_flight: Option<Operation>,
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        ConnectionStateMachine::default()
    }

    pub fn state_of(&self, id: &DeviceId) -> ConnectionState {
        self.states.get(id).copied().unwrap_or_default()
    }

    pub fn states(&self) -> &HashMap<DeviceId, ConnectionState> {
        &self.states
    }

    pub fn connected_device(&self) -> Option<&DeviceHandle> {
        self.connected.as_ref()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    fn active_device(&self) -> Option<&DeviceId> {
        self.states
            .iter()
            .find(|(_, state)| state.is_active())
            .map(|(id, _)| id)
    }

    /// Fails with `Busy` while any connect or disconnect is in flight or a device is active.
    pub fn check_available(&self, id: &DeviceId) -> Result<(), ControllerError> {
        if let Some(operation) = &self.in_flight {
            debug!("Rejecting connect to {}, {:?} in progress", id, operation);
            return Err(ControllerError::Busy);
        }
        if let Some(active) = self.active_device() {
            debug!("Rejecting connect to {}, {} is {}", id, active, self.state_of(active));
            return Err(ControllerError::Busy);
        }
        Ok(())
    }

    /// Claims the single connection slot for `id`.
    pub fn begin_connect(&mut self, id: &DeviceId) -> Result<(), ControllerError> {
        self.check_available(id)?;
        self.in_flight = Some(Operation::Connect(id.clone()));
        Ok(())
    }

    /// Returns the device to tear down, or `None` if nothing is connected (including while a
    /// connect is still pairing or connecting).
    pub fn begin_disconnect(&mut self) -> Result<Option<DeviceHandle>, ControllerError> {
        let Some(handle) = self.connected.clone() else {
            return Ok(None);
        };

        if self.in_flight.is_some() {
            return Err(ControllerError::Busy);
        }

        self.in_flight = Some(Operation::Disconnect(handle.id.clone()));
        Ok(Some(handle))
    }

    /// Forgets every connection and the in-flight operation, e.g. once the adapter is released.
    pub fn reset(&mut self) {
        self.in_flight = None;
        self.connected = None;
        for state in self.states.values_mut() {
            *state = ConnectionState::Disconnected;
        }
    }

    pub fn apply(&mut self, event: &ConnectionEvent) -> Option<Completion> {
        if self.in_flight.as_ref().map(Operation::id) != Some(&event.id) {
            debug!("Ignoring stale connection event {:?}", event);
            return None;
        }

        let current = self.state_of(&event.id);
        let next = next_state(current, &event.kind);
        if current != next {
            info!("Device {}: {} -> {}", event.id, current, next);
        }
        self.states.insert(event.id.clone(), next);

        match &event.kind {
            ConnectionEventKind::Pairing | ConnectionEventKind::Connecting => None,
            ConnectionEventKind::Connected(handle) => {
                self.in_flight = None;
                self.connected = Some(handle.clone());
                Some(Completion::Connect(Ok(ConnectOutcome::Connected)))
            },
            ConnectionEventKind::Declined => {
                self.in_flight = None;
                self.clear_connected(&event.id);
                Some(Completion::Connect(Ok(ConnectOutcome::Declined)))
            },
            ConnectionEventKind::Failed(reason) => {
                self.in_flight = None;
                self.clear_connected(&event.id);
                Some(Completion::Connect(Err(ControllerError::ConnectionFailed { reason: reason.clone() })))
            },
            ConnectionEventKind::Disconnected => {
                self.in_flight = None;
                self.clear_connected(&event.id);
                Some(Completion::Disconnect(Ok(())))
            },
            ConnectionEventKind::DisconnectFailed(reason) => {
                // the remote side may still be connected; the local state is reset regardless
                self.in_flight = None;
                self.clear_connected(&event.id);
                Some(Completion::Disconnect(Err(ControllerError::DisconnectFailed { reason: reason.clone() })))
            },
        }
    }

    fn clear_connected(&mut self, id: &DeviceId) {
        if self.connected.as_ref().map(|handle| &handle.id) == Some(id) {
            self.connected = None;
        }
    }
}

fn report(events: &UnboundedSender<ConnectionEvent>, id: &DeviceId, kind: ConnectionEventKind) {
    if events.unbounded_send(ConnectionEvent { id: id.clone(), kind }).is_err() {
        debug!("Connection event for {} dropped, controller is gone", id);
    }
}

/// Bonded check, pairing, connect and service discovery. Returns the final event.
async fn attempt_connection(
    adapter: &dyn RadioAdapter,
    pairing: &PairingPolicy,
    options: &ConnectOptions,
    device: &Device,
    events: &UnboundedSender<ConnectionEvent>,
) -> Result<ConnectionEventKind, AdapterError> {
    if adapter.is_bonded(&device.id).await? {
        info!("Device {} is already bonded", device.id);
        return Ok(ConnectionEventKind::Connected(DeviceHandle::from(device)));
    }

    report(events, &device.id, ConnectionEventKind::Pairing);
    if !pairing.request(device).await {
        info!("Pairing with {} declined", device.id);
        return Ok(ConnectionEventKind::Declined);
    }
    if pairing.uses_explicit_bond() {
        info!("Bonding with {}...", device.id);
        adapter.bond(&device.id).await?;
    }

    report(events, &device.id, ConnectionEventKind::Connecting);
    info!("Connecting to {}...", device.id);
    let handle = adapter.connect(&device.id, options).await?;

    info!("Connected; Discovering services...");
    let handle = adapter.discover_services(handle).await?;

    info!("Device {} ready", device.id);
    Ok(ConnectionEventKind::Connected(handle))
}

async fn teardown_connection(
    adapter: &dyn RadioAdapter,
    explicit_bond: bool,
    handle: &DeviceHandle,
) -> Result<(), AdapterError> {
    info!("Disconnecting from {}...", handle.id);
    adapter.disconnect(handle).await?;

    if explicit_bond {
        info!("Removing bond with {}", handle.id);
        adapter.unbond(&handle.id).await?;
    }
    Ok(())
}

/// Runs a connection attempt in its own task. Exactly one final event is always reported,
/// even if the attempt panics.
pub fn spawn_connect(
    adapter: Arc<dyn RadioAdapter>,
    pairing: PairingPolicy,
    options: ConnectOptions,
    device: Device,
    events: UnboundedSender<ConnectionEvent>,
) -> JoinHandle<()> {
    spawn(async move {
        let attempt = attempt_connection(adapter.as_ref(), &pairing, &options, &device, &events);

        let kind = match AssertUnwindSafe(attempt).catch_unwind().await {
            Ok(Ok(kind)) => kind,
            Ok(Err(err)) => {
                warn!("Connecting to {} failed: {:?}", device.id, err);
                ConnectionEventKind::Failed(err.to_string())
            },
            Err(panic) => ConnectionEventKind::Failed(readable_thread_panic_error(&panic)),
        };

        report(&events, &device.id, kind);
    })
}

pub fn spawn_disconnect(
    adapter: Arc<dyn RadioAdapter>,
    explicit_bond: bool,
    handle: DeviceHandle,
    events: UnboundedSender<ConnectionEvent>,
) -> JoinHandle<()> {
    spawn(async move {
        let teardown = teardown_connection(adapter.as_ref(), explicit_bond, &handle);

        let kind = match AssertUnwindSafe(teardown).catch_unwind().await {
            Ok(Ok(())) => ConnectionEventKind::Disconnected,
            Ok(Err(err)) => {
                warn!("Disconnecting from {} failed: {:?}", handle.id, err);
                ConnectionEventKind::DisconnectFailed(err.to_string())
            },
            Err(panic) => ConnectionEventKind::DisconnectFailed(readable_thread_panic_error(&panic)),
        };

        report(&events, &handle.id, kind);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: &str) -> DeviceId {
        DeviceId::from(value)
    }

    fn event(device: &str, kind: ConnectionEventKind) -> ConnectionEvent {
        ConnectionEvent { id: id(device), kind }
    }

    fn handle(device: &str) -> DeviceHandle {
        DeviceHandle::new(id(device), Some("Thermo1".to_string()))
    }

    #[test]
    fn failures_always_reset_to_disconnected() {
        for current in [
            ConnectionState::Disconnected,
            ConnectionState::Pairing,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ] {
            assert_eq!(next_state(current, &ConnectionEventKind::Failed("x".into())), ConnectionState::Disconnected);
            assert_eq!(next_state(current, &ConnectionEventKind::DisconnectFailed("x".into())), ConnectionState::Disconnected);
            assert_eq!(next_state(current, &ConnectionEventKind::Declined), ConnectionState::Disconnected);
        }
    }

    #[test]
    fn full_connect_sequence() {
        let mut machine = ConnectionStateMachine::new();
        machine.begin_connect(&id("A")).unwrap();

        assert_eq!(machine.apply(&event("A", ConnectionEventKind::Pairing)), None);
        assert_eq!(machine.state_of(&id("A")), ConnectionState::Pairing);
        assert_eq!(machine.apply(&event("A", ConnectionEventKind::Connecting)), None);
        assert_eq!(machine.state_of(&id("A")), ConnectionState::Connecting);

        let completion = machine.apply(&event("A", ConnectionEventKind::Connected(handle("A"))));
        assert_eq!(completion, Some(Completion::Connect(Ok(ConnectOutcome::Connected))));
        assert_eq!(machine.state_of(&id("A")), ConnectionState::Connected);
        assert_eq!(machine.connected_device(), Some(&handle("A")));
        assert!(!machine.is_busy());
    }

    #[test]
    fn second_connect_is_busy_while_one_is_active() {
        let mut machine = ConnectionStateMachine::new();
        machine.begin_connect(&id("A")).unwrap();
        assert_eq!(machine.begin_connect(&id("B")), Err(ControllerError::Busy));

        machine.apply(&event("A", ConnectionEventKind::Connected(handle("A"))));
        assert_eq!(machine.begin_connect(&id("B")), Err(ControllerError::Busy));
        assert_eq!(machine.state_of(&id("B")), ConnectionState::Disconnected);
    }

    #[test]
    fn events_for_other_devices_are_ignored() {
        let mut machine = ConnectionStateMachine::new();
        machine.begin_connect(&id("A")).unwrap();

        assert_eq!(machine.apply(&event("B", ConnectionEventKind::Connected(handle("B")))), None);
        assert_eq!(machine.state_of(&id("B")), ConnectionState::Disconnected);
        assert!(machine.connected_device().is_none());
    }

    #[test]
    fn failed_attempt_frees_the_slot() {
        let mut machine = ConnectionStateMachine::new();
        machine.begin_connect(&id("A")).unwrap();
        machine.apply(&event("A", ConnectionEventKind::Pairing));

        let completion = machine.apply(&event("A", ConnectionEventKind::Failed("bond rejected".into())));
        assert_eq!(
            completion,
            Some(Completion::Connect(Err(ControllerError::ConnectionFailed { reason: "bond rejected".into() }))),
        );
        assert_eq!(machine.state_of(&id("A")), ConnectionState::Disconnected);
        assert!(machine.begin_connect(&id("B")).is_ok());
    }

    #[test]
    fn disconnect_without_connection_is_a_no_op() {
        let mut machine = ConnectionStateMachine::new();
        assert_eq!(machine.begin_disconnect(), Ok(None));
        assert!(!machine.is_busy());

        machine.begin_connect(&id("A")).unwrap();
        machine.apply(&event("A", ConnectionEventKind::Connecting));
        assert_eq!(machine.begin_disconnect(), Ok(None));
        assert_eq!(machine.state_of(&id("A")), ConnectionState::Connecting);
        assert!(machine.is_busy());
    }

    #[test]
    fn second_disconnect_while_one_is_in_flight_is_busy() {
        let mut machine = ConnectionStateMachine::new();
        machine.begin_connect(&id("A")).unwrap();
        machine.apply(&event("A", ConnectionEventKind::Connected(handle("A"))));

        assert_eq!(machine.begin_disconnect(), Ok(Some(handle("A"))));
        assert_eq!(machine.begin_disconnect(), Err(ControllerError::Busy));
    }

    #[test]
    fn availability_check_does_not_claim_the_slot() {
        let mut machine = ConnectionStateMachine::new();
        assert!(machine.check_available(&id("A")).is_ok());
        assert!(!machine.is_busy());

        machine.begin_connect(&id("A")).unwrap();
        assert_eq!(machine.check_available(&id("B")), Err(ControllerError::Busy));
    }

    #[test]
    fn failed_disconnect_still_resets_local_state() {
        let mut machine = ConnectionStateMachine::new();
        machine.begin_connect(&id("A")).unwrap();
        machine.apply(&event("A", ConnectionEventKind::Connected(handle("A"))));

        assert_eq!(machine.begin_disconnect(), Ok(Some(handle("A"))));
        assert_eq!(machine.begin_disconnect(), Err(ControllerError::Busy));

        let completion = machine.apply(&event("A", ConnectionEventKind::DisconnectFailed("gone".into())));
        assert_eq!(
            completion,
            Some(Completion::Disconnect(Err(ControllerError::DisconnectFailed { reason: "gone".into() }))),
        );
        assert_eq!(machine.state_of(&id("A")), ConnectionState::Disconnected);
        assert!(machine.connected_device().is_none());
    }

    #[test]
    fn reset_forgets_everything() {
        let mut machine = ConnectionStateMachine::new();
        machine.begin_connect(&id("A")).unwrap();
        machine.apply(&event("A", ConnectionEventKind::Connected(handle("A"))));
        machine.begin_disconnect().unwrap();

        machine.reset();
        assert_eq!(machine.state_of(&id("A")), ConnectionState::Disconnected);
        assert!(machine.connected_device().is_none());
        assert!(!machine.is_busy());
    }
}
