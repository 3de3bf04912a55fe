#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use tokio::sync::Notify;

use ble_scanner::controller::{Controller, ControllerHandle, ControllerSettings};
use ble_scanner::device::adapter::{ConnectOptions, RadioAdapter, ScanOptions, ScanSink, ScanSubscription};
use ble_scanner::device::pairing::{PairingPolicy, PairingPrompt};
use ble_scanner::device::permission::{AlwaysGranted, PermissionGate};
use ble_scanner::device::types::{Advertisement, Device, DeviceHandle, DeviceId};
use ble_scanner::error::AdapterError;

#[derive(Debug, Default, Clone)]
pub struct Calls {
    pub enable: usize,
    pub scan: usize,
    pub stop_scan: usize,
    pub is_bonded: usize,
    pub bond: usize,
    pub unbond: usize,
    pub connect: usize,
    pub discover_services: usize,
    pub disconnect: usize,
    pub release: usize,
}

#[derive(Default)]
pub struct Script {
    pub bonded: HashSet<DeviceId>,
    pub fail_scan: Option<String>,
    pub fail_bond: Option<String>,
    pub fail_connect: Option<String>,
    pub fail_discover: Option<String>,
    pub fail_disconnect: Option<String>,
    /// When set, `connect` waits until the gate is notified.
    pub connect_gate: Option<Arc<Notify>>,
}

#[derive(Default)]
struct Inner {
    script: Script,
    calls: Calls,
    sink: Option<ScanSink>,
}

/// In-memory radio driven by the test.
#[derive(Default)]
pub struct ScriptedAdapter {
    inner: Mutex<Inner>,
}

fn rejected(reason: &Option<String>) -> Result<(), AdapterError> {
    match reason {
        Some(reason) => Err(AdapterError::Rejected(reason.clone())),
        None => Ok(()),
    }
}

impl ScriptedAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(ScriptedAdapter::default())
    }

    pub fn with_script(script: Script) -> Arc<Self> {
        let adapter = ScriptedAdapter::default();
        adapter.inner.lock().unwrap().script = script;
        Arc::new(adapter)
    }

    pub fn script(&self, update: impl FnOnce(&mut Script)) {
        update(&mut self.inner.lock().unwrap().script);
    }

    pub fn calls(&self) -> Calls {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Sink of the most recent scan session.
    pub fn sink(&self) -> Option<ScanSink> {
        self.inner.lock().unwrap().sink.clone()
    }

    pub fn advertise(&self, id: &str, name: Option<&str>, rssi: i16) {
        if let Some(sink) = self.sink() {
            sink.discovered(Advertisement {
                id: DeviceId::from(id),
                name: name.map(String::from),
                local_name: None,
                rssi,
                connected: false,
            });
        }
    }

    pub fn report_stopped(&self) {
        if let Some(sink) = self.sink() {
            sink.stopped();
        }
    }
}

#[async_trait]
impl RadioAdapter for ScriptedAdapter {
    async fn enable(&self) -> Result<(), AdapterError> {
        self.inner.lock().unwrap().calls.enable += 1;
        Ok(())
    }

    async fn scan(&self, _options: &ScanOptions, sink: ScanSink) -> Result<ScanSubscription, AdapterError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.scan += 1;
        rejected(&inner.script.fail_scan)?;

        let subscription = ScanSubscription::new(&sink, None);
        inner.sink = Some(sink);
        Ok(subscription)
    }

    async fn stop_scan(&self) -> Result<(), AdapterError> {
        let sink = {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.stop_scan += 1;
            inner.sink.clone()
        };

        // platforms report the stop through the callback as well
        if let Some(sink) = sink {
            sink.stopped();
        }
        Ok(())
    }

    async fn is_bonded(&self, id: &DeviceId) -> Result<bool, AdapterError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.is_bonded += 1;
        Ok(inner.script.bonded.contains(id))
    }

    async fn bond(&self, _id: &DeviceId) -> Result<(), AdapterError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.bond += 1;
        rejected(&inner.script.fail_bond)
    }

    async fn unbond(&self, _id: &DeviceId) -> Result<(), AdapterError> {
        self.inner.lock().unwrap().calls.unbond += 1;
        Ok(())
    }

    async fn connect(&self, id: &DeviceId, _options: &ConnectOptions) -> Result<DeviceHandle, AdapterError> {
        let gate = {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.connect += 1;
            inner.script.connect_gate.clone()
        };

        if let Some(gate) = gate {
            gate.notified().await;
        }

        rejected(&self.inner.lock().unwrap().script.fail_connect)?;
        Ok(DeviceHandle::new(id.clone(), None))
    }

    async fn discover_services(&self, handle: DeviceHandle) -> Result<DeviceHandle, AdapterError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.discover_services += 1;
        rejected(&inner.script.fail_discover)?;
        Ok(DeviceHandle::new(handle.id, Some("Resolved".to_string())))
    }

    async fn disconnect(&self, _handle: &DeviceHandle) -> Result<(), AdapterError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.disconnect += 1;
        rejected(&inner.script.fail_disconnect)
    }

    async fn release(&self) {
        self.inner.lock().unwrap().calls.release += 1;
    }
}

pub struct Prompt(pub bool);

#[async_trait]
impl PairingPrompt for Prompt {
    async fn confirm(&self, _device: &Device) -> bool {
        self.0
    }
}

pub struct Deny;

#[async_trait]
impl PermissionGate for Deny {
    async fn request_ble_permissions(&self) -> bool {
        false
    }
}

pub fn interactive(accept: bool) -> PairingPolicy {
    PairingPolicy::Interactive(Arc::new(Prompt(accept)))
}

pub fn spawn_controller(adapter: &Arc<ScriptedAdapter>, pairing: PairingPolicy) -> ControllerHandle {
    Controller::spawn(adapter.clone(), Arc::new(AlwaysGranted), pairing, ControllerSettings::default())
}
