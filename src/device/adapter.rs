//! The capability the controller needs from the platform BLE stack.
//!
//! Adapters hold no application state. Discovery results are pushed into a [`ScanSink`]; the
//! adapter hands back a [`ScanSubscription`] which the controller keeps until the scan is torn
//! down. Once the subscription is released every further call on the sink is a no-op, so late
//! platform callbacks can never reach controller state.

use async_trait::async_trait;
use futures::channel::mpsc::UnboundedSender;
use log::{debug, warn};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::device::constants::SCAN_RELEASE_DEADLINE;
use crate::device::types::{Advertisement, DeviceHandle, DeviceId};
use crate::error::AdapterError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOptions {
    /// Only report peripherals advertising one of these services. Empty means everything.
    pub services: Vec<Uuid>,
    /// Report repeated advertisements of known peripherals (needed for signal strength updates).
    pub allow_duplicates: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    pub auto_reconnect: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        ConnectOptions { auto_reconnect: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEventKind {
    Discovered(Advertisement),
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEvent {
    pub session: u64,
    pub kind: ScanEventKind,
}

/// Where an adapter delivers discovery and scan-stop callbacks for one scan session.
#[derive(Debug, Clone)]
pub struct ScanSink {
    session: u64,
    sender: UnboundedSender<ScanEvent>,
    alive: CancellationToken,
}

impl ScanSink {
    pub fn new(session: u64, sender: UnboundedSender<ScanEvent>, alive: CancellationToken) -> Self {
        ScanSink { session, sender, alive }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn is_alive(&self) -> bool {
        !self.alive.is_cancelled() && !self.sender.is_closed()
    }

    /// Resolves once the subscription for this sink has been released.
    pub async fn released(&self) {
        self.alive.cancelled().await
    }

    pub fn discovered(&self, advertisement: Advertisement) {
        self.deliver(ScanEventKind::Discovered(advertisement));
    }

    pub fn stopped(&self) {
        self.deliver(ScanEventKind::Stopped);
    }

    fn deliver(&self, kind: ScanEventKind) {
        if !self.is_alive() {
            debug!("Dropping scan callback for released session {}", self.session);
            return;
        }

        let event = ScanEvent { session: self.session, kind };
        if self.sender.unbounded_send(event).is_err() {
            debug!("Dropping scan callback, controller is gone");
        }
    }
}

/// Registration of the callbacks belonging to one scan session.
#[derive(Debug)]
pub struct ScanSubscription {
    alive: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ScanSubscription {
    /// `task` is an optional adapter task forwarding platform events into the sink; it must stop
    /// once [`ScanSink::released`] resolves.
    pub fn new(sink: &ScanSink, task: Option<JoinHandle<()>>) -> Self {
        ScanSubscription {
            alive: sink.alive.clone(),
            task,
        }
    }

    pub fn is_released(&self) -> bool {
        self.alive.is_cancelled()
    }

    /// Unregisters the callbacks and waits for the forwarding task to finish. A task that is
    /// stuck in a platform call is aborted after [`SCAN_RELEASE_DEADLINE`].
    pub async fn release(mut self) {
        self.alive.cancel();

        let Some(mut task) = self.task.take() else {
            return;
        };

        match timeout(Duration::from_millis(SCAN_RELEASE_DEADLINE), &mut task).await {
            Ok(Ok(())) => {},
            Ok(Err(err)) => warn!("Scan forwarding task did not stop cleanly: {:?}", err),
            Err(_) => {
                warn!("Scan forwarding task did not stop in time, aborting it");
                task.abort();
            },
        }
    }
}

impl Drop for ScanSubscription {
    fn drop(&mut self) {
        self.alive.cancel();

        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Scan, bond, connect and disconnect primitives of a BLE radio. Any call may fail or stall.
#[async_trait]
pub trait RadioAdapter: Send + Sync {
    /// Power on the radio if the platform allows it.
    async fn enable(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn scan(&self, options: &ScanOptions, sink: ScanSink) -> Result<ScanSubscription, AdapterError>;

    async fn stop_scan(&self) -> Result<(), AdapterError>;

    async fn is_bonded(&self, id: &DeviceId) -> Result<bool, AdapterError>;

    async fn bond(&self, id: &DeviceId) -> Result<(), AdapterError>;

    async fn unbond(&self, id: &DeviceId) -> Result<(), AdapterError>;

    async fn connect(&self, id: &DeviceId, options: &ConnectOptions) -> Result<DeviceHandle, AdapterError>;

    async fn discover_services(&self, handle: DeviceHandle) -> Result<DeviceHandle, AdapterError>;

    async fn disconnect(&self, handle: &DeviceHandle) -> Result<(), AdapterError>;

    /// Terminates the adapter. All handles are invalid afterwards.
    async fn release(&self);
}
