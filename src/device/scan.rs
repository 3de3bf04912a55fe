use std::time::Duration;
use futures::channel::mpsc::UnboundedSender;
use log::{debug, info, warn};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::device::adapter::{RadioAdapter, ScanEvent, ScanEventKind, ScanOptions, ScanSink, ScanSubscription};
use crate::device::permission::PermissionGate;
use crate::device::registry::DeviceRegistry;
use crate::error::{AdapterError, ControllerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStopReason {
    Explicit,
    AdapterReported,
    Deadline,
    Teardown,
}

#[derive(Debug)]
struct ScanSession {
    id: u64,
    deadline: Instant,
    subscription: Option<ScanSubscription>,
}

/// Owns the single scan session: start, stop and the hard deadline.
#[derive(Debug)]
pub struct ScanController {
    options: ScanOptions,
    duration: Duration,
    next_session: u64,
    session: Option<ScanSession>,
    events: UnboundedSender<ScanEvent>,
    alive: CancellationToken,
}

impl ScanController {
    /// `alive` is the owner's liveness token; sinks handed to the adapter are children of it.
    pub fn new(options: ScanOptions, duration: Duration, events: UnboundedSender<ScanEvent>, alive: CancellationToken) -> Self {
        ScanController {
            options,
            duration,
            next_session: 0,
            session: None,
            events,
            alive,
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.session.as_ref().map(|session| session.deadline)
    }

    /// Returns `Ok(false)` without side effects if a scan is already running.
    pub async fn start(
        &mut self,
        adapter: &dyn RadioAdapter,
        permissions: &dyn PermissionGate,
        registry: &mut DeviceRegistry,
    ) -> Result<bool, ControllerError> {
        if self.is_active() {
            debug!("Scan already active, ignoring start");
            return Ok(false);
        }

        if !permissions.request_ble_permissions().await {
            warn!("Bluetooth permissions denied");
            return Err(ControllerError::PermissionDenied);
        }

        self.next_session += 1;
        let id = self.next_session;
        let sink = ScanSink::new(id, self.events.clone(), self.alive.child_token());

        info!("Starting scan session {} ({} ms)...", id, self.duration.as_millis());
        let subscription = match adapter.scan(&self.options, sink).await {
            Ok(subscription) => subscription,
            Err(err) => {
                warn!("Scanning failed {:?}", err);
                return Err(scan_error(err));
            },
        };

        // events of the new session are only applied after this returns
        registry.clear();

        self.session = Some(ScanSession {
            id,
            deadline: Instant::now() + self.duration,
            subscription: Some(subscription),
        });
        Ok(true)
    }

    /// Idempotent. The adapter is only told to stop if it did not report the stop itself.
    pub async fn stop(&mut self, adapter: &dyn RadioAdapter, reason: ScanStopReason) -> Result<(), ControllerError> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };

        info!("Stopping scan session {} ({:?})", session.id, reason);
        if let Some(subscription) = session.subscription.take() {
            subscription.release().await;
        }

        if reason == ScanStopReason::AdapterReported {
            return Ok(());
        }

        adapter.stop_scan().await.map_err(|err| {
            warn!("Failed to stop scanning: {:?}", err);
            scan_error(err)
        })
    }

    /// Applies a callback from the adapter. Returns true if the registry changed.
    pub async fn handle_event(
        &mut self,
        event: ScanEvent,
        adapter: &dyn RadioAdapter,
        registry: &mut DeviceRegistry,
    ) -> bool {
        let current = self.session.as_ref().map(|session| session.id);
        if current != Some(event.session) {
            debug!("Ignoring event of stale scan session {}", event.session);
            return false;
        }

        match event.kind {
            ScanEventKind::Discovered(advertisement) => match advertisement.into_device() {
                Some(device) => {
                    registry.upsert(device);
                    true
                },
                None => false,
            },
            ScanEventKind::Stopped => {
                // the adapter was not asked to stop, so a failure here is impossible
                let _ = self.stop(adapter, ScanStopReason::AdapterReported).await;
                false
            },
        }
    }

    /// Called when the deadline returned by [`ScanController::deadline`] has passed.
    pub async fn expire(&mut self, adapter: &dyn RadioAdapter) -> Result<(), ControllerError> {
        match self.deadline() {
            Some(deadline) if deadline <= Instant::now() => self.stop(adapter, ScanStopReason::Deadline).await,
            _ => Ok(()),
        }
    }
}

fn scan_error(err: AdapterError) -> ControllerError {
    if err.is_permission_denied() {
        ControllerError::PermissionDenied
    } else {
        ControllerError::ScanFailed { reason: err.to_string() }
    }
}
