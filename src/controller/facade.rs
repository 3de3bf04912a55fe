use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use futures::channel::mpsc::{channel, unbounded, Receiver, Sender, UnboundedReceiver, UnboundedSender};
use futures::channel::oneshot;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::config::types::Config;
use crate::controller::types::{ControllerState, Intent, Reply};
use crate::device::adapter::{ConnectOptions, RadioAdapter, ScanEvent, ScanOptions};
use crate::device::connection::{spawn_connect, spawn_disconnect, Completion, ConnectOutcome, ConnectionEvent, ConnectionStateMachine};
use crate::device::constants::{CHANNEL_CAPACITY, SCAN_DEADLINE};
use crate::device::pairing::PairingPolicy;
use crate::device::permission::PermissionGate;
use crate::device::registry::DeviceRegistry;
use crate::device::scan::{ScanController, ScanStopReason};
use crate::device::types::{ConnectionState, Device, DeviceHandle, DeviceId};
use crate::error::ControllerError;

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub scan: ScanOptions,
    pub scan_duration: Duration,
    pub connect: ConnectOptions,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        ControllerSettings {
            scan: ScanOptions {
                services: vec![],
                allow_duplicates: true,
            },
            scan_duration: Duration::from_millis(SCAN_DEADLINE),
            connect: ConnectOptions::default(),
        }
    }
}

impl From<&Config> for ControllerSettings {
    fn from(config: &Config) -> Self {
        ControllerSettings {
            scan: config.scan_options(),
            scan_duration: config.scan_duration(),
            connect: config.connect_options(),
        }
    }
}

async fn deadline_passed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

/// The single owner of the registry, the connection states and the connected device.
///
/// Runs as one task which handles intents, adapter callbacks, connection progress and the scan
/// deadline strictly one at a time. The view layer talks to it through a [`ControllerHandle`].
pub struct Controller {
    adapter: Arc<dyn RadioAdapter>,
    permissions: Arc<dyn PermissionGate>,
    pairing: PairingPolicy,
    connect_options: ConnectOptions,

    registry: DeviceRegistry,
    scan: ScanController,
    connection: ConnectionStateMachine,
    last_error: Option<ControllerError>,

    // cancelled on teardown; scan sinks hold child tokens
    cancel: CancellationToken,
    scan_events: UnboundedReceiver<ScanEvent>,
    connection_events: UnboundedReceiver<ConnectionEvent>,
    connection_sender: UnboundedSender<ConnectionEvent>,

    // task of the in-flight connect or disconnect and whoever is waiting for it
    task: Option<JoinHandle<()>>,
    pending_connect: Option<Reply<ConnectOutcome>>,
    pending_disconnect: Option<Reply<()>>,

    state: watch::Sender<ControllerState>,
    released: bool,
}

impl Controller {
    /// Takes ownership of the adapter until the controller is shut down, or until the last
    /// handle is dropped.
    pub fn spawn(
        adapter: Arc<dyn RadioAdapter>,
        permissions: Arc<dyn PermissionGate>,
        pairing: PairingPolicy,
        settings: ControllerSettings,
    ) -> ControllerHandle {
        let cancel = CancellationToken::new();
        let (scan_sender, scan_events) = unbounded();
        let (connection_sender, connection_events) = unbounded();
        let (intent_sender, intents) = channel(CHANNEL_CAPACITY);
        let (state, state_receiver) = watch::channel(ControllerState {
            running: true,
            ..ControllerState::default()
        });

        let controller = Controller {
            adapter,
            permissions,
            pairing,
            connect_options: settings.connect,
            registry: DeviceRegistry::new(),
            scan: ScanController::new(settings.scan, settings.scan_duration, scan_sender, cancel.clone()),
            connection: ConnectionStateMachine::new(),
            last_error: None,
            cancel: cancel.clone(),
            scan_events,
            connection_events,
            connection_sender,
            task: None,
            pending_connect: None,
            pending_disconnect: None,
            state,
            released: false,
        };

        spawn(controller.run(intents));

        ControllerHandle {
            intents: intent_sender,
            state: state_receiver,
            _guard: Arc::new(cancel.drop_guard()),
        }
    }

    async fn run(mut self, mut intents: Receiver<Intent>) {
        if let Err(err) = self.adapter.enable().await {
            warn!("Failed to enable bluetooth: {:?}", err);
        }
        self.publish();

        'mainloop: loop {
            let deadline = self.scan.deadline();

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Controller cancelled");
                    break 'mainloop;
                },
                intent = intents.next() => match intent {
                    None => break 'mainloop,
                    Some(Intent::Shutdown(reply)) => {
                        self.teardown().await;
                        let _ = reply.send(());
                        return;
                    },
                    Some(intent) => self.handle_intent(intent).await,
                },
                Some(event) = self.scan_events.next() => {
                    self.scan.handle_event(event, self.adapter.as_ref(), &mut self.registry).await;
                },
                Some(event) = self.connection_events.next() => {
                    self.handle_connection_event(event);
                },
                _ = deadline_passed(deadline) => {
                    info!("Scan deadline reached");
                    if let Err(err) = self.scan.expire(self.adapter.as_ref()).await {
                        self.fail(err);
                    }
                },
            }

            self.publish();
        }

        self.teardown().await;
    }

    fn publish(&self) {
        let snapshot = ControllerState {
            is_scanning: self.scan.is_active(),
            devices: self.registry.snapshot(),
            connected_device: self.connection.connected_device().cloned(),
            connection_states: self.connection.states().clone(),
            last_error: self.last_error.clone(),
            running: !self.released,
        };

        self.state.send_if_modified(|state| {
            if *state == snapshot {
                return false;
            }
            *state = snapshot;
            true
        });
    }

    // callers read the published state as soon as they get their reply
    fn respond<T>(&self, reply: Reply<T>, result: Result<T, ControllerError>) {
        self.publish();
        let _ = reply.send(result);
    }

    fn fail(&mut self, err: ControllerError) -> ControllerError {
        warn!("{}", err);
        self.last_error = Some(err.clone());
        err
    }

    async fn handle_intent(&mut self, intent: Intent) {
        match intent {
            Intent::StartScan(reply) => {
                let result = self.start_scan().await;
                self.respond(reply, result);
            },
            Intent::StopScan(reply) => {
                let result = self.scan
                    .stop(self.adapter.as_ref(), ScanStopReason::Explicit)
                    .await
                    .map_err(|err| self.fail(err));
                self.respond(reply, result);
            },
            Intent::Connect(id, reply) => self.connect(id, reply).await,
            Intent::Disconnect(reply) => self.disconnect(reply),
            Intent::Shutdown(reply) => {
                // handled by the main loop
                let _ = reply.send(());
            },
        }
    }

    async fn start_scan(&mut self) -> Result<(), ControllerError> {
        let started = self.scan
            .start(self.adapter.as_ref(), self.permissions.as_ref(), &mut self.registry)
            .await
            .map_err(|err| self.fail(err))?;

        if started {
            self.last_error = None;
        }
        Ok(())
    }

    async fn connect(&mut self, id: DeviceId, reply: Reply<ConnectOutcome>) {
        if self.connection.connected_device().map(|handle| &handle.id) == Some(&id) {
            debug!("Already connected to {}", id);
            self.respond(reply, Ok(ConnectOutcome::Connected));
            return;
        }

        // overlapping intents are always reported as busy, known device or not
        if let Err(err) = self.connection.check_available(&id) {
            let err = self.fail(err);
            self.respond(reply, Err(err));
            return;
        }

        let Some(device) = self.registry.get(&id).cloned() else {
            let err = self.fail(ControllerError::UnknownDevice(id.to_string()));
            self.respond(reply, Err(err));
            return;
        };

        if let Err(err) = self.connection.begin_connect(&id) {
            let err = self.fail(err);
            self.respond(reply, Err(err));
            return;
        }

        self.last_error = None;
        if let Err(err) = self.scan.stop(self.adapter.as_ref(), ScanStopReason::Explicit).await {
            debug!("Ignoring scan stop failure before connecting: {}", err);
        }

        self.task = Some(spawn_connect(
            self.adapter.clone(),
            self.pairing.clone(),
            self.connect_options,
            device,
            self.connection_sender.clone(),
        ));
        self.pending_connect = Some(reply);
    }

    fn disconnect(&mut self, reply: Reply<()>) {
        match self.connection.begin_disconnect() {
            Err(err) => {
                let err = self.fail(err);
                self.respond(reply, Err(err));
            },
            Ok(None) => {
                debug!("Nothing connected, ignoring disconnect");
                self.respond(reply, Ok(()));
            },
            Ok(Some(handle)) => {
                self.task = Some(spawn_disconnect(
                    self.adapter.clone(),
                    self.pairing.uses_explicit_bond(),
                    handle,
                    self.connection_sender.clone(),
                ));
                self.pending_disconnect = Some(reply);
            },
        }
    }

    fn handle_connection_event(&mut self, event: ConnectionEvent) {
        let Some(completion) = self.connection.apply(&event) else {
            return;
        };
        self.task = None;

        let connected = self.connection.state_of(&event.id) == ConnectionState::Connected;
        self.registry.set_bonded(&event.id, connected);

        match completion {
            Completion::Connect(result) => {
                if let Err(err) = &result {
                    self.fail(err.clone());
                }
                if let Some(reply) = self.pending_connect.take() {
                    self.respond(reply, result);
                }
            },
            Completion::Disconnect(result) => {
                if let Err(err) = &result {
                    self.fail(err.clone());
                }
                if let Some(reply) = self.pending_disconnect.take() {
                    self.respond(reply, result);
                }
            },
        }
    }

    /// Unregisters the scan callbacks, then releases the adapter. Runs once.
    async fn teardown(&mut self) {
        if self.released {
            return;
        }
        info!("Tearing down controller");

        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.connection.reset();
        if let Some(reply) = self.pending_connect.take() {
            let _ = reply.send(Err(ControllerError::Closed));
        }
        if let Some(reply) = self.pending_disconnect.take() {
            let _ = reply.send(Err(ControllerError::Closed));
        }

        if let Err(err) = self.scan.stop(self.adapter.as_ref(), ScanStopReason::Teardown).await {
            debug!("Ignoring scan stop failure during teardown: {}", err);
        }
        self.cancel.cancel();
        self.adapter.release().await;

        self.released = true;
        self.publish();
        info!("Controller stopped");
    }
}

/// Cloneable boundary used by the view layer: intents in, state snapshots out.
///
/// Dropping the last handle tears the controller down.
#[derive(Clone)]
pub struct ControllerHandle {
    intents: Sender<Intent>,
    state: watch::Receiver<ControllerState>,
    _guard: Arc<DropGuard>,
}

impl ControllerHandle {
    async fn request<T>(&self, intent: impl FnOnce(Reply<T>) -> Intent) -> Result<T, ControllerError> {
        let (reply, response) = oneshot::channel();
        let mut intents = self.intents.clone();

        intents.send(intent(reply)).await?;
        response.await.map_err(|_| ControllerError::Closed)?
    }

    /// No-op if a scan is already running.
    pub async fn start_scan(&self) -> Result<(), ControllerError> {
        self.request(Intent::StartScan).await
    }

    pub async fn stop_scan(&self) -> Result<(), ControllerError> {
        self.request(Intent::StopScan).await
    }

    /// Resolves once the attempt has finished. Fails with `Busy` right away if another
    /// connect or disconnect is in progress or a device is already connected.
    pub async fn connect(&self, id: impl Into<DeviceId>) -> Result<ConnectOutcome, ControllerError> {
        let id = id.into();
        self.request(move |reply| Intent::Connect(id, reply)).await
    }

    /// No-op if nothing is connected.
    pub async fn disconnect(&self) -> Result<(), ControllerError> {
        self.request(Intent::Disconnect).await
    }

    /// Tears the controller down and waits until the adapter is released.
    pub async fn shutdown(&self) {
        let (reply, response) = oneshot::channel();
        let mut intents = self.intents.clone();

        if intents.send(Intent::Shutdown(reply)).await.is_ok() {
            let _ = response.await;
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state.borrow().clone()
    }

    pub fn is_scanning(&self) -> bool {
        self.state.borrow().is_scanning
    }

    pub fn devices(&self) -> Vec<Device> {
        self.state.borrow().devices.clone()
    }

    pub fn connected_device(&self) -> Option<DeviceHandle> {
        self.state.borrow().connected_device.clone()
    }

    pub fn connection_state_of(&self, id: &DeviceId) -> ConnectionState {
        self.state.borrow().connection_state_of(id)
    }

    pub fn last_error(&self) -> Option<ControllerError> {
        self.state.borrow().last_error.clone()
    }

    /// Receiver that is notified on every published transition.
    pub fn subscribe(&self) -> watch::Receiver<ControllerState> {
        self.state.clone()
    }

    pub async fn wait_for(&self, predicate: impl FnMut(&ControllerState) -> bool) -> Result<ControllerState, ControllerError> {
        let mut receiver = self.state.clone();
        let state = receiver.wait_for(predicate).await.map_err(|_| ControllerError::Closed)?;
        Ok(state.clone())
    }
}
