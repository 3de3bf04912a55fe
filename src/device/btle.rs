use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::time::{sleep, Duration};

use crate::device::adapter::{ConnectOptions, RadioAdapter, ScanOptions, ScanSink, ScanSubscription};
use crate::device::constants::{CONNECT_DEADLINE, DISCONNECT_DEADLINE, DISCOVER_SERVICES_DEADLINE, IS_CONNECTED_DEADLINE};
use crate::device::types::{Advertisement, DeviceHandle, DeviceId};
use crate::error::AdapterError;

type PeripheralMap = Arc<Mutex<HashMap<DeviceId, Peripheral>>>;

/// [`RadioAdapter`] backed by the platform bluetooth stack through btleplug.
///
/// btleplug has no bonding primitives: the OS bonds while connecting, so `bond`/`unbond` only
/// log, and `is_bonded` reports whether the peripheral is currently connected.
pub struct BtleplugAdapter {
    // dropping the manager closes the platform session
    _manager: Manager,
    adapter: Adapter,
    peripherals: PeripheralMap,
    released: AtomicBool,
}

async fn with_deadline<T, F>(millis: u64, operation: &'static str, fut: F) -> Result<T, AdapterError>
where
    F: Future<Output = Result<T, btleplug::Error>>,
{
    tokio::select! {
        _ = sleep(Duration::from_millis(millis)) => {
            warn!("{} took too long", operation);
            Err(AdapterError::Timeout(operation))
        }
        result = fut => Ok(result?),
    }
}

fn device_id(id: &PeripheralId) -> DeviceId {
    DeviceId::new(id.to_string())
}

async fn advertisement(peripheral: &Peripheral) -> Option<Advertisement> {
    let properties = match peripheral.properties().await {
        Ok(Some(properties)) => properties,
        Ok(None) => {
            debug!("Peripheral has no properties");
            return None;
        },
        Err(err) => {
            warn!("Could not query peripheral for properties: {:?}", err);
            return None;
        },
    };

    Some(Advertisement {
        id: device_id(&peripheral.id()),
        // btleplug merges the complete and shortened local names into a single field
        name: properties.local_name,
        local_name: None,
        rssi: properties.rssi.unwrap_or(-100),
        connected: peripheral.is_connected().await.unwrap_or(false),
    })
}

impl BtleplugAdapter {
    /// Uses the first bluetooth adapter of the system.
    pub async fn new() -> Result<Self, AdapterError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(AdapterError::NoAdapter)?;

        info!("Using adapter {}", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));

        Ok(BtleplugAdapter {
            _manager: manager,
            adapter,
            peripherals: Arc::new(Mutex::new(HashMap::new())),
            released: AtomicBool::new(false),
        })
    }

    fn check_released(&self) -> Result<(), AdapterError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(AdapterError::Released);
        }
        Ok(())
    }

    fn peripheral(&self, id: &DeviceId) -> Result<Peripheral, AdapterError> {
        self.check_released()?;

        let peripherals = self.peripherals.lock().expect("Failed to lock peripheral map");
        peripherals
            .get(id)
            .cloned()
            .ok_or_else(|| AdapterError::UnknownDevice(id.to_string()))
    }
}

#[async_trait]
impl RadioAdapter for BtleplugAdapter {
    async fn scan(&self, options: &ScanOptions, sink: ScanSink) -> Result<ScanSubscription, AdapterError> {
        self.check_released()?;

        let mut events = self.adapter.events().await?;
        let filter = ScanFilter {
            services: options.services.clone(),
        };
        self.adapter.start_scan(filter).await?;

        let adapter = self.adapter.clone();
        let peripherals = self.peripherals.clone();
        let allow_duplicates = options.allow_duplicates;
        let task_sink = sink.clone();

        let task = spawn(async move {
            'mainloop: loop {
                tokio::select! {
                    _ = task_sink.released() => {
                        break 'mainloop;
                    },
                    event = events.next() => {
                        let id = match event {
                            None => {
                                info!("Adapter event stream ended");
                                task_sink.stopped();
                                break 'mainloop;
                            },
                            Some(CentralEvent::DeviceDiscovered(id)) => id,
                            Some(CentralEvent::DeviceUpdated(id)) if allow_duplicates => id,
                            Some(_) => continue 'mainloop,
                        };

                        let peripheral = match adapter.peripheral(&id).await {
                            Ok(peripheral) => peripheral,
                            Err(err) => {
                                warn!("Failed to look up discovered peripheral: {}", err);
                                continue 'mainloop;
                            },
                        };

                        if let Some(advertisement) = advertisement(&peripheral).await {
                            peripherals
                                .lock()
                                .expect("Failed to lock peripheral map")
                                .insert(advertisement.id.clone(), peripheral);
                            task_sink.discovered(advertisement);
                        }
                    },
                }
            }
        });

        Ok(ScanSubscription::new(&sink, Some(task)))
    }

    async fn stop_scan(&self) -> Result<(), AdapterError> {
        self.check_released()?;
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn is_bonded(&self, id: &DeviceId) -> Result<bool, AdapterError> {
        let peripheral = self.peripheral(id)?;
        with_deadline(IS_CONNECTED_DEADLINE, "Checking the connection status", peripheral.is_connected()).await
    }

    async fn bond(&self, id: &DeviceId) -> Result<(), AdapterError> {
        self.peripheral(id)?;
        debug!("Bonding with {} is left to the OS", id);
        Ok(())
    }

    async fn unbond(&self, id: &DeviceId) -> Result<(), AdapterError> {
        self.peripheral(id)?;
        debug!("Removing the bond with {} is left to the OS", id);
        Ok(())
    }

    async fn connect(&self, id: &DeviceId, options: &ConnectOptions) -> Result<DeviceHandle, AdapterError> {
        let peripheral = self.peripheral(id)?;
        if options.auto_reconnect {
            debug!("Automatic reconnect is handled by the OS where supported");
        }

        with_deadline(CONNECT_DEADLINE, "Connecting", peripheral.connect()).await?;
        Ok(DeviceHandle::new(id.clone(), None))
    }

    async fn discover_services(&self, handle: DeviceHandle) -> Result<DeviceHandle, AdapterError> {
        let peripheral = self.peripheral(&handle.id)?;
        with_deadline(DISCOVER_SERVICES_DEADLINE, "Discovering services", peripheral.discover_services()).await?;

        for service in peripheral.services() {
            debug!("Service {:?} with {} characteristics", service.uuid, service.characteristics.len());
        }

        let name = match advertisement(&peripheral).await {
            Some(advertisement) => advertisement.display_name().map(String::from),
            None => handle.name,
        };
        Ok(DeviceHandle::new(handle.id, name))
    }

    async fn disconnect(&self, handle: &DeviceHandle) -> Result<(), AdapterError> {
        let peripheral = self.peripheral(&handle.id)?;
        with_deadline(DISCONNECT_DEADLINE, "Disconnecting", peripheral.disconnect()).await
    }

    async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Releasing bluetooth adapter");
        if let Err(err) = self.adapter.stop_scan().await {
            debug!("Failed to stop scanning during release: {:?}", err);
        }

        let peripherals: Vec<Peripheral> = self.peripherals
            .lock()
            .expect("Failed to lock peripheral map")
            .drain()
            .map(|(_, peripheral)| peripheral)
            .collect();

        for peripheral in peripherals {
            if peripheral.is_connected().await.unwrap_or(false) {
                if let Err(err) = peripheral.disconnect().await {
                    warn!("Failed to disconnect {:?} during release: {:?}", peripheral.id(), err);
                }
            }
        }
    }
}
