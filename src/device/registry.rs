use indexmap::IndexMap;
use log::debug;

use crate::device::types::{Device, DeviceId};

/// Discovered devices, deduplicated by id and kept in first-seen order.
#[derive(Debug, Default, Clone)]
pub struct DeviceRegistry {
    devices: IndexMap<DeviceId, Device>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        DeviceRegistry::default()
    }

    /// Returns true if the device was not seen before.
    pub fn upsert(&mut self, device: Device) -> bool {
        match self.devices.get_mut(&device.id) {
            Some(existing) => {
                existing.name = device.name;
                existing.signal_strength = device.signal_strength;
                existing.bonded = device.bonded;
                false
            },
            None => {
                debug!("New device {} ({})", device.id, device.name);
                self.devices.insert(device.id.clone(), device);
                true
            },
        }
    }

    pub fn set_bonded(&mut self, id: &DeviceId, bonded: bool) {
        if let Some(device) = self.devices.get_mut(id) {
            device.bonded = bonded;
        }
    }

    pub fn get(&self, id: &DeviceId) -> Option<&Device> {
        self.devices.get(id)
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn snapshot(&self) -> Vec<Device> {
        self.devices.values().cloned().collect()
    }
}
