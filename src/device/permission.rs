use std::fmt;
use std::sync::Arc;
use async_trait::async_trait;
use log::{info, warn};

use crate::device::constants::ANDROID_BLUETOOTH_PERMISSIONS_API_LEVEL;

/// One-shot check run before every scan.
#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn request_ble_permissions(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlePermission {
    AccessCoarseLocation,
    BluetoothScan,
    BluetoothConnect,
}

impl fmt::Display for BlePermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            BlePermission::AccessCoarseLocation => "android.permission.ACCESS_COARSE_LOCATION",
            BlePermission::BluetoothScan => "android.permission.BLUETOOTH_SCAN",
            BlePermission::BluetoothConnect => "android.permission.BLUETOOTH_CONNECT",
        };

        write!(f, "{}", result)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Android { api_level: u32 },
    Other,
}

impl Platform {
    /// The runtime permissions that must all be granted before scanning.
    pub fn required_permissions(&self) -> Vec<BlePermission> {
        match self {
            Platform::Android { api_level } if *api_level < ANDROID_BLUETOOTH_PERMISSIONS_API_LEVEL => {
                vec![BlePermission::AccessCoarseLocation]
            },
            Platform::Android { .. } => vec![
                BlePermission::BluetoothScan,
                BlePermission::BluetoothConnect,
                BlePermission::AccessCoarseLocation,
            ],
            Platform::Other => vec![],
        }
    }
}

/// Asks the OS (and through it, the user) for a set of runtime permissions.
#[async_trait]
pub trait PermissionRequester: Send + Sync {
    /// Returns the subset of `permissions` that was granted.
    async fn request(&self, permissions: &[BlePermission]) -> Vec<BlePermission>;
}

/// Requests whatever the platform requires and grants only if all of it was granted.
pub struct PlatformPermissionGate {
    platform: Platform,
    requester: Arc<dyn PermissionRequester>,
}

impl PlatformPermissionGate {
    pub fn new(platform: Platform, requester: Arc<dyn PermissionRequester>) -> Self {
        PlatformPermissionGate { platform, requester }
    }
}

#[async_trait]
impl PermissionGate for PlatformPermissionGate {
    async fn request_ble_permissions(&self) -> bool {
        let required = self.platform.required_permissions();
        if required.is_empty() {
            return true;
        }

        info!("Requesting permissions {:?}", required);
        let granted = self.requester.request(&required).await;
        let missing: Vec<_> = required.iter().filter(|p| !granted.contains(p)).collect();

        if !missing.is_empty() {
            warn!("Permissions not granted: {:?}", missing);
            return false;
        }
        true
    }
}

/// Desktop platforms have no runtime permission prompt; access problems surface when scanning.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysGranted;

#[async_trait]
impl PermissionGate for AlwaysGranted {
    async fn request_ble_permissions(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use super::*;

    struct FakeRequester {
        grant: Vec<BlePermission>,
        asked: Mutex<Vec<Vec<BlePermission>>>,
    }

    #[async_trait]
    impl PermissionRequester for FakeRequester {
        async fn request(&self, permissions: &[BlePermission]) -> Vec<BlePermission> {
            self.asked.lock().unwrap().push(permissions.to_vec());
            permissions.iter().copied().filter(|p| self.grant.contains(p)).collect()
        }
    }

    fn gate(platform: Platform, grant: Vec<BlePermission>) -> (PlatformPermissionGate, Arc<FakeRequester>) {
        let requester = Arc::new(FakeRequester { grant, asked: Mutex::new(vec![]) });
        (PlatformPermissionGate::new(platform, requester.clone()), requester)
    }

    #[test]
    fn old_android_only_needs_location() {
        assert_eq!(
            Platform::Android { api_level: 30 }.required_permissions(),
            vec![BlePermission::AccessCoarseLocation],
        );
        assert_eq!(Platform::Android { api_level: 31 }.required_permissions().len(), 3);
        assert!(Platform::Other.required_permissions().is_empty());
    }

    #[tokio::test]
    async fn all_permissions_must_be_granted() {
        let (partial, _) = gate(
            Platform::Android { api_level: 33 },
            vec![BlePermission::BluetoothScan, BlePermission::AccessCoarseLocation],
        );
        assert!(!partial.request_ble_permissions().await);

        let (full, requester) = gate(
            Platform::Android { api_level: 33 },
            vec![BlePermission::BluetoothScan, BlePermission::BluetoothConnect, BlePermission::AccessCoarseLocation],
        );
        assert!(full.request_ble_permissions().await);
        assert_eq!(requester.asked.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn other_platforms_are_not_prompted() {
        let (gate, requester) = gate(Platform::Other, vec![]);
        assert!(gate.request_ble_permissions().await);
        assert!(requester.asked.lock().unwrap().is_empty());
        assert!(AlwaysGranted.request_ble_permissions().await);
    }
}
