use std::sync::Arc;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::device::types::Device;

/// Blocking accept/cancel confirmation shown before bonding with a peripheral.
#[async_trait]
pub trait PairingPrompt: Send + Sync {
    /// Returns true if the user accepted.
    async fn confirm(&self, device: &Device) -> bool;
}

#[derive(Clone)]
pub enum PairingPolicy {
    /// The OS pairs on its own while connecting; nothing to ask and no explicit bond.
    Automatic,
    /// The user must consent, after which the adapter is asked to bond.
    Interactive(Arc<dyn PairingPrompt>),
}

impl PairingPolicy {
    pub fn for_current_platform(prompt: Arc<dyn PairingPrompt>) -> Self {
        PairingMode::Platform.policy(prompt)
    }

    /// Whether bonds are managed explicitly (created on connect, removed on disconnect).
    pub fn uses_explicit_bond(&self) -> bool {
        matches!(self, PairingPolicy::Interactive(_))
    }

    pub async fn request(&self, device: &Device) -> bool {
        match self {
            PairingPolicy::Automatic => true,
            PairingPolicy::Interactive(prompt) => prompt.confirm(device).await,
        }
    }
}

impl std::fmt::Debug for PairingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PairingPolicy::Automatic => write!(f, "Automatic"),
            PairingPolicy::Interactive(_) => write!(f, "Interactive"),
        }
    }
}

/// Configurable selection of a [`PairingPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PairingMode {
    #[default]
    Platform,
    Automatic,
    Interactive,
}

impl PairingMode {
    pub fn policy(&self, prompt: Arc<dyn PairingPrompt>) -> PairingPolicy {
        match self {
            PairingMode::Automatic => PairingPolicy::Automatic,
            PairingMode::Interactive => PairingPolicy::Interactive(prompt),
            PairingMode::Platform if cfg!(target_os = "android") => PairingPolicy::Interactive(prompt),
            PairingMode::Platform => PairingPolicy::Automatic,
        }
    }
}
