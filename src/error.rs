use std::any::Any;
use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use serde::{Serialize, Serializer};
use btleplug;
use serde_json;
use futures::channel::mpsc::SendError;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start application (bluetooth): {source}")]
    Adapter { #[from] source: AdapterError },

    #[error("{source}")]
    Controller { #[from] source: ControllerError },

    #[error("Failed to read from the terminal: {source}")]
    Terminal { #[from] source: io::Error },
}

/// Failures reported by a [`crate::device::adapter::RadioAdapter`].
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No bluetooth adapter is available on this system")]
    NoAdapter,

    #[error("Device {0} is not known to the adapter")]
    UnknownDevice(String),

    #[error("{0}")]
    Rejected(String),

    #[error("{0} took too long")]
    Timeout(&'static str),

    #[error("The bluetooth adapter has been released")]
    Released,
}

impl AdapterError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, AdapterError::Btle { source: btleplug::Error::PermissionDenied })
    }
}

/// Errors surfaced by the controller facade. These end up in `last_error`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    #[error("Not allowed to access Bluetooth")]
    PermissionDenied,

    #[error("Scanning failed: {reason}")]
    ScanFailed { reason: String },

    #[error("The device failed to connect: {reason}")]
    ConnectionFailed { reason: String },

    #[error("The device failed to remove the connection: {reason}")]
    DisconnectFailed { reason: String },

    #[error("Another connection attempt is in progress")]
    Busy,

    #[error("Device {0} has not been discovered")]
    UnknownDevice(String),

    #[error("The controller has been shut down")]
    Closed,
}

impl From<SendError> for ControllerError {
    fn from(_: SendError) -> Self {
        ControllerError::Closed
    }
}

impl Serialize for ControllerError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.to_string().as_ref())
    }
}

pub fn readable_thread_panic_error(error: &Box<dyn Any + Send + 'static>) -> String {
    let mut stringified = String::from("???");

    if let Some(s) = error.downcast_ref::<&str>() {
        stringified = format!("{}", s);
    }
    else if let Some(s) = error.downcast_ref::<String>() {
        stringified = format!("{}", s);
    }

    format!("panic from task: [{}]", stringified)
}
