pub mod facade;
pub mod types;

pub use facade::{Controller, ControllerHandle, ControllerSettings};
pub use types::ControllerState;
