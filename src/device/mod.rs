pub mod adapter;
pub mod btle;
pub mod connection;
pub mod constants;
pub mod pairing;
pub mod permission;
pub mod registry;
pub mod scan;
pub mod types;
