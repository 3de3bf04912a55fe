use std::time::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::adapter::{ConnectOptions, ScanOptions};
use crate::device::constants::SCAN_DEADLINE;
use crate::device::pairing::PairingMode;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub scan_duration_ms: u64,
    pub service_filters: Vec<Uuid>,
    pub allow_duplicates: bool,
    pub auto_reconnect: bool,
    pub pairing: PairingMode,
}

impl Config {
    pub fn scan_duration(&self) -> Duration {
        Duration::from_millis(self.scan_duration_ms)
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            services: self.service_filters.clone(),
            allow_duplicates: self.allow_duplicates,
        }
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            auto_reconnect: self.auto_reconnect,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            scan_duration_ms: SCAN_DEADLINE,
            service_filters: vec![],
            allow_duplicates: true,
            auto_reconnect: true,
            pairing: PairingMode::Platform,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let config: Config = serde_json::from_str(r#"{"pairing": "interactive"}"#).unwrap();
        assert_eq!(config.pairing, PairingMode::Interactive);
        assert_eq!(config.scan_duration(), Duration::from_secs(15));
        assert!(config.allow_duplicates);
        assert!(config.connect_options().auto_reconnect);
    }

    #[test]
    fn config_is_camel_case_json() {
        let config = Config {
            scan_duration_ms: 5000,
            service_filters: vec![Uuid::parse_str("bc2f4cc6-aaef-4351-9034-d66268e328f0").unwrap()],
            ..Config::default()
        };

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["scanDurationMs"], 5000);
        assert_eq!(json["serviceFilters"][0], "bc2f4cc6-aaef-4351-9034-d66268e328f0");
        assert_eq!(json["pairing"], "platform");

        let options = config.scan_options();
        assert_eq!(options.services.len(), 1);
    }
}
