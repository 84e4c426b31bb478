// src/settings.rs
//
// Optional bridge settings read from `silabs-pti.toml` in the EXTCAP_LOC
// directory. Every field has a default so a partial (or absent) file works.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::io::debug_channel::DEBUG_CHANNEL_PORT;
use crate::logging::Logger;

pub const SETTINGS_FILE_NAME: &str = "silabs-pti.toml";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BridgeSettings {
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    #[serde(default = "default_discovery_window_ms")]
    pub discovery_window_ms: u64,
    #[serde(default = "default_discovery_broadcast")]
    pub discovery_broadcast: String, // address the request is sent to
    #[serde(default = "default_debug_channel_port")]
    pub debug_channel_port: u16,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Originator id stamped on messages; the interface id when unset
    #[serde(default)]
    pub originator_id: Option<String>,
    #[serde(default = "default_snaplen")]
    pub snaplen: u32,
}

fn default_discovery_port() -> u16 {
    4920
}
fn default_discovery_window_ms() -> u64 {
    1500
}
fn default_discovery_broadcast() -> String {
    "255.255.255.255".to_string()
}
fn default_debug_channel_port() -> u16 {
    DEBUG_CHANNEL_PORT
}
fn default_connect_timeout_ms() -> u64 {
    3000
}
fn default_snaplen() -> u32 {
    65535
}

impl Default for BridgeSettings {
    fn default() -> Self {
        BridgeSettings {
            discovery_port: default_discovery_port(),
            discovery_window_ms: default_discovery_window_ms(),
            discovery_broadcast: default_discovery_broadcast(),
            debug_channel_port: default_debug_channel_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            originator_id: None,
            snaplen: default_snaplen(),
        }
    }
}

impl BridgeSettings {
    pub fn discovery_window(&self) -> Duration {
        Duration::from_millis(self.discovery_window_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Parse settings from TOML text.
pub fn parse_settings(content: &str) -> Result<BridgeSettings, String> {
    toml::from_str(content).map_err(|e| format!("Failed to parse settings: {}", e))
}

/// Load settings from `dir`, falling back to defaults.
///
/// A missing file is normal. An unreadable or unparseable one is logged and
/// ignored.
pub fn load_settings(dir: Option<&Path>, log: &Logger) -> BridgeSettings {
    let Some(dir) = dir else {
        return BridgeSettings::default();
    };
    let path = dir.join(SETTINGS_FILE_NAME);
    if !path.exists() {
        return BridgeSettings::default();
    }

    let loaded = std::fs::read_to_string(&path)
        .map_err(|e| format!("Failed to read settings: {}", e))
        .and_then(|content| parse_settings(&content));

    match loaded {
        Ok(settings) => {
            tlog!(log, "[settings] Loaded {}", path.display());
            settings
        }
        Err(e) => {
            twarn!(log, "[settings] {} ({}), using defaults", e, path.display());
            BridgeSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings = parse_settings("discovery_window_ms = 250\noriginator_id = \"lab-bench\"\n")
            .unwrap();
        assert_eq!(settings.discovery_window(), Duration::from_millis(250));
        assert_eq!(settings.originator_id.as_deref(), Some("lab-bench"));
        assert_eq!(settings.discovery_port, 4920);
        assert_eq!(settings.debug_channel_port, 4905);
        assert_eq!(settings.snaplen, 65535);
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(parse_settings("").unwrap(), BridgeSettings::default());
    }

    #[test]
    fn test_bad_file_logged_and_ignored() {
        let dir = std::env::temp_dir().join(format!("pti-extcap-settings-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(SETTINGS_FILE_NAME), "discovery_port = \"nope\"").unwrap();

        let log = Logger::capture();
        let settings = load_settings(Some(&dir), &log);

        assert_eq!(settings, BridgeSettings::default());
        assert!(log.captured()[0].contains("[WARN]"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_no_location_is_default() {
        let log = Logger::capture();
        assert_eq!(load_settings(None, &log), BridgeSettings::default());
        assert!(log.captured().is_empty());
    }
}
