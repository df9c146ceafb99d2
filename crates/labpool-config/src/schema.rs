//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Global service settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// Session duration defaults
    #[serde(default)]
    pub defaults: RawDefaults,

    /// Provisioned resources
    #[serde(default)]
    pub resources: Vec<RawResource>,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// IPC socket path (default: XDG runtime dir)
    pub socket_path: Option<PathBuf>,

    /// Data directory for the store
    pub data_dir: Option<PathBuf>,

    /// Seconds between expiry scans
    pub scan_interval_seconds: Option<u64>,
}

/// Session duration defaults
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawDefaults {
    /// Planned minutes for sessions opened by queue promotion
    pub session_minutes: Option<u32>,

    /// Minutes added by an extension when the caller does not say
    pub extension_minutes: Option<u32>,
}

/// Raw resource definition
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawResource {
    /// Unique stable ID
    pub id: String,

    /// Display name (unique)
    pub name: String,

    /// Network address (unique)
    pub address: String,

    /// Machine kind: "windows", "ubuntu", "linux", "macos"
    pub kind: String,

    /// Start in maintenance instead of available
    #[serde(default)]
    pub maintenance: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
            config_version = 1

            [service]
            scan_interval_seconds = 120

            [defaults]
            session_minutes = 45
            extension_minutes = 10

            [[resources]]
            id = "windows-242"
            name = "Windows 242"
            address = "10.0.0.242"
            kind = "windows"
            maintenance = true
        "#;

        let config: RawConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.resources.len(), 1);
        assert!(config.resources[0].maintenance);
        assert_eq!(config.service.scan_interval_seconds, Some(120));
        assert_eq!(config.defaults.session_minutes, Some(45));
    }
}
