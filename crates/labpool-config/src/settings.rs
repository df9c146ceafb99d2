//! Typed configuration built from the raw schema

use labpool_api::ResourceKind;
use labpool_util::{data_dir_without_env, socket_path_without_env, ResourceId};
use std::path::PathBuf;
use std::time::Duration;

use crate::schema::{RawConfig, RawResource};

/// Fully validated configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub service: ServiceSettings,
    pub defaults: SessionDefaults,
    pub resources: Vec<ResourceDef>,
}

/// Service-level settings with defaults applied
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub socket_path: PathBuf,
    pub data_dir: PathBuf,
    pub scan_interval: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            socket_path: socket_path_without_env(),
            data_dir: data_dir_without_env(),
            scan_interval: Duration::from_secs(DEFAULT_SCAN_INTERVAL_SECONDS),
        }
    }
}

/// Session duration defaults
#[derive(Debug, Clone, Copy)]
pub struct SessionDefaults {
    /// Planned minutes for sessions opened by queue promotion
    pub session_minutes: u32,
    /// Minutes added when an extension request does not specify a size
    pub extension_minutes: u32,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            session_minutes: DEFAULT_SESSION_MINUTES,
            extension_minutes: DEFAULT_EXTENSION_MINUTES,
        }
    }
}

pub const DEFAULT_SESSION_MINUTES: u32 = 60;
pub const DEFAULT_EXTENSION_MINUTES: u32 = 15;
pub const DEFAULT_SCAN_INTERVAL_SECONDS: u64 = 120;

/// A provisioned resource
#[derive(Debug, Clone)]
pub struct ResourceDef {
    pub id: ResourceId,
    pub name: String,
    pub address: String,
    pub kind: ResourceKind,
    pub maintenance: bool,
}

impl PoolConfig {
    /// Convert a validated raw config. Assumes `validate_config` passed,
    /// so kind strings parse.
    pub fn from_raw(raw: RawConfig) -> Self {
        let service = ServiceSettings {
            socket_path: raw
                .service
                .socket_path
                .unwrap_or_else(socket_path_without_env),
            data_dir: raw.service.data_dir.unwrap_or_else(data_dir_without_env),
            scan_interval: Duration::from_secs(
                raw.service
                    .scan_interval_seconds
                    .unwrap_or(DEFAULT_SCAN_INTERVAL_SECONDS),
            ),
        };

        let defaults = SessionDefaults {
            session_minutes: raw.defaults.session_minutes.unwrap_or(DEFAULT_SESSION_MINUTES),
            extension_minutes: raw
                .defaults
                .extension_minutes
                .unwrap_or(DEFAULT_EXTENSION_MINUTES),
        };

        let resources = raw.resources.into_iter().map(ResourceDef::from_raw).collect();

        Self {
            service,
            defaults,
            resources,
        }
    }
}

impl ResourceDef {
    fn from_raw(raw: RawResource) -> Self {
        Self {
            id: ResourceId::new(raw.id),
            name: raw.name,
            address: raw.address,
            kind: ResourceKind::parse(&raw.kind).unwrap_or(ResourceKind::Linux),
            maintenance: raw.maintenance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let raw: RawConfig = toml::from_str(
            r#"
            config_version = 1

            [[resources]]
            id = "linux-1"
            name = "Linux 1"
            address = "10.0.0.1"
            kind = "linux"
            "#,
        )
        .unwrap();

        let config = PoolConfig::from_raw(raw);
        assert_eq!(config.defaults.session_minutes, DEFAULT_SESSION_MINUTES);
        assert_eq!(config.defaults.extension_minutes, DEFAULT_EXTENSION_MINUTES);
        assert_eq!(
            config.service.scan_interval,
            Duration::from_secs(DEFAULT_SCAN_INTERVAL_SECONDS)
        );
        assert_eq!(config.resources[0].kind, ResourceKind::Linux);
        assert!(!config.resources[0].maintenance);
    }
}
