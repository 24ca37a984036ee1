// ============================
// relay-backend/src/config.rs
// ============================
//! Configuration management.
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "relay.toml";
/// Prefix of environment overrides, e.g. `RELAY_BIND_ADDR`, `RELAY_STORAGE__KIND`
pub const ENV_PREFIX: &str = "RELAY_";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Log level used when `RUST_LOG` is unset
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
    /// Persistence backend
    pub storage: StorageSettings,
    /// Frames queued per connection before new ones are dropped
    pub outbound_buffer: usize,
    /// Largest accepted inbound frame in bytes
    pub max_message_bytes: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    Memory,
    FlatFile,
}

/// Storage settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageSettings {
    pub kind: StorageKind,
    /// Root directory of the flat-file backend
    pub path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 4000)),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            storage: StorageSettings::default(),
            outbound_buffer: 64,
            max_message_bytes: 64 * 1024,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            kind: StorageKind::Memory,
            path: PathBuf::from("data"),
        }
    }
}

impl Settings {
    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load from `relay.toml` (if present) and `RELAY_*` variables
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from an explicit TOML file (if present) and `RELAY_*` variables
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings: Settings = Self::figment(path.as_ref()).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            bail!("invalid log level: {}", self.log_level);
        }
        if self.outbound_buffer == 0 {
            bail!("outbound_buffer must be greater than zero");
        }
        if self.max_message_bytes == 0 {
            bail!("max_message_bytes must be greater than zero");
        }
        if self.storage.kind == StorageKind::FlatFile && self.storage.path.as_os_str().is_empty() {
            bail!("storage.path must be set for the flat_file backend");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_settings_validation() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());

        let mut invalid_settings = settings.clone();
        invalid_settings.log_level = "loud".to_string();
        assert!(invalid_settings.validate().is_err());

        let mut invalid_settings = settings.clone();
        invalid_settings.outbound_buffer = 0;
        assert!(invalid_settings.validate().is_err());

        let mut invalid_settings = settings.clone();
        invalid_settings.storage = StorageSettings {
            kind: StorageKind::FlatFile,
            path: PathBuf::new(),
        };
        assert!(invalid_settings.validate().is_err());
    }

    #[test]
    fn test_defaults_without_file() {
        Jail::expect_with(|_jail| {
            let settings = Settings::load().map_err(|e| e.to_string())?;
            assert_eq!(settings, Settings::default());
            Ok(())
        });
    }

    #[test]
    fn test_file_and_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                    bind_addr = "0.0.0.0:9000"
                    log_level = "debug"

                    [storage]
                    kind = "flat_file"
                    path = "/var/lib/relay"
                "#,
            )?;
            jail.set_env("RELAY_LOG_LEVEL", "warn");
            jail.set_env("RELAY_STORAGE__PATH", "/tmp/relay");

            let settings = Settings::load().map_err(|e| e.to_string())?;
            assert_eq!(settings.bind_addr.to_string(), "0.0.0.0:9000");
            assert_eq!(settings.log_level, "warn");
            assert_eq!(settings.storage.kind, StorageKind::FlatFile);
            assert_eq!(settings.storage.path, PathBuf::from("/tmp/relay"));
            assert_eq!(settings.outbound_buffer, 64);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("custom.toml", r#"outbound_buffer = 0"#)?;
            assert!(Settings::load_from("custom.toml").is_err());
            Ok(())
        });
    }
}
