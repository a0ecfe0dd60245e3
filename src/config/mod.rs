//! Configuration module
//!
//! Handles loading and saving DroneLink configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::link::{LinkConfig, MacAddr};
use crate::protocol::{DEFAULT_DESTINATION, DEFAULT_REPLY_TIMEOUT_MS, ETHER_TYPE};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("No network interface configured (set link.interface or pass --interface)")]
    MissingInterface,
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Link-layer settings
    #[serde(default)]
    pub link: LinkSettings,
}

/// General configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
    /// Hide the command banner shown before each prompt
    #[serde(default)]
    pub quiet_banner: bool,
}

/// Link-layer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSettings {
    /// Interface frames are sent on
    pub interface: Option<String>,
    /// Destination hardware address
    #[serde(default = "default_destination")]
    pub destination: MacAddr,
    /// EtherType identifying the drone protocol
    #[serde(default = "default_ether_type")]
    pub ether_type: u16,
    /// Reply timeout in ms
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout_ms: u64,
}

fn default_destination() -> MacAddr {
    MacAddr(DEFAULT_DESTINATION)
}

fn default_ether_type() -> u16 {
    ETHER_TYPE
}

fn default_reply_timeout() -> u64 {
    DEFAULT_REPLY_TIMEOUT_MS
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            interface: None,
            destination: default_destination(),
            ether_type: default_ether_type(),
            reply_timeout_ms: default_reply_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("dronelink/config.toml")),
            Some(PathBuf::from("./dronelink.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Resolve the settings the transport needs
    pub fn link_config(&self) -> ConfigResult<LinkConfig> {
        let interface = self
            .link
            .interface
            .clone()
            .filter(|name| !name.trim().is_empty())
            .ok_or(ConfigError::MissingInterface)?;

        Ok(LinkConfig {
            interface,
            destination: self.link.destination,
            ether_type: self.link.ether_type,
            reply_timeout: Duration::from_millis(self.link.reply_timeout_ms),
        })
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        link: LinkSettings {
            interface: Some("eth0".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };

    Ok(toml::to_string_pretty(&config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.link.ether_type, 0x1234);
        assert_eq!(config.link.reply_timeout_ms, 5000);
        assert_eq!(config.link.destination.to_string(), "00:04:00:00:00:00");
    }

    #[test]
    fn test_save_and_load() {
        let mut config = Config::default();
        config.link.interface = Some("veth0-1".to_string());
        let file = NamedTempFile::new().unwrap();

        config.save(file.path()).unwrap();

        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded.link.interface.as_deref(), Some("veth0-1"));
        assert_eq!(loaded.link.destination, config.link.destination);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [link]
            interface = "enx0c37965f89ec"
            destination = "ff:ff:ff:ff:ff:ff"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.link.destination, MacAddr([0xff; 6]));
        assert_eq!(parsed.link.reply_timeout_ms, DEFAULT_REPLY_TIMEOUT_MS);
        assert!(!parsed.general.verbose);
    }

    #[test]
    fn test_bad_destination_is_a_parse_error() {
        let parsed = toml::from_str::<Config>("[link]\ndestination = \"not-a-mac\"\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = Config::load(Path::new("/nonexistent/dronelink.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_link_config_requires_interface() {
        let mut config = Config::default();
        assert!(matches!(
            config.link_config(),
            Err(ConfigError::MissingInterface)
        ));

        config.link.interface = Some("eth1".to_string());
        config.link.reply_timeout_ms = 250;
        let link = config.link_config().unwrap();
        assert_eq!(link.interface, "eth1");
        assert_eq!(link.reply_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_sample_config() {
        let sample = generate_sample_config().unwrap();
        let parsed: Config = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.link.interface.as_deref(), Some("eth0"));
    }
}
