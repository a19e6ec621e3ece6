//! Server bootstrap configuration.
//!
//! Everything the daemon needs before the catalog is open: where to
//! listen, where the data directory lives, how the VNC gateway is
//! exposed. Loaded from a small TOML file; all fields have defaults so
//! a missing file just means a default deployment.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default config file looked up next to the binary's working dir.
pub const DEFAULT_CONFIG_PATH: &str = "openidcs.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Operator API bind address.
    pub listen_addr: String,
    /// Data directory: catalog database, websockify.cfg.
    pub saving_root: String,
    /// VNC gateway port.
    pub vnc_web_port: u16,
    /// Static noVNC asset tree served by the gateway.
    pub vnc_web_root: String,
    /// Address operators reach this controller on; used in console URLs.
    pub advertise_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8010".to_string(),
            saving_root: "./DataSaving".to_string(),
            vnc_web_port: 6090,
            vnc_web_root: "./VNCConsole/Sources".to_string(),
            advertise_addr: "127.0.0.1".to_string(),
        }
    }
}

/// Load the config from `path`, or from [`DEFAULT_CONFIG_PATH`] when it
/// exists, or fall back to defaults.
pub fn load(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if !default.exists() {
                return Ok(ServerConfig::default());
            }
            default.to_path_buf()
        }
    };
    let text = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let config = load(None).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8010");
        assert_eq!(config.saving_root, "./DataSaving");
        assert_eq!(config.vnc_web_port, 6090);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("openidcs.toml");
        std::fs::write(&path, "listen_addr = \"127.0.0.1:9000\"\n").unwrap();
        let config = load(Some(&path)).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.vnc_web_port, 6090);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("openidcs.toml");
        std::fs::write(&path, "listen_addr = [not toml").unwrap();
        assert!(matches!(load(Some(&path)), Err(ConfigError::Parse(_))));
    }
}
