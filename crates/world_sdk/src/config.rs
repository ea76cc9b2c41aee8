//! Client Configuration
//!
//! Endpoints and world address, layered with `figment`:
//! built-in defaults, then an optional TOML file, then `WORLD_*`
//! environment variables (e.g. `WORLD_TORII_URL`).

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "WORLD_";

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file does not exist: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to load configuration: {0}")]
    Extract(#[from] figment::Error),

    #[error("Missing configuration value: {0}")]
    Missing(&'static str),
}

/// Connection settings of a world client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Chain JSON-RPC endpoint
    pub rpc_url: String,
    /// Indexer (torii) endpoint
    pub torii_url: String,
    /// Relay multiaddr
    pub relay_url: String,
    /// Address of the world contract
    pub world_address: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:5050".to_string(),
            torii_url: "http://localhost:8080".to_string(),
            relay_url: "/ip4/127.0.0.1/tcp/9090".to_string(),
            world_address: String::new(),
        }
    }
}

impl ClientConfig {
    /// The layered configuration sources
    pub fn figment(file: Option<&Path>) -> Result<Figment, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(ClientConfig::default()));
        if let Some(path) = file {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.to_path_buf()));
            }
            figment = figment.merge(Toml::file(path));
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX)))
    }

    /// Load from defaults, an optional TOML file and the environment
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(file)?)
    }

    /// Extract and validate from any figment
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject empty endpoints or world address
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("rpc_url", &self.rpc_url),
            ("torii_url", &self.torii_url),
            ("relay_url", &self.relay_url),
            ("world_address", &self.world_address),
        ];
        match fields.into_iter().find(|(_, value)| value.trim().is_empty()) {
            Some((name, _)) => Err(ConfigError::Missing(name)),
            None => Ok(()),
        }
    }

    /// Set the world address
    pub fn with_world_address(mut self, address: impl Into<String>) -> Self {
        self.world_address = address.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_need_world_address() {
        let err = ClientConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("world_address")));

        ClientConfig::default().with_world_address("0x1").validate().unwrap();
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("world.toml");
        std::fs::write(
            &path,
            r#"
torii_url = "https://torii.example"
world_address = "0xabc"
"#,
        )
        .unwrap();

        let figment = ClientConfig::figment(Some(&path)).unwrap();
        let config = ClientConfig::from_figment(figment).unwrap();
        assert_eq!(config.torii_url, "https://torii.example");
        assert_eq!(config.world_address, "0xabc");
        assert_eq!(config.rpc_url, ClientConfig::default().rpc_url);
    }

    #[test]
    fn test_later_layers_win() {
        let figment = Figment::from(Serialized::defaults(ClientConfig::default()))
            .merge(Serialized::default("world_address", "0x1"))
            .merge(Serialized::default("world_address", "0x2"));
        let config = ClientConfig::from_figment(figment).unwrap();
        assert_eq!(config.world_address, "0x2");
    }

    #[test]
    fn test_missing_file() {
        let result = ClientConfig::load(Some(Path::new("/nonexistent/world.toml")));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }
}
