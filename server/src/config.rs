//! Configuration management for the server.

use std::env;
use std::path::PathBuf;

/// Which storage engine backs the offline store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// One SQLite file per store under `data_dir`
    Sqlite,
    /// Process memory; everything is lost on exit
    Memory,
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    pub storage: StorageKind,
    /// Directory holding SQLite files
    pub data_dir: PathBuf,
    /// Name of the offline database
    pub store_name: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());

        let port = match lookup("PORT") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidPort(raw))?,
            None => 4100,
        };

        let storage = match lookup("FLORA_STORAGE").as_deref() {
            None | Some("sqlite") => StorageKind::Sqlite,
            Some("memory") => StorageKind::Memory,
            Some(other) => return Err(ConfigError::InvalidStorage(other.to_string())),
        };

        let data_dir = lookup("FLORA_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data"));

        let store_name = lookup("FLORA_STORE_NAME")
            .unwrap_or_else(|| flora_engine::STORE_NAME.to_string());
        if store_name.is_empty() {
            return Err(ConfigError::EmptyStoreName);
        }

        Ok(Self {
            host,
            port,
            storage,
            data_dir,
            store_name,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid PORT value: {0}")]
    InvalidPort(String),

    #[error("FLORA_STORAGE must be `sqlite` or `memory`, got `{0}`")]
    InvalidStorage(String),

    #[error("FLORA_STORE_NAME must not be empty")]
    EmptyStoreName,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 4100);
        assert_eq!(config.storage, StorageKind::Sqlite);
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.store_name, "flora-ledger");
    }

    #[test]
    fn overrides() {
        let config = load(&[
            ("PORT", "8080"),
            ("FLORA_STORAGE", "memory"),
            ("FLORA_DATA_DIR", "/var/lib/flora"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.storage, StorageKind::Memory);
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/flora"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert_eq!(
            load(&[("PORT", "eighty")]).unwrap_err(),
            ConfigError::InvalidPort("eighty".into())
        );
        assert_eq!(
            load(&[("FLORA_STORAGE", "indexeddb")]).unwrap_err(),
            ConfigError::InvalidStorage("indexeddb".into())
        );
        assert_eq!(
            load(&[("FLORA_STORE_NAME", "")]).unwrap_err(),
            ConfigError::EmptyStoreName
        );
    }
}
