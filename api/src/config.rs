// ./api/src/config.rs
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_STORE_PATH: &str = "schemas.json";

/// Where the schema mapping lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// One file holding the whole mapping.
    File(PathBuf),
    /// Process-local, nothing persisted.
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub backend: StoreBackend,
}

impl Config {
    /// Reads `PORT`, `SCHEMA_STORE_BACKEND` and `SCHEMA_STORE_PATH`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with a custom variable source. Invalid values
    /// fall back to defaults with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let port = match lookup("PORT") {
            Some(port_str) => match u16::from_str(port_str.trim()) {
                Ok(port_num) => {
                    info!("Using port {} from environment variable PORT.", port_num);
                    port_num
                }
                Err(_) => {
                    warn!(
                        "Invalid PORT value '{}' in environment variable. Using default port {}.",
                        port_str, DEFAULT_PORT
                    );
                    DEFAULT_PORT
                }
            },
            None => {
                info!(
                    "PORT environment variable not set. Using default port {}.",
                    DEFAULT_PORT
                );
                DEFAULT_PORT
            }
        };

        let store_path = lookup("SCHEMA_STORE_PATH")
            .map(|path| path.trim().to_string())
            .filter(|path| !path.is_empty())
            .unwrap_or_else(|| DEFAULT_STORE_PATH.to_string());

        let backend = match lookup("SCHEMA_STORE_BACKEND")
            .map(|value| value.trim().to_ascii_lowercase())
            .as_deref()
        {
            None | Some("") | Some("file") => StoreBackend::File(PathBuf::from(store_path)),
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                warn!(
                    "Unknown SCHEMA_STORE_BACKEND '{}'. Falling back to file store at '{}'.",
                    other, store_path
                );
                StoreBackend::File(PathBuf::from(store_path))
            }
        };

        Self { port, backend }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = config_from(&[]);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(
            config.backend,
            StoreBackend::File(PathBuf::from(DEFAULT_STORE_PATH))
        );
    }

    #[test]
    fn reads_port_and_path() {
        let config = config_from(&[("PORT", "8081"), ("SCHEMA_STORE_PATH", "/data/s.json")]);
        assert_eq!(config.port, 8081);
        assert_eq!(config.backend, StoreBackend::File(PathBuf::from("/data/s.json")));
    }

    #[test]
    fn invalid_port_falls_back() {
        assert_eq!(config_from(&[("PORT", "http")]).port, DEFAULT_PORT);
    }

    #[test]
    fn memory_backend() {
        let config = config_from(&[("SCHEMA_STORE_BACKEND", "Memory")]);
        assert_eq!(config.backend, StoreBackend::Memory);
    }

    #[test]
    fn unknown_backend_uses_file() {
        let config = config_from(&[("SCHEMA_STORE_BACKEND", "sled")]);
        assert_eq!(
            config.backend,
            StoreBackend::File(PathBuf::from(DEFAULT_STORE_PATH))
        );
    }
}
