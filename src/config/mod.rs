//! Configuration management.
//!
//! reqchain configuration can come from:
//! - Environment variables (REQCHAIN_*)
//! - Config file (~/.config/reqchain/config.toml)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// reqchain configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Chain engine limits and HTTP client settings
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Server-wide cap on links per chain, applied on top of each
    /// chain's own `maxChainLength`.
    #[serde(default = "default_max_chain_length")]
    pub max_chain_length: usize,

    /// TCP connect timeout for outbound link requests (seconds)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// User-Agent header sent with every link request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_chain_length: default_max_chain_length(),
            connect_timeout_seconds: default_connect_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_max_chain_length() -> usize {
    100
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_user_agent() -> String {
    format!("reqchain/{}", env!("CARGO_PKG_VERSION"))
}

impl Config {
    /// Load configuration from default locations.
    pub fn load() -> Self {
        let mut config = Self::default();

        let path = Self::config_dir().join("config.toml");
        if let Ok(partial) = Self::load_partial_from_path(&path) {
            config.apply_partial(partial);
        }

        config.apply_env_overrides();
        config
    }

    /// Get the data directory.
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .map(|d| d.join("reqchain"))
            .unwrap_or_else(|| PathBuf::from(".reqchain"))
    }

    /// Get the config directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("reqchain"))
            .unwrap_or_else(|| PathBuf::from(".reqchain"))
    }

    /// Resolved database path (configured or the default under the data dir).
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("reqchain.db"))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("REQCHAIN_SERVER_PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                self.server.port = parsed;
            }
        }
        if let Some(host) = lookup("REQCHAIN_SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(path) = lookup("REQCHAIN_DATABASE_PATH") {
            self.storage.database_path = Some(PathBuf::from(path));
        }
        if let Some(max) = lookup("REQCHAIN_MAX_CHAIN_LENGTH") {
            if let Ok(parsed) = max.parse::<usize>() {
                self.engine.max_chain_length = parsed;
            }
        }
        if let Some(timeout) = lookup("REQCHAIN_CONNECT_TIMEOUT_SECONDS") {
            if let Ok(parsed) = timeout.parse::<u64>() {
                self.engine.connect_timeout_seconds = parsed;
            }
        }
        if let Some(agent) = lookup("REQCHAIN_USER_AGENT") {
            self.engine.user_agent = agent;
        }
    }

    fn load_partial_from_path(path: &Path) -> std::result::Result<PartialConfig, ()> {
        let content = std::fs::read_to_string(path).map_err(|_| ())?;
        toml::from_str(&content).map_err(|_| ())
    }

    fn apply_partial(&mut self, partial: PartialConfig) {
        if let Some(server) = partial.server {
            self.server = server;
        }
        if let Some(storage) = partial.storage {
            self.storage = storage;
        }
        if let Some(engine) = partial.engine {
            self.engine = engine;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    server: Option<ServerConfig>,
    storage: Option<StorageConfig>,
    engine: Option<EngineConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.engine.max_chain_length, 100);
        assert!(config.engine.user_agent.starts_with("reqchain/"));
    }

    #[test]
    fn test_partial_toml_keeps_other_sections() {
        let partial: PartialConfig = toml::from_str(
            r#"
[server]
port = 9090

[engine]
max_chain_length = 7
"#,
        )
        .unwrap();

        let mut config = Config::default();
        config.apply_partial(partial);
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.engine.max_chain_length, 7);
        assert_eq!(config.engine.connect_timeout_seconds, 10);
        assert!(config.storage.database_path.is_none());
    }

    #[test]
    fn test_overrides_ignore_unparseable_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("REQCHAIN_SERVER_PORT", "not-a-port"),
            ("REQCHAIN_SERVER_HOST", "0.0.0.0"),
            ("REQCHAIN_MAX_CHAIN_LENGTH", "12"),
            ("REQCHAIN_DATABASE_PATH", "/tmp/chains.db"),
        ]);

        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.engine.max_chain_length, 12);
        assert_eq!(config.database_path(), PathBuf::from("/tmp/chains.db"));
    }
}
