//! Configuration (spec.md §6): typed config loaded from YAML, then
//! overridden by five environment variables. The keys below are the ones
//! this crate's core recognizes; the config loader itself (finding which
//! file to read, merging multiple sources) is an external concern this
//! crate only consumes the result of.
//!
//! Three additional knobs — `connection_timeout`, `idle_timeout` (already
//! used here) and `max_lifetime` — belong to a separate outbound
//! connection-pool component that is out of scope for this server (spec.md
//! §1/§5); they are named here only so a future pool implementation has
//! somewhere obvious to read them from.

use std::collections::HashMap;
use std::fs;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub authentication: AuthenticationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Mirrors `original_source`'s `development.debug`; not one of the
    /// dotted keys spec.md §6 lists under `logging`/`connection`, but the
    /// CLI's `--debug` flag and `HCHDB_DEBUG` both need somewhere to land.
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub ports: PortsConfig,
    #[serde(default = "default_server_version")]
    pub server_version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            ports: PortsConfig::default(),
            server_version: default_server_version(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PortsConfig {
    #[serde(default = "default_mysql_port")]
    pub mysql: u16,
    #[serde(default = "default_management_port")]
    pub management: u16,
    #[serde(default = "default_internal_port")]
    pub internal: u16,
    #[serde(default = "default_xprotocol_port")]
    pub xprotocol: u16,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            mysql: default_mysql_port(),
            management: default_management_port(),
            internal: default_internal_port(),
            xprotocol: default_xprotocol_port(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub pool: PoolConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PoolConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Seconds of inactivity before the reaper closes a connection.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    /// Not read by this crate — documented for the outbound pool component.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    /// Not read by this crate — documented for the outbound pool component.
    #[serde(default)]
    pub max_lifetime: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            idle_timeout: default_idle_timeout(),
            connection_timeout: default_connection_timeout(),
            max_lifetime: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AuthenticationConfig {
    #[serde(default)]
    pub users: HashMap<String, UserConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct UserConfig {
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_server_version() -> String {
    "8.0.0-hchdb".to_string()
}
fn default_mysql_port() -> u16 {
    3306
}
fn default_management_port() -> u16 {
    3307
}
fn default_internal_port() -> u16 {
    3308
}
fn default_xprotocol_port() -> u16 {
    33060
}
fn default_max_connections() -> u32 {
    1000
}
fn default_idle_timeout() -> u64 {
    300
}
fn default_connection_timeout() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            connection: ConnectionConfig::default(),
            authentication: AuthenticationConfig::default(),
            logging: LoggingConfig::default(),
            debug: false,
        }
    }
}

impl AppConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        if !std::path::Path::new(path).exists() {
            return Err(ConfigError::NotFound(path.to_string()));
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let config: AppConfig = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
        Ok(config)
    }

    /// Applies the five `HCHDB_*` environment variables over whatever was
    /// loaded from file, in the same precedence the system this crate is
    /// modeled on uses: file first, then environment.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("HCHDB_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("HCHDB_MYSQL_PORT") {
            if let Ok(port) = port.parse() {
                self.server.ports.mysql = port;
            }
        }
        if let Ok(level) = std::env::var("HCHDB_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(max) = std::env::var("HCHDB_MAX_CONNECTIONS") {
            if let Ok(max) = max.parse() {
                self.connection.pool.max_connections = max;
            }
        }
        if let Ok(debug) = std::env::var("HCHDB_DEBUG") {
            self.debug = matches!(debug.to_lowercase().as_str(), "true" | "1" | "yes" | "on");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.ports.mysql, 3306);
        assert_eq!(config.server.ports.management, 3307);
        assert_eq!(config.server.ports.internal, 3308);
        assert_eq!(config.server.ports.xprotocol, 33060);
        assert_eq!(config.server.server_version, "8.0.0-hchdb");
        assert_eq!(config.connection.pool.max_connections, 1000);
        assert_eq!(config.connection.pool.idle_timeout, 300);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn loads_nested_yaml() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  server_version: "8.0.34-hchdb"
  ports:
    mysql: 13306
connection:
  pool:
    max_connections: 50
    idle_timeout: 60
authentication:
  users:
    root:
      password: ""
    analyst:
      password: "s3cret"
logging:
  level: "debug"
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.ports.mysql, 13306);
        assert_eq!(config.server.ports.management, 3307); // default, not overridden
        assert_eq!(config.connection.pool.max_connections, 50);
        assert_eq!(config.authentication.users.len(), 2);
        assert_eq!(config.authentication.users["analyst"].password, "s3cret");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn missing_file_is_reported_not_found() {
        let err = AppConfig::load("/nonexistent/path/to/hchdb.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn invalid_yaml_fails_to_parse() {
        let yaml = "server: [this is not a mapping";
        let result: Result<AppConfig, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err());
    }

    #[test]
    fn env_overrides_apply_over_file_values() {
        std::env::set_var("HCHDB_HOST", "10.0.0.5");
        std::env::set_var("HCHDB_MAX_CONNECTIONS", "42");
        std::env::set_var("HCHDB_DEBUG", "true");

        let mut config = AppConfig::default();
        config.apply_env_overrides();

        assert_eq!(config.server.host, "10.0.0.5");
        assert_eq!(config.connection.pool.max_connections, 42);
        assert!(config.debug);

        std::env::remove_var("HCHDB_HOST");
        std::env::remove_var("HCHDB_MAX_CONNECTIONS");
        std::env::remove_var("HCHDB_DEBUG");
    }
}
