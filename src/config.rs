//! Configuration loading, validation, and path resolution.
//!
//! Mirrors the teacher's flat `config.rs`: a single `Deserialize` struct
//! loaded from TOML, a separate `validate` pass for cross-field checks
//! `serde` can't express, and a `resolve_config_path` helper that handles
//! the `-c`/`--config` CLI flag the way `main.rs` does.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
}

/// Persistence backend selection and endpoints (spec.md §6 env/config table).
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Persistence strategy: `raw`, `packed`, or `sql`.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Root of file-backed persistence (`raw`/`packed` backends).
    #[serde(default = "default_dir")]
    pub dir: String,
    /// Suffix for per-object files (`raw`/`packed` backends).
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Path of the account-name index (DBM file or SQLite database).
    #[serde(default = "default_storage_path")]
    pub storage_path: String,
    /// SQL endpoint, used only when `backend = "sql"`.
    #[serde(default)]
    pub mysql_host: Option<String>,
    #[serde(default)]
    pub mysql_port: Option<u16>,
    #[serde(default)]
    pub mysql_user: Option<String>,
    #[serde(default)]
    pub mysql_passwd: Option<String>,
}

fn default_backend() -> String {
    "raw".to_string()
}

fn default_dir() -> String {
    "databases".to_string()
}

fn default_extension() -> String {
    "db".to_string()
}

fn default_storage_path() -> String {
    "game-accounts.db".to_string()
}

/// Listen endpoints and cluster identity.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Selects a NameMaster file and, for the SQL backend, a
    /// language-prefixed database.
    #[serde(default = "default_language")]
    pub language: String,
    /// Client Agent TCP listen port.
    #[serde(default = "default_ca_port")]
    pub ca_port: u16,
    /// Message Director TCP listen port.
    pub md_port: u16,
    /// Event-log UDP listen port.
    #[serde(default = "default_eventlog_port")]
    pub eventlog_port: u16,
    /// Prometheus metrics HTTP port; `0` disables the metrics server.
    #[serde(default)]
    pub metrics_port: u16,
    /// Structured-logging output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Tracing output format, selected once at startup.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

fn default_language() -> String {
    "english".to_string()
}

fn default_ca_port() -> u16 {
    6667
}

fn default_eventlog_port() -> u16 {
    4343
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// A single cross-field configuration problem (not expressible via `serde`
/// defaults/required-field checks alone).
#[derive(Debug, Error)]
pub enum ConfigValidationError {
    #[error("database.backend must be one of raw, packed, sql (got {0:?})")]
    UnknownBackend(String),
    #[error("database.backend = \"sql\" requires mysql_host to be set")]
    MissingMysqlHost,
    #[error("server.md_port and server.ca_port must differ")]
    PortCollision,
}

/// Validate cross-field invariants the struct's own defaults can't enforce.
pub fn validate(config: &Config) -> Result<(), Vec<ConfigValidationError>> {
    let mut errors = Vec::new();

    match config.database.backend.as_str() {
        "raw" | "packed" | "sql" => {}
        other => errors.push(ConfigValidationError::UnknownBackend(other.to_string())),
    }

    if config.database.backend == "sql" && config.database.mysql_host.is_none() {
        errors.push(ConfigValidationError::MissingMysqlHost);
    }

    if config.server.md_port == config.server.ca_port {
        errors.push(ConfigValidationError::PortCollision);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Resolve the config file path from CLI args, honouring `-c`/`--config`
/// and falling back to `config.toml` when no path is given.
pub fn resolve_config_path() -> String {
    let mut args = std::env::args().skip(1);

    let raw_path = match args.next() {
        Some(flag) if flag == "-c" || flag == "--config" => args.next().unwrap_or_else(|| {
            eprintln!("Missing path after {}", flag);
            std::process::exit(1);
        }),
        Some(path) => path,
        None => "config.toml".to_string(),
    };

    match std::fs::canonicalize(Path::new(&raw_path)) {
        Ok(p) => p.to_string_lossy().into_owned(),
        Err(_) => raw_path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Config {
        toml::from_str(toml_str).expect("config should parse")
    }

    #[test]
    fn minimal_config_fills_in_defaults() {
        let config = parse(
            r#"
            [database]
            [server]
            md_port = 7100
            "#,
        );
        assert_eq!(config.database.backend, "raw");
        assert_eq!(config.server.ca_port, 6667);
        assert_eq!(config.server.eventlog_port, 4343);
        assert_eq!(config.server.md_port, 7100);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn sql_backend_without_host_fails_validation() {
        let config = parse(
            r#"
            [database]
            backend = "sql"
            [server]
            md_port = 7100
            "#,
        );
        let errors = validate(&config).unwrap_err();
        assert!(matches!(
            errors[0],
            ConfigValidationError::MissingMysqlHost
        ));
    }

    #[test]
    fn unknown_backend_fails_validation() {
        let config = parse(
            r#"
            [database]
            backend = "mongo"
            [server]
            md_port = 7100
            "#,
        );
        let errors = validate(&config).unwrap_err();
        assert!(matches!(errors[0], ConfigValidationError::UnknownBackend(ref b) if b == "mongo"));
    }

    #[test]
    fn colliding_ports_fail_validation() {
        let config = parse(
            r#"
            [database]
            [server]
            md_port = 6667
            "#,
        );
        let errors = validate(&config).unwrap_err();
        assert!(matches!(errors[0], ConfigValidationError::PortCollision));
    }
}
