use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::AppError;

/// Prefix for environment overrides, e.g. `VISIT_COUNTER__STORE__URI`.
pub const ENV_PREFIX: &str = "VISIT_COUNTER";

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_NAME: &str = "visit-counter";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub tracing: TracingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub request_timeout_secs: u64,
    pub drain_timeout_secs: u64,
    /// Time a client gets to send complete request headers
    pub read_timeout_secs: u64,
    /// Keep-alive connections with no request for this long are closed
    pub idle_timeout_secs: u64,
    #[serde(default)]
    pub template_path: Option<PathBuf>,
    /// Treat request-level store/render failures as fatal to the process.
    pub strict: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    pub enabled: bool,
    pub backend: StoreBackendKind,
    pub uri: String,
    pub database: String,
    pub collection: String,
    pub document_id: String,
    pub operation_timeout_ms: u64,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackendKind {
    Mongodb,
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TracingConfig {
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl ServerConfig {
    /// Parse `listen_addr`; a bare `:port` listens on every interface.
    pub fn socket_addr(&self) -> Result<SocketAddr, AppError> {
        let addr = match self.listen_addr.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{}", port),
            None => self.listen_addr.clone(),
        };
        addr.parse().map_err(|e| {
            AppError::Config(format!("invalid listen address '{}': {}", self.listen_addr, e))
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl StoreConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Values given explicitly on the command line. They win over every other source.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub listen_addr: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub drain_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
    pub idle_timeout_secs: Option<u64>,
    pub template_path: Option<PathBuf>,
    pub strict: Option<bool>,
    pub persistence: Option<bool>,
    pub store_backend: Option<String>,
    pub store_uri: Option<String>,
    pub store_database: Option<String>,
    pub store_collection: Option<String>,
    pub store_document_id: Option<String>,
    pub tracing_service_name: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
}

/// Load configuration: defaults < config file < environment < command line.
pub fn load_config(file: Option<&Path>, overrides: &ConfigOverrides) -> Result<Config, AppError> {
    let env = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__");
    load_config_with_env(file, overrides, env)
}

pub fn load_config_with_env(
    file: Option<&Path>,
    overrides: &ConfigOverrides,
    env: config::Environment,
) -> Result<Config, AppError> {
    let cfg = build(file, overrides, env).map_err(|e| AppError::Config(e.to_string()))?;
    validate_config(&cfg)?;
    Ok(cfg)
}

fn build(
    file: Option<&Path>,
    overrides: &ConfigOverrides,
    env: config::Environment,
) -> Result<Config, config::ConfigError> {
    let mut builder = config::Config::builder()
        .set_default("server.listen_addr", "0.0.0.0:8080")?
        .set_default("server.request_timeout_secs", 10_i64)?
        .set_default("server.drain_timeout_secs", 30_i64)?
        .set_default("server.read_timeout_secs", 5_i64)?
        .set_default("server.idle_timeout_secs", 15_i64)?
        .set_default("server.strict", false)?
        .set_default("store.enabled", false)?
        .set_default("store.backend", "mongodb")?
        .set_default("store.uri", "mongodb://localhost:27017")?
        .set_default("store.database", "test")?
        .set_default("store.collection", "counter")?
        .set_default("store.document_id", "DECAFBAD")?
        .set_default("store.operation_timeout_ms", 3000_i64)?
        .set_default("store.connect_timeout_secs", 10_i64)?
        .set_default("tracing.service_name", "visit-counter")?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?;

    builder = match file {
        Some(path) => builder.add_source(config::File::from(path)),
        None => builder.add_source(config::File::with_name(DEFAULT_CONFIG_NAME).required(false)),
    };

    builder
        .add_source(env)
        .set_override_option("server.listen_addr", overrides.listen_addr.clone())?
        .set_override_option(
            "server.request_timeout_secs",
            overrides.request_timeout_secs.map(|v| v as i64),
        )?
        .set_override_option(
            "server.drain_timeout_secs",
            overrides.drain_timeout_secs.map(|v| v as i64),
        )?
        .set_override_option(
            "server.read_timeout_secs",
            overrides.read_timeout_secs.map(|v| v as i64),
        )?
        .set_override_option(
            "server.idle_timeout_secs",
            overrides.idle_timeout_secs.map(|v| v as i64),
        )?
        .set_override_option(
            "server.template_path",
            overrides
                .template_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        )?
        .set_override_option("server.strict", overrides.strict)?
        .set_override_option("store.enabled", overrides.persistence)?
        .set_override_option("store.backend", overrides.store_backend.clone())?
        .set_override_option("store.uri", overrides.store_uri.clone())?
        .set_override_option("store.database", overrides.store_database.clone())?
        .set_override_option("store.collection", overrides.store_collection.clone())?
        .set_override_option("store.document_id", overrides.store_document_id.clone())?
        .set_override_option("tracing.service_name", overrides.tracing_service_name.clone())?
        .set_override_option("logging.level", overrides.log_level.clone())?
        .set_override_option("logging.format", overrides.log_format.clone())?
        .build()?
        .try_deserialize()
}

pub fn validate_config(cfg: &Config) -> Result<(), AppError> {
    cfg.server.socket_addr()?;

    if cfg.server.request_timeout_secs == 0 {
        return Err(AppError::Config("server.request_timeout_secs must be greater than 0".into()));
    }
    if cfg.server.drain_timeout_secs == 0 {
        return Err(AppError::Config("server.drain_timeout_secs must be greater than 0".into()));
    }
    if cfg.server.read_timeout_secs == 0 {
        return Err(AppError::Config("server.read_timeout_secs must be greater than 0".into()));
    }
    if cfg.server.idle_timeout_secs == 0 {
        return Err(AppError::Config("server.idle_timeout_secs must be greater than 0".into()));
    }
    if cfg.store.operation_timeout_ms == 0 {
        return Err(AppError::Config("store.operation_timeout_ms must be greater than 0".into()));
    }
    if cfg.store.connect_timeout_secs == 0 {
        return Err(AppError::Config("store.connect_timeout_secs must be greater than 0".into()));
    }

    if cfg.store.enabled {
        let required = [
            ("store.uri", &cfg.store.uri),
            ("store.database", &cfg.store.database),
            ("store.collection", &cfg.store.collection),
            ("store.document_id", &cfg.store.document_id),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "{} is required when persistence is enabled",
                    key
                )));
            }
        }
    }

    if cfg.tracing.service_name.trim().is_empty() {
        return Err(AppError::Config("tracing.service_name cannot be empty".into()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env_from(pairs: &[(&str, &str)]) -> config::Environment {
        let source: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .source(Some(source))
    }

    fn write_toml(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let cfg = load_config_with_env(None, &ConfigOverrides::default(), env_from(&[])).unwrap();

        assert_eq!(cfg.server.listen_addr, "0.0.0.0:8080");
        assert_eq!(cfg.server.drain_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.server.read_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.server.idle_timeout(), Duration::from_secs(15));
        assert!(!cfg.store.enabled);
        assert_eq!(cfg.store.backend, StoreBackendKind::Mongodb);
        assert_eq!(cfg.store.collection, "counter");
        assert_eq!(cfg.store.document_id, "DECAFBAD");
        assert_eq!(cfg.store.operation_timeout(), Duration::from_secs(3));
        assert_eq!(cfg.logging.format, LogFormat::Text);
        assert!(cfg.server.template_path.is_none());
    }

    #[test]
    fn test_precedence_flag_over_env_over_file() {
        let file = write_toml(
            r#"
            [server]
            listen_addr = "127.0.0.1:9000"

            [store]
            database = "from-file"
            collection = "from-file"

            [tracing]
            service_name = "from-file"
            "#,
        );
        let env = env_from(&[
            ("VISIT_COUNTER__STORE__DATABASE", "from-env"),
            ("VISIT_COUNTER__TRACING__SERVICE_NAME", "from-env"),
        ]);
        let overrides = ConfigOverrides {
            tracing_service_name: Some("from-flag".to_string()),
            ..Default::default()
        };

        let cfg = load_config_with_env(Some(file.path()), &overrides, env).unwrap();

        assert_eq!(cfg.server.listen_addr, "127.0.0.1:9000");
        assert_eq!(cfg.store.collection, "from-file");
        assert_eq!(cfg.store.database, "from-env");
        assert_eq!(cfg.tracing.service_name, "from-flag");
    }

    #[test]
    fn test_persistence_flag_and_backend() {
        let overrides = ConfigOverrides {
            persistence: Some(true),
            store_backend: Some("memory".to_string()),
            ..Default::default()
        };
        let cfg = load_config_with_env(None, &overrides, env_from(&[])).unwrap();
        assert!(cfg.store.enabled);
        assert_eq!(cfg.store.backend, StoreBackendKind::Memory);
    }

    #[test]
    fn test_bare_port_listens_on_all_interfaces() {
        let overrides = ConfigOverrides {
            listen_addr: Some(":8080".to_string()),
            ..Default::default()
        };
        let cfg = load_config_with_env(None, &overrides, env_from(&[])).unwrap();
        assert_eq!(cfg.server.socket_addr().unwrap(), "0.0.0.0:8080".parse().unwrap());
    }

    #[test]
    fn test_invalid_listen_addr_rejected() {
        for addr in ["localhost", ":http", "10.0.0.1"] {
            let overrides = ConfigOverrides {
                listen_addr: Some(addr.to_string()),
                ..Default::default()
            };
            let result = load_config_with_env(None, &overrides, env_from(&[]));
            assert!(matches!(result, Err(AppError::Config(_))), "{} accepted", addr);
        }
    }

    #[test]
    fn test_connection_timeouts_from_env() {
        let env = env_from(&[
            ("VISIT_COUNTER__SERVER__READ_TIMEOUT_SECS", "2"),
            ("VISIT_COUNTER__SERVER__IDLE_TIMEOUT_SECS", "60"),
        ]);
        let cfg = load_config_with_env(None, &ConfigOverrides::default(), env).unwrap();
        assert_eq!(cfg.server.read_timeout(), Duration::from_secs(2));
        assert_eq!(cfg.server.idle_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_zero_idle_timeout_rejected() {
        let overrides = ConfigOverrides {
            idle_timeout_secs: Some(0),
            ..Default::default()
        };
        let err = load_config_with_env(None, &overrides, env_from(&[])).unwrap_err();
        assert!(err.to_string().contains("idle_timeout_secs"));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let overrides = ConfigOverrides {
            store_backend: Some("redis".to_string()),
            ..Default::default()
        };
        let result = load_config_with_env(None, &overrides, env_from(&[]));
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_enabled_store_requires_document_id() {
        let overrides = ConfigOverrides {
            persistence: Some(true),
            store_document_id: Some("  ".to_string()),
            ..Default::default()
        };
        let err = load_config_with_env(None, &overrides, env_from(&[])).unwrap_err();
        assert!(err.to_string().contains("store.document_id"));
    }

    #[test]
    fn test_zero_drain_timeout_rejected() {
        let overrides = ConfigOverrides {
            drain_timeout_secs: Some(0),
            ..Default::default()
        };
        let err = load_config_with_env(None, &overrides, env_from(&[])).unwrap_err();
        assert!(err.to_string().contains("drain_timeout_secs"));
    }
}
