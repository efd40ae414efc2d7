//! Configuration management for docdb-mcp
//!
//! Values come from environment-aware defaults, an optional TOML file, and
//! finally command-line overrides.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use crate::redact::redact_connection_uri;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// MongoDB connection string (may embed credentials)
    #[serde(default = "default_connection_uri")]
    pub connection_uri: String,

    /// Database every operation runs against unless told otherwise
    #[serde(default = "default_database_name")]
    pub database_name: String,

    /// Store connection settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Query defaults
    #[serde(default)]
    pub query: QueryConfig,

    /// Resource listing/reading settings
    #[serde(default)]
    pub resources: ResourceConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Store connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Timeout for establishing a connection (milliseconds)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Timeout for selecting a server (milliseconds)
    #[serde(default = "default_server_selection_timeout_ms")]
    pub server_selection_timeout_ms: u64,

    /// Deadline applied to every store operation (milliseconds, unset = driver default)
    #[serde(default)]
    pub operation_timeout_ms: Option<u64>,

    /// Application name reported in the connection handshake
    #[serde(default = "default_app_name")]
    pub app_name: String,
}

/// Query configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Limit used when a query omits one or passes a non-positive value
    #[serde(default = "default_query_limit")]
    pub default_limit: i64,
}

/// Resource configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// URI scheme used for collection resources
    #[serde(default = "default_resource_scheme")]
    pub scheme: String,

    /// Documents sampled when inferring a collection schema
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for docdb-mcp data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection_uri: default_connection_uri(),
            database_name: default_database_name(),
            store: StoreConfig::default(),
            query: QueryConfig::default(),
            resources: ResourceConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            server_selection_timeout_ms: default_server_selection_timeout_ms(),
            operation_timeout_ms: None,
            app_name: default_app_name(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_query_limit(),
        }
    }
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            scheme: default_resource_scheme(),
            sample_size: default_sample_size(),
        }
    }
}

impl StoreConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn server_selection_timeout(&self) -> Duration {
        Duration::from_millis(self.server_selection_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }
}

impl Config {
    /// Get the default base directory for docdb-mcp (~/.docdb-mcp)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".docdb-mcp")
    }

    /// Initialize paths configuration
    fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            base_dir: base,
        };
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path
            .parent()
            .unwrap_or(Path::new("."))
            .to_path_buf();
        config.paths = PathsConfig {
            config_file: config_path.to_path_buf(),
            base_dir: base,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a base directory, falling back to defaults
    /// when no config file exists there
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Write a fresh default config under `base_dir`
    pub fn init_at(base_dir: Option<PathBuf>, force: bool) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() && !force {
            return Err(Error::Config(format!(
                "Config file already exists at {} (use --force to overwrite)",
                config.paths.config_file.display()
            )));
        }

        config.save()?;
        Ok(config)
    }

    /// Apply command-line/environment overrides on top of loaded values
    pub fn with_overrides(mut self, uri: Option<String>, database: Option<String>) -> Result<Self> {
        if let Some(uri) = uri {
            self.connection_uri = uri;
        }
        if let Some(database) = database {
            self.database_name = database;
        }
        self.validate()?;
        Ok(self)
    }

    /// Connection string safe for logs and tool output
    pub fn redacted_uri(&self) -> String {
        redact_connection_uri(&self.connection_uri)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.connection_uri.trim().is_empty() {
            return Err(Error::Config("connection_uri must not be empty".to_string()));
        }

        if self.database_name.trim().is_empty() {
            return Err(Error::Config("database_name must not be empty".to_string()));
        }

        if self.store.connect_timeout_ms == 0 || self.store.server_selection_timeout_ms == 0 {
            return Err(Error::Config(
                "store timeouts must be greater than zero".to_string(),
            ));
        }

        if self.store.operation_timeout_ms == Some(0) {
            return Err(Error::Config(
                "store.operation_timeout_ms must be greater than zero when set".to_string(),
            ));
        }

        if self.query.default_limit <= 0 {
            return Err(Error::Config(
                "query.default_limit must be positive".to_string(),
            ));
        }

        if self.resources.sample_size == 0 || self.resources.sample_size > MAX_SAMPLE_SIZE {
            return Err(Error::Config(format!(
                "resources.sample_size must be between 1 and {}",
                MAX_SAMPLE_SIZE
            )));
        }

        if self.resources.scheme.is_empty() || self.resources.scheme.contains("://") {
            return Err(Error::Config(
                "resources.scheme must be a bare scheme name".to_string(),
            ));
        }

        Ok(())
    }
}
