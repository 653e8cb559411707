use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default base URL of the remote service
const DEFAULT_BASE_URL: &str = "http://localhost:8080/_api";
/// Default delay between replication rounds
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 5;
/// File next to the database holding the generated identity
const IDENTITY_FILE: &str = "identity";

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Path to the SQLite database
    pub database_path: ConfigValue<PathBuf>,
    /// Identity owning the local collection; names the remote collection
    pub identity: ConfigValue<String>,
    /// Base URL of the remote service
    pub base_url: ConfigValue<String>,
    /// Seconds between replication rounds
    pub sync_interval_secs: ConfigValue<u64>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
}

/// On-disk shape of the config file
#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(default)]
struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    database_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sync_interval_secs: Option<u64>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let default_db_path = Self::default_data_dir().join("store.db");

        // Start with defaults
        let mut database_path = ConfigValue::new(default_db_path, ConfigSource::Default);
        let mut identity: Option<ConfigValue<String>> = None;
        let mut base_url = ConfigValue::new(DEFAULT_BASE_URL.to_string(), ConfigSource::Default);
        let mut sync_interval_secs =
            ConfigValue::new(DEFAULT_SYNC_INTERVAL_SECS, ConfigSource::Default);
        let mut config_file = None;

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(db_path) = file_config.database_path {
                // Resolve relative paths against config file's directory
                let resolved_path = if db_path.is_relative() {
                    path.parent().map(|p| p.join(&db_path)).unwrap_or(db_path)
                } else {
                    db_path
                };
                database_path = ConfigValue::new(resolved_path, ConfigSource::File);
            }
            if let Some(id) = file_config.identity {
                identity = Some(ConfigValue::new(id, ConfigSource::File));
            }
            if let Some(url) = file_config.base_url {
                base_url = ConfigValue::new(url, ConfigSource::File);
            }
            if let Some(secs) = file_config.sync_interval_secs {
                sync_interval_secs = ConfigValue::new(secs, ConfigSource::File);
            }
        }

        // Apply environment variable overrides
        if let Ok(db_path) = std::env::var("HOODIE_STORE_DATABASE_PATH") {
            database_path = ConfigValue::new(PathBuf::from(db_path), ConfigSource::Environment);
        }
        if let Ok(id) = std::env::var("HOODIE_STORE_IDENTITY") {
            identity = Some(ConfigValue::new(id, ConfigSource::Environment));
        }
        if let Ok(url) = std::env::var("HOODIE_STORE_BASE_URL") {
            base_url = ConfigValue::new(url, ConfigSource::Environment);
        }

        let identity = match identity {
            Some(identity) => identity,
            None => ConfigValue::new(
                load_or_create_identity(&database_path.value)?,
                ConfigSource::Default,
            ),
        };

        Ok(Self {
            database_path,
            identity,
            base_url,
            sync_interval_secs,
            config_file,
        })
    }

    /// Writes the effective values to `path` as YAML, creating parent
    /// directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let file = ConfigFile {
            database_path: Some(self.database_path.value.clone()),
            identity: Some(self.identity.value.clone()),
            base_url: Some(self.base_url.value.clone()),
            sync_interval_secs: Some(self.sync_interval_secs.value),
        };
        let yaml = serde_yaml::to_string(&file)
            .map_err(|e| ConfigError::SerializeError(path.to_path_buf(), e))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteError(parent.to_path_buf(), e))?;
        }
        std::fs::write(path, yaml).map_err(|e| ConfigError::WriteError(path.to_path_buf(), e))
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.value.max(1))
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/hoodie-store/
    /// - macOS: ~/Library/Application Support/hoodie-store/
    /// - Windows: %APPDATA%/hoodie-store/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hoodie-store")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/hoodie-store/
    /// - macOS: ~/Library/Application Support/hoodie-store/
    /// - Windows: %APPDATA%/hoodie-store/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hoodie-store")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

/// Reads the identity stored next to the database, generating and saving a
/// new one on first use.
fn load_or_create_identity(database_path: &Path) -> Result<String, ConfigError> {
    let dir = database_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let path = dir.join(IDENTITY_FILE);

    match std::fs::read_to_string(&path) {
        Ok(contents) if !contents.trim().is_empty() => return Ok(contents.trim().to_string()),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(ConfigError::IdentityError(path, e)),
    }

    let identity = uuid::Uuid::new_v4().simple().to_string();
    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::IdentityError(dir.clone(), e))?;
    std::fs::write(&path, &identity).map_err(|e| ConfigError::IdentityError(path.clone(), e))?;
    tracing::info!("Generated new identity in {}", path.display());
    Ok(identity)
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    SerializeError(PathBuf, serde_yaml::Error),
    WriteError(PathBuf, std::io::Error),
    IdentityError(PathBuf, std::io::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::SerializeError(path, e) => {
                write!(f, "Failed to serialize config for '{}': {}", path.display(), e)
            }
            ConfigError::WriteError(path, e) => {
                write!(f, "Failed to write config file '{}': {}", path.display(), e)
            }
            ConfigError::IdentityError(path, e) => {
                write!(f, "Failed to access identity file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
