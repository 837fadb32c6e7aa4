//! TOML-based configuration for dbcontext.
//!
//! Supports a config file (dbcontext.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [connection]
//! driver = "oracle"
//! connection_string = "${HR_DB_CONNECTION_STRING}"
//! target_schema = "HR"
//!
//! [worker]
//! path = "/opt/dbcontext/dbcontext-worker"
//!
//! [pool]
//! max_size = 10
//! acquire_timeout_ms = 5000
//!
//! [catalog]
//! statement_timeout_secs = 30
//! allow_list = ["HR.EMPLOYEES", "HR.DEPARTMENTS", "HR.VW_EMP_HIERARCHY:VIEW"]
//!
//! [cache]
//! ttl_secs = 3600
//! max_age_secs = 86400
//!
//! [refresh]
//! cadence = "interval"
//! interval_secs = 900
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid allow-list entry: {0}")]
    InvalidAllowListEntry(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<SettingsError> for crate::Error {
    fn from(err: SettingsError) -> Self {
        crate::Error::Config(err.to_string())
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Database connection.
    pub connection: ConnectionSettings,

    /// Worker process configuration.
    pub worker: WorkerSettings,

    /// Connection pool settings.
    pub pool: PoolSettings,

    /// Dictionary access settings.
    pub catalog: CatalogSettings,

    /// Snapshot cache settings.
    pub cache: CacheSettings,

    /// Refresh policy.
    pub refresh: RefreshSettings,

    /// Log output.
    pub logging: LoggingSettings,
}

/// Connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Database driver understood by the worker.
    pub driver: String,

    /// Connection string (supports ${ENV_VAR} expansion).
    pub connection_string: String,

    /// Schema to describe instead of the connecting user's own.
    pub target_schema: Option<String>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            driver: "oracle".to_string(),
            connection_string: String::new(),
            target_schema: None,
        }
    }
}

impl ConnectionSettings {
    /// Get the connection string with environment variables expanded.
    pub fn resolved_connection_string(&self) -> Result<String, SettingsError> {
        expand_env_vars(&self.connection_string)
    }

    /// Target schema, upper-cased the way the dictionary stores owners.
    pub fn target_owner(&self) -> Option<String> {
        self.target_schema
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_uppercase)
    }
}

/// Worker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Path to worker binary.
    pub path: Option<String>,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            path: None,
            request_timeout_secs: 60,
        }
    }
}

/// Connection pool settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Maximum number of open connections.
    pub max_size: usize,

    /// How long `acquire` waits for a free connection.
    pub acquire_timeout_ms: u64,

    /// Attempts for transient failures (first try included).
    pub max_attempts: u32,

    /// First backoff delay.
    pub backoff_base_ms: u64,

    /// Backoff ceiling.
    pub backoff_max_ms: u64,

    /// Idle connections older than this are pinged before reuse.
    pub health_check_idle_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: 10,
            acquire_timeout_ms: 5000,
            max_attempts: 3,
            backoff_base_ms: 200,
            backoff_max_ms: 2000,
            health_check_idle_secs: 30,
        }
    }
}

/// Dictionary access settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CatalogSettings {
    /// Timeout for a single catalog statement.
    pub statement_timeout_secs: u64,

    /// Objects to expose when no dictionary view is readable.
    ///
    /// Entries are `OWNER.NAME` or `NAME`, optionally suffixed with
    /// `:TABLE`, `:VIEW` or `:MATERIALIZED_VIEW` (default `TABLE`).
    pub allow_list: Vec<String>,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            statement_timeout_secs: 30,
            allow_list: Vec::new(),
        }
    }
}

/// Snapshot cache settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    /// SQLite file holding persisted snapshots.
    pub path: Option<String>,

    /// Persist snapshots after each refresh.
    pub persist: bool,

    /// Snapshot time-to-live before a full refresh is due.
    pub ttl_secs: u64,

    /// Oldest persisted snapshot accepted for a warm start.
    pub max_age_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            path: None,
            persist: true,
            ttl_secs: 3600,
            max_age_secs: 86_400,
        }
    }
}

impl CacheSettings {
    /// Resolve the persistence path, defaulting to `~/.dbcontext/schema_cache.db`.
    pub fn resolved_path(&self) -> Result<PathBuf, SettingsError> {
        if let Some(path) = &self.path {
            return Ok(PathBuf::from(expand_env_vars(path)?));
        }
        let home = dirs::home_dir().ok_or_else(|| {
            SettingsError::InvalidConfig("cannot determine home directory for cache".to_string())
        })?;
        Ok(home.join(".dbcontext").join("schema_cache.db"))
    }
}

/// How full refreshes are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CadenceKind {
    /// Only on explicit request, expiry, or a cache miss.
    OnDemand,
    /// Additionally on a fixed timer.
    Interval,
}

/// Refresh policy settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RefreshSettings {
    pub cadence: CadenceKind,

    /// Timer period when `cadence = "interval"`.
    pub interval_secs: u64,

    /// Load column detail for every object during a full refresh.
    pub eager_details: bool,

    /// Concurrent detail loads during a full refresh.
    pub detail_concurrency: usize,

    /// Run a full refresh when a name matches nothing in the cache.
    pub refresh_on_miss: bool,

    /// Minimum spacing between miss-triggered refreshes.
    pub miss_cooldown_secs: u64,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            cadence: CadenceKind::OnDemand,
            interval_secs: 900,
            eager_details: true,
            detail_concurrency: 4,
            refresh_on_miss: true,
            miss_cooldown_secs: 30,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `DBCONTEXT_CONFIG`
    /// 2. `./dbcontext.toml`
    /// 3. `~/.config/dbcontext/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("DBCONTEXT_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("dbcontext.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("dbcontext").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    /// Reject values that would make the pool or refresher unusable.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.pool.max_size == 0 {
            return Err(SettingsError::InvalidConfig(
                "pool.max_size must be at least 1".to_string(),
            ));
        }
        if self.pool.max_attempts == 0 {
            return Err(SettingsError::InvalidConfig(
                "pool.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.refresh.detail_concurrency == 0 {
            return Err(SettingsError::InvalidConfig(
                "refresh.detail_concurrency must be at least 1".to_string(),
            ));
        }
        if self.refresh.cadence == CadenceKind::Interval && self.refresh.interval_secs == 0 {
            return Err(SettingsError::InvalidConfig(
                "refresh.interval_secs must be positive for cadence = \"interval\"".to_string(),
            ));
        }
        Ok(())
    }

    /// Statement timeout as a duration.
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.catalog.statement_timeout_secs)
    }

    /// Get the worker binary path.
    ///
    /// Returns the configured path or searches common locations.
    pub fn worker_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.worker.path {
            let expanded = expand_env_vars(path).ok()?;
            return Some(PathBuf::from(expanded));
        }

        let candidates = ["dbcontext-worker", "./dbcontext-worker", "./worker/dbcontext-worker"];

        candidates
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let mut var_name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                var_name.push(ch);
            }
        } else {
            // $VAR ends at the first non-alphanumeric/underscore
            while let Some(ch) = chars.next_if(|ch| ch.is_alphanumeric() || *ch == '_') {
                var_name.push(ch);
            }
            if var_name.is_empty() {
                result.push('$');
                continue;
            }
        }

        let value =
            env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}
