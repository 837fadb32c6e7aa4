//! Configuration module for dbcontext.
//!
//! Handles the TOML settings file and environment variable expansion.

mod settings;

pub use settings::{
    expand_env_vars, CacheSettings, CadenceKind, CatalogSettings, ConnectionSettings,
    LoggingSettings, PoolSettings, RefreshSettings, Settings, SettingsError, WorkerSettings,
};
