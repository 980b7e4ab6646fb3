//! Configuration management.
//!
//! Values come from an optional file plus `DEPOT__*` environment variables,
//! e.g. `DEPOT__POLICY__BACKEND=postgres` or `DEPOT__DATABASE__URL=...`.

use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{DepotError, ErrorCode, Result};
use crate::telemetry::LoggingConfig;

const ENV_PREFIX: &str = "DEPOT";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Where policy facts are persisted
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Where catalog records are persisted
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Database configuration, required by any `postgres` backend
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

/// Policy store backend.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PolicyBackend {
    Memory,
    #[default]
    File,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub backend: PolicyBackend,

    /// Snapshot location for the `file` backend
    #[serde(default = "default_policy_path")]
    pub path: PathBuf,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            backend: PolicyBackend::default(),
            path: default_policy_path(),
        }
    }
}

/// Catalog backend.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CatalogBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub backend: CatalogBackend,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// Apply pending migrations on startup
    #[serde(default)]
    pub run_migrations: bool,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            run_migrations: false,
        }
    }
}

/// What the startup bootstrap seeds.
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapConfig {
    /// Seed the wildcard administrator grants on startup
    #[serde(default = "default_seed_admin")]
    pub seed_admin: bool,

    /// Tenants whose default roles are initialised on startup
    #[serde(default)]
    pub tenants: Vec<String>,

    /// Users granted the administrator role in every tenant
    #[serde(default)]
    pub admin_users: Vec<String>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            seed_admin: default_seed_admin(),
            tenants: Vec::new(),
            admin_users: Vec::new(),
        }
    }
}

// Default value functions
fn default_policy_path() -> PathBuf { PathBuf::from("data/policy.json") }
fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 1 }
fn default_acquire_timeout_secs() -> u64 { 5 }
fn default_seed_admin() -> bool { true }

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path; environment variables still override.
    pub fn from_file(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Configuration with every store in memory. Used by tests.
    pub fn in_memory() -> Self {
        Self {
            policy: PolicyConfig {
                backend: PolicyBackend::Memory,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn needs_database(&self) -> bool {
        self.policy.backend == PolicyBackend::Postgres
            || self.catalog.backend == CatalogBackend::Postgres
    }

    pub fn validate(&self) -> Result<()> {
        if self.needs_database() && self.database.is_none() {
            return Err(DepotError::new(
                ErrorCode::InvalidConfiguration,
                "a postgres backend requires [database] to be configured",
            ));
        }
        if self.policy.backend == PolicyBackend::File && self.policy.path.as_os_str().is_empty() {
            return Err(DepotError::new(
                ErrorCode::InvalidConfiguration,
                "the file policy backend requires policy.path",
            ));
        }
        Ok(())
    }
}
