// crates/idempotency-config/src/config.rs
// ============================================================================
// Module: Idempotency Configuration
// Description: Configuration loading and validation for the idempotency engine.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: idempotency-core, idempotency-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Every table denies unknown fields. Missing or invalid configuration fails
//! closed; in particular a `test` or `production` deployment without an
//! explicit, strong MAC secret never starts.
//! Security posture: config inputs are untrusted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use idempotency_core::DeploymentEnvironment;
use idempotency_core::ExecutionPolicy;
use idempotency_core::FileAuditSink;
use idempotency_core::IdempotencyAuditSink;
use idempotency_core::InMemoryClaimStore;
use idempotency_core::KeySecret;
use idempotency_core::NoopAuditSink;
use idempotency_core::SharedClaimStore;
use idempotency_core::StderrAuditSink;
use idempotency_store_sqlite::SqliteClaimStore;
use idempotency_store_sqlite::SqliteStoreConfig;
use idempotency_store_sqlite::SqliteStoreError;
use idempotency_store_sqlite::SqliteStoreMode;
use idempotency_store_sqlite::SqliteSyncMode;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "idempotency.toml";
/// Environment variable naming the config path.
const CONFIG_ENV_VAR: &str = "IDEMPOTENCY_CONFIG";
/// Maximum configuration file size in bytes.
const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Environment variable consulted for the MAC secret by default.
pub const DEFAULT_SECRET_ENV_VAR: &str = "IDEMPOTENCY_SECRET";
/// Maximum length of the secret environment variable name.
const MAX_ENV_VAR_NAME_LENGTH: usize = 128;
/// Longest accepted record lifetime (one year).
const MAX_TTL_HOURS: u64 = 8_760;
/// Longest accepted stale-takeover window (one day).
const MAX_STALE_TAKEOVER_SECS: u64 = 86_400;
/// Default record lifetime.
const DEFAULT_TTL_HOURS: u64 = 24;
/// Default stale-takeover window.
const DEFAULT_STALE_TAKEOVER_SECS: u64 = 300;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Idempotency engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdempotencyConfig {
    /// Deployment environment.
    #[serde(default)]
    pub environment: DeploymentEnvironment,
    /// MAC secret source.
    #[serde(default)]
    pub secret: SecretConfig,
    /// Claim store backend.
    #[serde(default)]
    pub store: StoreConfig,
    /// Default execution timing.
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Audit sink.
    #[serde(default)]
    pub audit: AuditConfig,
}

impl IdempotencyConfig {
    /// Loads configuration from `path`, `IDEMPOTENCY_CONFIG`, or the default
    /// filename, in that order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read, exceeds limits,
    /// fails to parse, or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path("config path", &resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::parse(content)
    }

    /// Parses and validates configuration text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] when validation fails.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.secret.validate()?;
        self.store.validate()?;
        self.execution.validate()?;
        self.audit.validate()?;
        if self.environment == DeploymentEnvironment::Production
            && self.store.store_type == StoreType::Memory
        {
            return Err(ConfigError::Invalid(
                "production environment requires the sqlite store".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolves the MAC secret from the configured environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the secret fails the
    /// environment's rules.
    pub fn resolve_secret(&self) -> Result<KeySecret, ConfigError> {
        let value = env::var(&self.secret.env_var).ok();
        self.resolve_secret_value(value.as_deref())
    }

    /// Resolves the MAC secret from an explicit value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the secret fails the
    /// environment's rules.
    pub fn resolve_secret_value(&self, value: Option<&str>) -> Result<KeySecret, ConfigError> {
        KeySecret::resolve(self.environment, value).map_err(|err| {
            ConfigError::Invalid(format!("secret from {}: {err}", self.secret.env_var))
        })
    }

    /// Opens the configured claim store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the `SQLite` store cannot be opened.
    pub fn open_store(&self) -> Result<SharedClaimStore, SqliteStoreError> {
        match self.store.sqlite_config() {
            Some(config) => Ok(SharedClaimStore::from_store(SqliteClaimStore::new(config)?)),
            None => Ok(SharedClaimStore::from_store(InMemoryClaimStore::new())),
        }
    }

    /// Builds the configured audit sink.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the audit file cannot be opened.
    pub fn audit_sink(&self) -> Result<Arc<dyn IdempotencyAuditSink>, ConfigError> {
        match (self.audit.sink, &self.audit.path) {
            (AuditSinkType::File, Some(path)) => {
                let sink = FileAuditSink::new(path).map_err(|err| ConfigError::Io(err.to_string()))?;
                Ok(Arc::new(sink))
            }
            (AuditSinkType::File, None) => {
                Err(ConfigError::Invalid("file audit sink requires path".to_string()))
            }
            (AuditSinkType::Stderr, _) => Ok(Arc::new(StderrAuditSink)),
            (AuditSinkType::None, _) => Ok(Arc::new(NoopAuditSink)),
        }
    }
}

// ============================================================================
// SECTION: Secret Config
// ============================================================================

/// MAC secret source configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretConfig {
    /// Environment variable holding the secret.
    #[serde(default = "default_secret_env_var")]
    pub env_var: String,
}

impl Default for SecretConfig {
    fn default() -> Self {
        Self {
            env_var: default_secret_env_var(),
        }
    }
}

impl SecretConfig {
    /// Validates the environment variable name.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.env_var.is_empty() || self.env_var.len() > MAX_ENV_VAR_NAME_LENGTH {
            return Err(ConfigError::Invalid(format!(
                "secret.env_var must be 1-{MAX_ENV_VAR_NAME_LENGTH} characters"
            )));
        }
        if !self
            .env_var
            .bytes()
            .all(|byte| byte.is_ascii_uppercase() || byte.is_ascii_digit() || byte == b'_')
        {
            return Err(ConfigError::Invalid(
                "secret.env_var must contain only A-Z, 0-9, and _".to_string(),
            ));
        }
        Ok(())
    }
}

/// Returns the default secret environment variable name.
fn default_secret_env_var() -> String {
    DEFAULT_SECRET_ENV_VAR.to_string()
}

// ============================================================================
// SECTION: Store Config
// ============================================================================

/// Claim store backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreType {
    /// Use the in-memory store.
    #[default]
    Memory,
    /// Use the `SQLite`-backed durable store.
    Sqlite,
}

/// Claim store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Store backend type.
    #[serde(rename = "type", default)]
    pub store_type: StoreType,
    /// `SQLite` database path when using the sqlite backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` synchronous mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_type: StoreType::default(),
            path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

impl StoreConfig {
    /// Validates store configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match self.store_type {
            StoreType::Memory => {
                if self.path.is_some() {
                    return Err(ConfigError::Invalid("memory store must not set path".to_string()));
                }
                Ok(())
            }
            StoreType::Sqlite => {
                let path = self.path.as_ref().ok_or_else(|| {
                    ConfigError::Invalid("sqlite store requires path".to_string())
                })?;
                validate_path("store.path", path)?;
                if self.busy_timeout_ms == 0 {
                    return Err(ConfigError::Invalid(
                        "store.busy_timeout_ms must be greater than zero".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Returns the `SQLite` store config when the sqlite backend is selected.
    #[must_use]
    pub fn sqlite_config(&self) -> Option<SqliteStoreConfig> {
        match (self.store_type, &self.path) {
            (StoreType::Sqlite, Some(path)) => Some(SqliteStoreConfig {
                path: path.clone(),
                busy_timeout_ms: self.busy_timeout_ms,
                journal_mode: self.journal_mode,
                sync_mode: self.sync_mode,
            }),
            _ => None,
        }
    }
}

/// Returns the default busy timeout in milliseconds.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Execution Config
// ============================================================================

/// Default execution timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionConfig {
    /// Record lifetime in hours.
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u64,
    /// Stale-takeover window in seconds.
    #[serde(default = "default_stale_takeover_secs")]
    pub stale_takeover_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            ttl_hours: DEFAULT_TTL_HOURS,
            stale_takeover_secs: DEFAULT_STALE_TAKEOVER_SECS,
        }
    }
}

impl ExecutionConfig {
    /// Validates timing bounds.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(1 ..= MAX_TTL_HOURS).contains(&self.ttl_hours) {
            return Err(ConfigError::Invalid(format!(
                "execution.ttl_hours must be between 1 and {MAX_TTL_HOURS}"
            )));
        }
        if !(1 ..= MAX_STALE_TAKEOVER_SECS).contains(&self.stale_takeover_secs) {
            return Err(ConfigError::Invalid(format!(
                "execution.stale_takeover_secs must be between 1 and {MAX_STALE_TAKEOVER_SECS}"
            )));
        }
        Ok(())
    }

    /// Returns the execution policy for these settings.
    #[must_use]
    pub const fn policy(&self) -> ExecutionPolicy {
        ExecutionPolicy::new(
            Duration::from_secs(self.ttl_hours.saturating_mul(3600)),
            Duration::from_secs(self.stale_takeover_secs),
        )
    }
}

/// Returns the default record lifetime in hours.
const fn default_ttl_hours() -> u64 {
    DEFAULT_TTL_HOURS
}

/// Returns the default stale-takeover window in seconds.
const fn default_stale_takeover_secs() -> u64 {
    DEFAULT_STALE_TAKEOVER_SECS
}

// ============================================================================
// SECTION: Audit Config
// ============================================================================

/// Audit sink type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuditSinkType {
    /// JSON lines on stderr.
    Stderr,
    /// Append-only JSON lines file.
    File,
    /// Discard audit events.
    #[default]
    None,
}

/// Audit sink configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    /// Sink type.
    #[serde(default)]
    pub sink: AuditSinkType,
    /// Log file path for the file sink.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl AuditConfig {
    /// Validates audit sink configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match (self.sink, &self.path) {
            (AuditSinkType::File, Some(path)) => validate_path("audit.path", path),
            (AuditSinkType::File, None) => {
                Err(ConfigError::Invalid("file audit sink requires path".to_string()))
            }
            (_, Some(_)) => {
                Err(ConfigError::Invalid("audit.path is only valid for the file sink".to_string()))
            }
            (_, None) => Ok(()),
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from explicit input, env var, or default.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates a path against length limits.
fn validate_path(field: &str, path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in path.components() {
        if component.as_os_str().to_string_lossy().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} component too long")));
        }
    }
    Ok(())
}
