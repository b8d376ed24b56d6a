// crates/idempotency-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Claim Store
// Description: Durable ClaimStore backed by SQLite.
// Purpose: Persist idempotency records with atomic claims and guarded commits.
// Dependencies: idempotency-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! [`SqliteClaimStore`] keeps one row per `(tenant, scope, key_hash)` in the
//! `idempotency_keys` table. Claims are `INSERT ... ON CONFLICT DO NOTHING`,
//! transitions are single `UPDATE ... WHERE <key> AND <guard>` statements,
//! and the attempt counter is incremented inside SQL. Responses are stored
//! as RFC 8785 canonical JSON and re-validated on every read, so a tampered
//! row fails closed instead of leaking structure to callers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use idempotency_core::ClaimKey;
use idempotency_core::ClaimNonce;
use idempotency_core::ClaimStore;
use idempotency_core::IdempotencyRecord;
use idempotency_core::InsertOutcome;
use idempotency_core::NewClaim;
use idempotency_core::RecordStatus;
use idempotency_core::RecordUpdate;
use idempotency_core::SanitizedResponse;
use idempotency_core::StoreError;
use idempotency_core::Timestamp;
use idempotency_core::UpdateGuard;
use idempotency_core::canonical_json_bytes;
pub use idempotency_core::MAX_RESPONSE_BYTES;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

/// Columns selected when reading a record.
const RECORD_COLUMNS: &str = "claim_nonce, status, started_at, completed_at, expires_at, \
                              attempt_count, response_json";

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` claim store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `busy_timeout_ms` is interpreted as milliseconds and must be non-zero.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl SqliteStoreConfig {
    /// Creates a config for `path` with default tuning.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

/// Returns the default busy timeout in milliseconds.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` claim store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Stored row violates record invariants.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store configuration or data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Response payload exceeded [`MAX_RESPONSE_BYTES`].
    #[error("sqlite store payload too large: {actual_bytes} bytes (max {max_bytes})")]
    TooLarge {
        /// Maximum allowed bytes.
        max_bytes: usize,
        /// Actual payload size in bytes.
        actual_bytes: usize,
    },
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Store(message),
            SqliteStoreError::Corrupt(message) => Self::Corrupt(message),
            SqliteStoreError::VersionMismatch(message) => Self::VersionMismatch(message),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
            SqliteStoreError::TooLarge {
                max_bytes,
                actual_bytes,
            } => Self::Invalid(format!(
                "response_json exceeds size limit: {actual_bytes} bytes (max {max_bytes})"
            )),
        }
    }
}

/// Maps a `rusqlite` error into [`SqliteStoreError::Db`].
#[allow(clippy::needless_pass_by_value, reason = "Used as a map_err adapter.")]
fn db_error(err: rusqlite::Error) -> SqliteStoreError {
    SqliteStoreError::Db(err.to_string())
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed claim store.
///
/// Clones share one connection.
#[derive(Debug, Clone)]
pub struct SqliteClaimStore {
    /// Store configuration.
    config: SqliteStoreConfig,
    /// Serialized connection handle.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteClaimStore {
    /// Opens an `SQLite`-backed claim store, creating the schema if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the path is unsafe, the database
    /// cannot be opened, or the schema version does not match.
    pub fn new(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        if config.busy_timeout_ms == 0 {
            return Err(SqliteStoreError::Invalid(
                "busy_timeout_ms must be greater than zero".to_string(),
            ));
        }
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(&config)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            config,
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Returns the store configuration.
    #[must_use]
    pub const fn config(&self) -> &SqliteStoreConfig {
        &self.config
    }

    /// Locks the shared connection.
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection
            .lock()
            .map_err(|_| SqliteStoreError::Io("sqlite connection mutex poisoned".to_string()))
    }

    /// Inserts a started row unless one exists.
    fn insert_started(&self, claim: &NewClaim) -> Result<InsertOutcome, SqliteStoreError> {
        let guard = self.lock()?;
        let changed = guard
            .execute(
                "INSERT INTO idempotency_keys (
                    tenant, scope, key_hash, claim_nonce, status, started_at,
                    completed_at, expires_at, attempt_count, response_json
                 ) VALUES (?1, ?2, ?3, ?4, 'started', ?5, NULL, ?6, 1, NULL)
                 ON CONFLICT (tenant, scope, key_hash) DO NOTHING",
                params![
                    claim.key.tenant.as_str(),
                    claim.key.scope.as_str(),
                    claim.key.key_hash.as_str(),
                    claim.nonce.as_str(),
                    claim.started_at.as_unix_millis(),
                    claim.expires_at.as_unix_millis(),
                ],
            )
            .map_err(db_error)?;
        drop(guard);
        Ok(if changed == 0 { InsertOutcome::Duplicate } else { InsertOutcome::Inserted })
    }

    /// Runs one guarded `UPDATE` and returns the changed-row count.
    fn update_guarded(
        &self,
        key: &ClaimKey,
        guard: &UpdateGuard,
        update: &RecordUpdate,
    ) -> Result<u64, SqliteStoreError> {
        let mut values: Vec<SqlValue> = Vec::new();
        let set_clause = match update {
            RecordUpdate::Reclaim {
                nonce,
                started_at,
                clear_response,
            } => {
                values.push(SqlValue::Text(nonce.as_str().to_string()));
                values.push(SqlValue::Integer(started_at.as_unix_millis()));
                let mut clause = String::from(
                    "claim_nonce = ?, status = 'started', started_at = ?, completed_at = NULL, \
                     attempt_count = attempt_count + 1",
                );
                if *clear_response {
                    clause.push_str(", response_json = NULL");
                }
                clause
            }
            RecordUpdate::Complete {
                status,
                response,
                completed_at,
            } => {
                let status: RecordStatus = (*status).into();
                values.push(SqlValue::Text(status.label().to_string()));
                values.push(SqlValue::Blob(encode_response(response)?));
                values.push(SqlValue::Integer(completed_at.as_unix_millis()));
                String::from("status = ?, response_json = ?, completed_at = ?")
            }
        };
        values.push(SqlValue::Text(key.tenant.as_str().to_string()));
        values.push(SqlValue::Text(key.scope.as_str().to_string()));
        values.push(SqlValue::Text(key.key_hash.as_str().to_string()));
        let guard_clause = match guard {
            UpdateGuard::StaleStarted {
                cutoff,
            } => {
                values.push(SqlValue::Integer(cutoff.as_unix_millis()));
                "status = 'started' AND started_at <= ?"
            }
            UpdateGuard::Failed => "status = 'failed'",
            UpdateGuard::Nonce(nonce) => {
                values.push(SqlValue::Text(nonce.as_str().to_string()));
                "claim_nonce = ?"
            }
        };
        let sql = format!(
            "UPDATE idempotency_keys SET {set_clause} \
             WHERE tenant = ? AND scope = ? AND key_hash = ? AND {guard_clause}"
        );
        let connection = self.lock()?;
        let changed = connection.execute(&sql, params_from_iter(values)).map_err(db_error)?;
        drop(connection);
        Ok(u64::try_from(changed).unwrap_or(u64::MAX))
    }

    /// Reads and validates the row at `key`.
    fn read_record(&self, key: &ClaimKey) -> Result<Option<IdempotencyRecord>, SqliteStoreError> {
        let guard = self.lock()?;
        let row = guard
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM idempotency_keys
                     WHERE tenant = ?1 AND scope = ?2 AND key_hash = ?3"
                ),
                params![key.tenant.as_str(), key.scope.as_str(), key.key_hash.as_str()],
                |row| {
                    Ok(RawRecord {
                        claim_nonce: row.get(0)?,
                        status: row.get(1)?,
                        started_at: row.get(2)?,
                        completed_at: row.get(3)?,
                        expires_at: row.get(4)?,
                        attempt_count: row.get(5)?,
                        response_json: row.get(6)?,
                    })
                },
            )
            .optional()
            .map_err(db_error)?;
        drop(guard);
        row.map(|raw| raw.into_record(key)).transpose()
    }

    /// Deletes expired rows.
    fn delete_expired_rows(&self, now: Timestamp) -> Result<u64, SqliteStoreError> {
        let guard = self.lock()?;
        let deleted = guard
            .execute(
                "DELETE FROM idempotency_keys WHERE expires_at <= ?1",
                params![now.as_unix_millis()],
            )
            .map_err(db_error)?;
        drop(guard);
        Ok(u64::try_from(deleted).unwrap_or(u64::MAX))
    }
}

impl ClaimStore for SqliteClaimStore {
    fn try_insert_started(&self, claim: &NewClaim) -> Result<InsertOutcome, StoreError> {
        self.insert_started(claim).map_err(StoreError::from)
    }

    fn conditional_update(
        &self,
        key: &ClaimKey,
        guard: &UpdateGuard,
        update: &RecordUpdate,
    ) -> Result<u64, StoreError> {
        self.update_guarded(key, guard, update).map_err(StoreError::from)
    }

    fn read_by_key(&self, key: &ClaimKey) -> Result<Option<IdempotencyRecord>, StoreError> {
        self.read_record(key).map_err(StoreError::from)
    }

    fn delete_expired(&self, now: Timestamp) -> Result<u64, StoreError> {
        self.delete_expired_rows(now).map_err(StoreError::from)
    }
}

// ============================================================================
// SECTION: Row Decoding
// ============================================================================

/// Untrusted row as read from `SQLite`.
struct RawRecord {
    /// Stored nonce text.
    claim_nonce: String,
    /// Stored status label.
    status: String,
    /// Claim time (unix millis).
    started_at: i64,
    /// Completion time (unix millis).
    completed_at: Option<i64>,
    /// Expiry time (unix millis).
    expires_at: i64,
    /// Stored attempt counter.
    attempt_count: i64,
    /// Canonical response bytes.
    response_json: Option<Vec<u8>>,
}

impl RawRecord {
    /// Validates the row and converts it into a record.
    fn into_record(self, key: &ClaimKey) -> Result<IdempotencyRecord, SqliteStoreError> {
        let claim_nonce = ClaimNonce::parse(self.claim_nonce)
            .map_err(|err| SqliteStoreError::Corrupt(format!("{key}: {err}")))?;
        let status = RecordStatus::from_label(&self.status).ok_or_else(|| {
            SqliteStoreError::Corrupt(format!("{key}: unknown status {}", self.status))
        })?;
        let attempt_count = u32::try_from(self.attempt_count)
            .ok()
            .filter(|count| *count >= 1)
            .ok_or_else(|| {
                SqliteStoreError::Corrupt(format!(
                    "{key}: invalid attempt_count {}",
                    self.attempt_count
                ))
            })?;
        let response = self.response_json.as_deref().map(decode_response).transpose()?;
        if status == RecordStatus::Succeeded && response.is_none() {
            return Err(SqliteStoreError::Corrupt(format!("{key}: succeeded without response")));
        }
        Ok(IdempotencyRecord {
            key: key.clone(),
            claim_nonce,
            status,
            started_at: Timestamp::from_unix_millis(self.started_at),
            completed_at: self.completed_at.map(Timestamp::from_unix_millis),
            expires_at: Timestamp::from_unix_millis(self.expires_at),
            attempt_count,
            response,
        })
    }
}

/// Encodes a response as bounded canonical JSON.
fn encode_response(response: &SanitizedResponse) -> Result<Vec<u8>, SqliteStoreError> {
    let bytes =
        canonical_json_bytes(response).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    if bytes.len() > MAX_RESPONSE_BYTES {
        return Err(SqliteStoreError::TooLarge {
            max_bytes: MAX_RESPONSE_BYTES,
            actual_bytes: bytes.len(),
        });
    }
    Ok(bytes)
}

/// Decodes stored response bytes, rejecting oversized or nested payloads.
fn decode_response(bytes: &[u8]) -> Result<SanitizedResponse, SqliteStoreError> {
    if bytes.len() > MAX_RESPONSE_BYTES {
        return Err(SqliteStoreError::TooLarge {
            max_bytes: MAX_RESPONSE_BYTES,
            actual_bytes: bytes.len(),
        });
    }
    serde_json::from_slice(bytes).map_err(|err| SqliteStoreError::Corrupt(err.to_string()))
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    if path.as_os_str().is_empty() {
        return Err(SqliteStoreError::Invalid("store path must not be empty".to_string()));
    }
    if path.display().to_string().len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    if path
        .components()
        .any(|component| component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH)
    {
        return Err(SqliteStoreError::Invalid(
            "store path contains an overlong component".to_string(),
        ));
    }
    if path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with durability pragmas applied.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags).map_err(db_error)?;
    connection.busy_timeout(Duration::from_millis(config.busy_timeout_ms)).map_err(db_error)?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(db_error)?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(db_error)?;
    Ok(connection)
}

/// Creates the schema or validates the existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(db_error)?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(db_error)?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(db_error)?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(db_error)?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS idempotency_keys (
                    tenant TEXT NOT NULL,
                    scope TEXT NOT NULL,
                    key_hash TEXT NOT NULL,
                    claim_nonce TEXT NOT NULL,
                    status TEXT NOT NULL
                        CHECK (status IN ('started', 'succeeded', 'failed')),
                    started_at INTEGER NOT NULL,
                    completed_at INTEGER,
                    expires_at INTEGER NOT NULL,
                    attempt_count INTEGER NOT NULL CHECK (attempt_count >= 1),
                    response_json BLOB,
                    UNIQUE (tenant, scope, key_hash)
                );
                CREATE INDEX IF NOT EXISTS idx_idempotency_keys_expires_at
                    ON idempotency_keys (expires_at);",
            )
            .map_err(db_error)?;
        }
        Some(SCHEMA_VERSION) => {}
        Some(other) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "expected schema version {SCHEMA_VERSION}, found {other}"
            )));
        }
    }
    tx.commit().map_err(db_error)?;
    Ok(())
}
