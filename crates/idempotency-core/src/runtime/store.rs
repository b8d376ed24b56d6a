// crates/idempotency-core/src/runtime/store.rs
// ============================================================================
// Module: In-Memory Claim Store
// Description: Mutex-guarded claim store for tests and examples.
// Purpose: Provide an atomic store implementation without external deps.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! [`InMemoryClaimStore`] runs every primitive under one mutex, which makes
//! inserts and conditional updates trivially atomic. It is not durable and
//! is not intended for production use. [`SharedClaimStore`] erases the
//! backend type so hosts can pick a store from configuration.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::core::ClaimKey;
use crate::core::IdempotencyRecord;
use crate::core::Timestamp;
use crate::interfaces::ClaimStore;
use crate::interfaces::InsertOutcome;
use crate::interfaces::NewClaim;
use crate::interfaces::RecordUpdate;
use crate::interfaces::StoreError;
use crate::interfaces::UpdateGuard;

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// In-memory claim store for tests and examples.
#[derive(Debug, Default, Clone)]
pub struct InMemoryClaimStore {
    /// Records keyed by claim key.
    records: Arc<Mutex<BTreeMap<ClaimKey, IdempotencyRecord>>>,
}

impl InMemoryClaimStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `record` unconditionally, replacing any existing record.
    ///
    /// Test seeding only; the coordinator never calls this.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Store`] when the mutex is poisoned.
    pub fn seed(&self, record: IdempotencyRecord) -> Result<(), StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::Store("claim store mutex poisoned".to_string()))?
            .insert(record.key.clone(), record);
        Ok(())
    }

    /// Removes the record at `key`, returning it when present.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Store`] when the mutex is poisoned.
    pub fn remove(&self, key: &ClaimKey) -> Result<Option<IdempotencyRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .map_err(|_| StoreError::Store("claim store mutex poisoned".to_string()))?
            .remove(key))
    }

    /// Returns the number of stored records.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Store`] when the mutex is poisoned.
    pub fn record_count(&self) -> Result<usize, StoreError> {
        Ok(self
            .records
            .lock()
            .map_err(|_| StoreError::Store("claim store mutex poisoned".to_string()))?
            .len())
    }
}

impl ClaimStore for InMemoryClaimStore {
    fn try_insert_started(&self, claim: &NewClaim) -> Result<InsertOutcome, StoreError> {
        let mut guard = self
            .records
            .lock()
            .map_err(|_| StoreError::Store("claim store mutex poisoned".to_string()))?;
        if guard.contains_key(&claim.key) {
            return Ok(InsertOutcome::Duplicate);
        }
        guard.insert(claim.key.clone(), claim.clone().into_record());
        drop(guard);
        Ok(InsertOutcome::Inserted)
    }

    fn conditional_update(
        &self,
        key: &ClaimKey,
        guard: &UpdateGuard,
        update: &RecordUpdate,
    ) -> Result<u64, StoreError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| StoreError::Store("claim store mutex poisoned".to_string()))?;
        let Some(record) = records.get_mut(key) else {
            return Ok(0);
        };
        if !guard.matches(record) {
            return Ok(0);
        }
        update.apply(record)?;
        drop(records);
        Ok(1)
    }

    fn read_by_key(&self, key: &ClaimKey) -> Result<Option<IdempotencyRecord>, StoreError> {
        let guard = self
            .records
            .lock()
            .map_err(|_| StoreError::Store("claim store mutex poisoned".to_string()))?;
        Ok(guard.get(key).cloned())
    }

    fn delete_expired(&self, now: Timestamp) -> Result<u64, StoreError> {
        let mut guard = self
            .records
            .lock()
            .map_err(|_| StoreError::Store("claim store mutex poisoned".to_string()))?;
        let before = guard.len();
        guard.retain(|_, record| record.expires_at > now);
        let removed = before - guard.len();
        drop(guard);
        Ok(u64::try_from(removed).unwrap_or(u64::MAX))
    }
}

// ============================================================================
// SECTION: Shared Store Wrapper
// ============================================================================

/// Shared claim store backed by an `Arc` trait object.
#[derive(Clone)]
pub struct SharedClaimStore {
    /// Inner store implementation.
    inner: Arc<dyn ClaimStore + Send + Sync>,
}

impl SharedClaimStore {
    /// Wraps a claim store in a shared, clonable wrapper.
    #[must_use]
    pub fn from_store(store: impl ClaimStore + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    /// Wraps an existing shared store.
    #[must_use]
    pub const fn new(store: Arc<dyn ClaimStore + Send + Sync>) -> Self {
        Self {
            inner: store,
        }
    }
}

impl ClaimStore for SharedClaimStore {
    fn try_insert_started(&self, claim: &NewClaim) -> Result<InsertOutcome, StoreError> {
        self.inner.try_insert_started(claim)
    }

    fn conditional_update(
        &self,
        key: &ClaimKey,
        guard: &UpdateGuard,
        update: &RecordUpdate,
    ) -> Result<u64, StoreError> {
        self.inner.conditional_update(key, guard, update)
    }

    fn read_by_key(&self, key: &ClaimKey) -> Result<Option<IdempotencyRecord>, StoreError> {
        self.inner.read_by_key(key)
    }

    fn delete_expired(&self, now: Timestamp) -> Result<u64, StoreError> {
        self.inner.delete_expired(now)
    }
}
