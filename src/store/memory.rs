//! In-process adapters with an optional byte budget and fault injection.
//!
//! `MemoryStore` is the reference [`KvStore`]: values live in a sorted map,
//! writes that would push the summed value size past the budget fail with
//! [`StoreErrorKind::Full`]. Test suites use the injection hooks to reproduce
//! the failure modes mobile stores exhibit (unreadable rows, failing writes,
//! enumeration failures) without a real device.

#![allow(missing_docs)]

use std::collections::{BTreeMap, HashSet};

use parking_lot::Mutex;

use super::{KvStore, SecureStore, StoreError, StoreErrorKind, StoreResult};

#[derive(Debug, Default)]
struct MemoryState {
    entries: BTreeMap<String, String>,
    capacity_bytes: Option<u64>,
    /// Report full conditions as unclassified text instead of a typed kind.
    untyped_errors: bool,
    write_failure: Option<StoreError>,
    enumeration_failure: Option<StoreError>,
    unreadable: HashSet<String>,
    removed_log: Vec<String>,
}

impl MemoryState {
    fn used_bytes(&self) -> u64 {
        self.entries.values().map(|v| v.len() as u64).sum()
    }

    fn full_error(&self, needed: u64) -> StoreError {
        let message = format!("database or disk is full (needed {needed} bytes)");
        if self.untyped_errors {
            StoreError::unclassified(message).with_code(super::SQLITE_FULL_CODE)
        } else {
            StoreError::new(StoreErrorKind::Full, message)
        }
    }
}

/// Persistent-store stand-in backed by a `BTreeMap`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Unbounded store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that refuses writes once the summed value size would exceed `bytes`.
    #[must_use]
    pub fn with_capacity(bytes: u64) -> Self {
        let store = Self::default();
        store.state.lock().capacity_bytes = Some(bytes);
        store
    }

    /// Surface full conditions as plain text + code 13 instead of a typed kind.
    #[must_use]
    pub fn with_untyped_errors(self) -> Self {
        self.state.lock().untyped_errors = true;
        self
    }

    /// Seed an entry, bypassing the byte budget and any injected faults.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.state.lock().entries.insert(key.into(), value.into());
    }

    /// Direct read for assertions; ignores injected faults.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.state.lock().entries.get(key).cloned()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.state.lock().entries.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Sum of stored value sizes in bytes.
    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.state.lock().used_bytes()
    }

    /// Every key removed through the trait, in call order.
    #[must_use]
    pub fn removed_log(&self) -> Vec<String> {
        self.state.lock().removed_log.clone()
    }

    /// Make every subsequent `set_item` fail with `err` (until cleared).
    pub fn fail_writes_with(&self, err: Option<StoreError>) {
        self.state.lock().write_failure = err;
    }

    /// Make `all_keys` fail with `err` (until cleared).
    pub fn fail_enumeration_with(&self, err: Option<StoreError>) {
        self.state.lock().enumeration_failure = err;
    }

    /// Make reads of `key` fail as corrupt.
    pub fn mark_unreadable(&self, key: impl Into<String>) {
        self.state.lock().unreadable.insert(key.into());
    }
}

impl KvStore for MemoryStore {
    fn all_keys(&self) -> StoreResult<Vec<String>> {
        let state = self.state.lock();
        if let Some(err) = &state.enumeration_failure {
            return Err(err.clone());
        }
        Ok(state.entries.keys().cloned().collect())
    }

    fn get_item(&self, key: &str) -> StoreResult<Option<String>> {
        let state = self.state.lock();
        if state.unreadable.contains(key) {
            return Err(StoreError::new(
                StoreErrorKind::Corrupt,
                format!("row for {key} is unreadable"),
            ));
        }
        Ok(state.entries.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        if let Some(err) = &state.write_failure {
            return Err(err.clone());
        }
        if let Some(capacity) = state.capacity_bytes {
            let previous = state.entries.get(key).map_or(0, |v| v.len() as u64);
            let projected = state.used_bytes() - previous + value.len() as u64;
            if projected > capacity {
                return Err(state.full_error(value.len() as u64));
            }
        }
        state.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.entries.remove(key);
        state.unreadable.remove(key);
        state.removed_log.push(key.to_string());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SecureState {
    entries: BTreeMap<String, String>,
    item_limit: Option<usize>,
    unreadable: HashSet<String>,
    undeletable: HashSet<String>,
    write_failure_after: Option<usize>,
    writes: usize,
    removed_log: Vec<String>,
}

/// Secure-store stand-in. Optionally rejects values above a hard item limit.
#[derive(Debug, Default)]
pub struct MemorySecureStore {
    state: Mutex<SecureState>,
}

impl MemorySecureStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject writes whose value exceeds `bytes`.
    #[must_use]
    pub fn with_item_limit(bytes: usize) -> Self {
        let store = Self::default();
        store.state.lock().item_limit = Some(bytes);
        store
    }

    /// Seed an entry, bypassing the item limit (simulates legacy oversized data).
    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.state.lock().entries.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.state.lock().entries.get(key).cloned()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.state.lock().entries.keys().cloned().collect()
    }

    #[must_use]
    pub fn removed_log(&self) -> Vec<String> {
        self.state.lock().removed_log.clone()
    }

    /// Make reads of `key` fail.
    pub fn mark_unreadable(&self, key: impl Into<String>) {
        self.state.lock().unreadable.insert(key.into());
    }

    /// Make removals of `key` fail.
    pub fn fail_removals_of(&self, key: impl Into<String>) {
        self.state.lock().undeletable.insert(key.into());
    }

    /// Let `n` more writes succeed, then fail every write after that.
    pub fn fail_writes_after(&self, n: Option<usize>) {
        let mut state = self.state.lock();
        state.write_failure_after = n;
        state.writes = 0;
    }
}

impl SecureStore for MemorySecureStore {
    fn get_item(&self, key: &str) -> StoreResult<Option<String>> {
        let state = self.state.lock();
        if state.unreadable.contains(key) {
            return Err(StoreError::new(
                StoreErrorKind::Corrupt,
                format!("could not decrypt {key}"),
            ));
        }
        Ok(state.entries.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        if let Some(limit) = state.write_failure_after
            && state.writes >= limit
        {
            return Err(StoreError::unclassified(format!("keystore rejected {key}")));
        }
        if let Some(limit) = state.item_limit
            && value.len() > limit
        {
            return Err(StoreError::new(
                StoreErrorKind::Full,
                format!("value for {key} is {} bytes, limit {limit}", value.len()),
            ));
        }
        state.writes += 1;
        state.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        if state.undeletable.contains(key) {
            return Err(StoreError::unclassified(format!("keystore refused to delete {key}")));
        }
        state.entries.remove(key);
        state.unreadable.remove(key);
        state.removed_log.push(key.to_string());
        Ok(())
    }
}
