//! Key-value store seams: the persistent store the guard measures and reclaims,
//! and the size-constrained secure store it splits oversized items into.
//!
//! Adapters report failures as [`StoreError`] carrying a typed
//! [`StoreErrorKind`]. Adapters that cannot classify their own errors report
//! [`StoreErrorKind::Unclassified`]; for those the guard falls back to
//! [`message_indicates_full`], which pattern-matches the message text and the
//! numeric code the way SQLite-backed mobile stores surface "disk full".

#![allow(missing_docs)]

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use thiserror::Error;

/// Numeric result code SQLite uses for "database or disk is full".
pub const SQLITE_FULL_CODE: i32 = 13;

/// Lowercased message fragments that mean the store ran out of room.
const FULL_SIGNATURES: &[&str] = &[
    "database or disk is full",
    "sqlite_full",
    "no space left",
    "disk full",
];

/// Adapter-level result alias.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// What kind of failure an adapter reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// No room left for the write.
    Full,
    /// The backend could not be reached (locked, closed, busy).
    Unavailable,
    /// The stored bytes could not be decoded.
    Corrupt,
    /// The adapter does not know.
    Unclassified,
}

/// Failure surfaced by a store adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    /// Backend-specific numeric code, when one exists.
    pub code: Option<i32>,
    pub message: String,
}

impl StoreError {
    #[must_use]
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    /// An error the adapter could not classify.
    #[must_use]
    pub fn unclassified(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Unclassified, message)
    }

    #[must_use]
    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    /// Typed full signal, or an unclassified error whose text/code says "full".
    #[must_use]
    pub fn is_full(&self) -> bool {
        match self.kind {
            StoreErrorKind::Full => true,
            StoreErrorKind::Unclassified => message_indicates_full(&self.message, self.code),
            StoreErrorKind::Unavailable | StoreErrorKind::Corrupt => false,
        }
    }
}

/// Compatibility shim for stores that only report free-form error text.
#[must_use]
pub fn message_indicates_full(message: &str, code: Option<i32>) -> bool {
    if code == Some(SQLITE_FULL_CODE) {
        return true;
    }
    let lowered = message.to_lowercase();
    FULL_SIGNATURES.iter().any(|sig| lowered.contains(sig))
}

/// The persistent key-value store the guard protects.
///
/// Every call is assumed atomic per key; nothing is transactional across keys.
pub trait KvStore {
    /// Enumerate every key currently stored.
    fn all_keys(&self) -> StoreResult<Vec<String>>;

    /// Read one value. `Ok(None)` when absent.
    fn get_item(&self, key: &str) -> StoreResult<Option<String>>;

    /// Create or overwrite one value.
    fn set_item(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Delete one key. Deleting an absent key is not an error.
    fn remove_item(&self, key: &str) -> StoreResult<()>;

    /// Delete many keys. Stops at the first failure.
    fn multi_remove(&self, keys: &[String]) -> StoreResult<()> {
        for key in keys {
            self.remove_item(key)?;
        }
        Ok(())
    }

    /// Classify an error this adapter produced.
    ///
    /// Adapters that know their own failure modes override this; the default
    /// trusts the kind already recorded on the error.
    fn probe_error_kind(&self, err: &StoreError) -> StoreErrorKind {
        err.kind
    }
}

/// The size-constrained secondary store.
///
/// Read failures are interpreted by the guard as "absent or corrupt".
pub trait SecureStore {
    fn get_item(&self, key: &str) -> StoreResult<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> StoreResult<()>;

    fn remove_item(&self, key: &str) -> StoreResult<()>;
}

/// Placeholder for deployments without a secure store (e.g. web targets).
///
/// Uninhabited: a guard typed with it can only ever hold `None`.
#[derive(Debug, Clone, Copy)]
pub enum NoSecureStore {}

impl SecureStore for NoSecureStore {
    fn get_item(&self, _key: &str) -> StoreResult<Option<String>> {
        match *self {}
    }

    fn set_item(&self, _key: &str, _value: &str) -> StoreResult<()> {
        match *self {}
    }

    fn remove_item(&self, _key: &str) -> StoreResult<()> {
        match *self {}
    }
}

/// Decide whether `err` means "store full", asking the adapter first.
pub fn is_store_full<S: KvStore + ?Sized>(store: &S, err: &StoreError) -> bool {
    match store.probe_error_kind(err) {
        StoreErrorKind::Full => true,
        StoreErrorKind::Unclassified => message_indicates_full(&err.message, err.code),
        StoreErrorKind::Unavailable | StoreErrorKind::Corrupt => false,
    }
}
