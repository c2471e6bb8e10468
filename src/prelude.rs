//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use storage_guard::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{GuardError, Result};

// Stores
pub use crate::store::memory::{MemorySecureStore, MemoryStore};
#[cfg(feature = "sqlite")]
pub use crate::store::sqlite::{SqliteSecureStore, SqliteStore};
pub use crate::store::{KvStore, SecureStore, StoreError, StoreErrorKind};

// Guard
pub use crate::guard::compress::compact_text;
pub use crate::guard::namespace::ProtectionRegistry;
pub use crate::guard::severity::{PressureLevel, StorageInfo};
pub use crate::guard::tiers::{ReclaimPlan, ReclaimReport, ReclaimStep, StepOutcome, Tier};
pub use crate::guard::{CapacityCheck, SecureWrite, StorageGuard, Trigger};

// Logging
pub use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle, spawn_logger};
