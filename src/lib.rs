#![forbid(unsafe_code)]

//! Storage guard (stg): keeps an application's key-value store from filling up.
//!
//! Before a write-heavy operation the caller asks the guard whether it may
//! proceed. The guard probes the store, measures it, classifies pressure, and
//! reclaims space in two tiers:
//! 1. **Routine** - expire old meal data, compact the largest entries, fit
//!    oversized secure entries, clear scratch keys
//! 2. **Emergency** - routine plus cache invalidation, media purge, and the
//!    broad non-essential denylist
//!
//! Auth state is never deleted.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use storage_guard::prelude::*;
//!
//! let guard = StorageGuard::new(Config::default(), MemoryStore::new())?;
//! if guard.ensure_capacity() {
//!     // safe to write
//! }
//! # Ok::<(), GuardError>(())
//! ```

pub mod prelude;

pub mod core;
pub mod daemon;
pub mod guard;
pub mod logger;
pub mod store;
