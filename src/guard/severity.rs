//! Store sizing and severity classification.
//!
//! Usage is always recomputed by enumerating every entry; there is no running
//! counter that could drift from the store's real contents.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use std::fmt;

use serde::Serialize;

use crate::core::config::CapacityConfig;
use crate::store::{KvStore, StoreResult};

/// Severity of the primary store's usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureLevel {
    Healthy,
    Warning,
    Critical,
}

impl PressureLevel {
    /// Classify a usage ratio against the configured thresholds (strictly greater).
    #[must_use]
    pub fn from_ratio(ratio: f64, cfg: &CapacityConfig) -> Self {
        if ratio > cfg.critical_ratio {
            Self::Critical
        } else if ratio > cfg.warning_ratio {
            Self::Warning
        } else {
            Self::Healthy
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One entry above the large-item threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LargeItem {
    pub key: String,
    pub size: u64,
}

/// Snapshot of store health.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageInfo {
    /// Configured ceiling.
    pub total_size: u64,
    /// Sum of entry sizes in bytes.
    pub used_size: u64,
    /// `total_size - used_size`, floored at zero.
    pub available_size: u64,
    /// Entries above the large-item threshold, largest first.
    pub large_items: Vec<LargeItem>,
    pub entry_count: usize,
    /// Keys whose read failed during enumeration.
    pub unreadable_keys: Vec<String>,
}

impl StorageInfo {
    #[must_use]
    pub fn usage_ratio(&self) -> f64 {
        if self.total_size == 0 {
            return 1.0;
        }
        self.used_size as f64 / self.total_size as f64
    }

    #[must_use]
    pub fn usage_pct(&self) -> f64 {
        self.usage_ratio() * 100.0
    }

    #[must_use]
    pub fn level(&self, cfg: &CapacityConfig) -> PressureLevel {
        PressureLevel::from_ratio(self.usage_ratio(), cfg)
    }
}

/// Enumerate `store` and size every entry.
///
/// Fails only when enumeration itself fails; unreadable entries are reported
/// in `unreadable_keys` and count as zero bytes.
pub fn measure<S: KvStore + ?Sized>(store: &S, cfg: &CapacityConfig) -> StoreResult<StorageInfo> {
    let keys = store.all_keys()?;
    let mut used_size = 0u64;
    let mut large_items = Vec::new();
    let mut unreadable_keys = Vec::new();

    for key in &keys {
        match store.get_item(key) {
            Ok(value) => {
                let size = value.map_or(0, |v| v.len() as u64);
                used_size += size;
                if size > cfg.large_item_threshold_bytes {
                    large_items.push(LargeItem {
                        key: key.clone(),
                        size,
                    });
                }
            }
            Err(_) => unreadable_keys.push(key.clone()),
        }
    }

    large_items.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.key.cmp(&b.key)));

    Ok(StorageInfo {
        total_size: cfg.total_size_bytes,
        used_size,
        available_size: cfg.total_size_bytes.saturating_sub(used_size),
        large_items,
        entry_count: keys.len(),
        unreadable_keys,
    })
}
