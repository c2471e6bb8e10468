//! Configuration system: TOML file + env var overrides + production defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{GuardError, Result};

/// Upper bound for any retention window, in days.
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Full guard configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub capacity: CapacityConfig,
    pub retention: RetentionConfig,
    pub secure: SecureStoreConfig,
    pub namespaces: NamespaceConfig,
    pub paths: PathsConfig,
    pub logging: LoggingConfig,
}

/// Capacity ceiling and severity thresholds for the primary store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CapacityConfig {
    /// Self-imposed ceiling; not a device-reported capacity.
    pub total_size_bytes: u64,
    /// Usage ratio above which routine reclamation runs.
    pub warning_ratio: f64,
    /// Usage ratio above which emergency reclamation runs.
    pub critical_ratio: f64,
    /// Entries above this size are reported as large items.
    pub large_item_threshold_bytes: u64,
    /// Usage ratio at which `monitor` starts warning.
    pub monitor_warning_ratio: f64,
    /// How many large items `monitor` lists.
    pub monitor_top_items: usize,
}

/// Retention windows and compaction gates for the reclamation tiers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetentionConfig {
    /// Meal/session data retention during routine reclamation.
    pub routine_meal_days: u32,
    /// Meal/session data retention during emergency reclamation.
    pub emergency_meal_days: u32,
    /// How many of the largest entries routine reclamation compacts.
    pub compress_top_items: usize,
    /// Entries at or below this size are never compacted by routine reclamation.
    pub compress_min_bytes: u64,
    /// Compacted form is committed only below this fraction of the original.
    pub compress_max_ratio: f64,
    /// Essential entries at or below this size are skipped by emergency compaction.
    pub compact_essential_min_bytes: u64,
}

/// Secondary secure-store limits and well-known keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SecureStoreConfig {
    /// Per-item ceiling in bytes.
    pub item_ceiling_bytes: usize,
    /// Headroom subtracted from the ceiling to size chunks.
    pub chunk_buffer_bytes: usize,
    /// Keys inspected by the oversized-item sweep.
    pub sweep_keys: Vec<String>,
    /// Keys deleted outright during emergency reclamation.
    pub emergency_purge_keys: Vec<String>,
}

/// Extra key-classification rules layered on top of the built-in namespaces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct NamespaceConfig {
    /// Glob patterns (`*`, `?`) for keys that reclamation must never delete.
    pub protected_patterns: Vec<String>,
    /// Additional substrings treated as temporary data.
    pub extra_temporary: Vec<String>,
}

/// Filesystem locations used by the CLI and logger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub store_db: PathBuf,
    pub jsonl_log: PathBuf,
    pub activity_db: PathBuf,
}

/// Activity logging switches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    /// Mirror events into the SQLite activity table.
    pub sqlite: bool,
    pub max_jsonl_bytes: u64,
    /// Activity rows older than this are pruned when the logger starts.
    pub activity_retention_days: u32,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            total_size_bytes: 6 * 1024 * 1024,
            warning_ratio: 0.70,
            critical_ratio: 0.85,
            large_item_threshold_bytes: 512,
            monitor_warning_ratio: 0.80,
            monitor_top_items: 5,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            routine_meal_days: 30,
            emergency_meal_days: 3,
            compress_top_items: 3,
            compress_min_bytes: 1024,
            compress_max_ratio: 0.9,
            compact_essential_min_bytes: 1000,
        }
    }
}

impl Default for SecureStoreConfig {
    fn default() -> Self {
        Self {
            item_ceiling_bytes: 2048,
            chunk_buffer_bytes: 100,
            sweep_keys: ["persist:auth", "user_data", "meal_data"]
                .map(String::from)
                .to_vec(),
            emergency_purge_keys: [
                "pendingMeal",
                "cachedUserData",
                "largeImageData",
                "auth_token_large",
                "meal_cache",
                "user_profile_cache",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

impl SecureStoreConfig {
    /// Chunk size used when splitting oversized values.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.item_ceiling_bytes.saturating_sub(self.chunk_buffer_bytes)
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[STG-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let cfg = home_dir.join(".config").join("stg").join("config.toml");
        let data = home_dir.join(".local").join("share").join("stg");
        Self {
            config_file: cfg,
            store_db: data.join("store.sqlite3"),
            jsonl_log: data.join("activity.jsonl"),
            activity_db: data.join("activity.sqlite3"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sqlite: false,
            max_jsonl_bytes: 16 * 1024 * 1024,
            activity_retention_days: 30,
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| GuardError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(GuardError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for log correlation.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // capacity
        set_parsed(
            &mut lookup,
            "STG_CAPACITY_TOTAL_SIZE_BYTES",
            &mut self.capacity.total_size_bytes,
        )?;
        set_parsed(
            &mut lookup,
            "STG_CAPACITY_WARNING_RATIO",
            &mut self.capacity.warning_ratio,
        )?;
        set_parsed(
            &mut lookup,
            "STG_CAPACITY_CRITICAL_RATIO",
            &mut self.capacity.critical_ratio,
        )?;
        set_parsed(
            &mut lookup,
            "STG_CAPACITY_LARGE_ITEM_THRESHOLD_BYTES",
            &mut self.capacity.large_item_threshold_bytes,
        )?;

        // retention
        set_parsed(
            &mut lookup,
            "STG_RETENTION_ROUTINE_DAYS",
            &mut self.retention.routine_meal_days,
        )?;
        set_parsed(
            &mut lookup,
            "STG_RETENTION_EMERGENCY_DAYS",
            &mut self.retention.emergency_meal_days,
        )?;

        // secure store
        set_parsed(
            &mut lookup,
            "STG_SECURE_ITEM_CEILING_BYTES",
            &mut self.secure.item_ceiling_bytes,
        )?;
        set_parsed(
            &mut lookup,
            "STG_SECURE_CHUNK_BUFFER_BYTES",
            &mut self.secure.chunk_buffer_bytes,
        )?;

        // paths
        if let Some(raw) = lookup("STG_PATHS_STORE_DB") {
            self.paths.store_db = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("STG_PATHS_JSONL_LOG") {
            self.paths.jsonl_log = PathBuf::from(raw);
        }

        // logging
        set_parsed(&mut lookup, "STG_LOGGING_ENABLED", &mut self.logging.enabled)?;
        set_parsed(&mut lookup, "STG_LOGGING_SQLITE", &mut self.logging.sqlite)?;
        set_parsed(
            &mut lookup,
            "STG_LOGGING_ACTIVITY_RETENTION_DAYS",
            &mut self.logging.activity_retention_days,
        )?;

        Ok(())
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        let cap = &self.capacity;
        if cap.total_size_bytes == 0 {
            return Err(GuardError::InvalidConfig {
                details: "capacity.total_size_bytes must be > 0".to_string(),
            });
        }
        for (name, val) in [
            ("warning_ratio", cap.warning_ratio),
            ("critical_ratio", cap.critical_ratio),
            ("monitor_warning_ratio", cap.monitor_warning_ratio),
        ] {
            if !(val > 0.0 && val <= 1.0) {
                return Err(GuardError::InvalidConfig {
                    details: format!("capacity.{name} must be in (0, 1], got {val}"),
                });
            }
        }
        if cap.warning_ratio >= cap.critical_ratio {
            return Err(GuardError::InvalidConfig {
                details: format!(
                    "capacity.warning_ratio ({}) must be < capacity.critical_ratio ({})",
                    cap.warning_ratio, cap.critical_ratio
                ),
            });
        }

        let ret = &self.retention;
        for (name, days) in [
            ("retention.routine_meal_days", ret.routine_meal_days),
            ("retention.emergency_meal_days", ret.emergency_meal_days),
            ("logging.activity_retention_days", self.logging.activity_retention_days),
        ] {
            if days > MAX_RETENTION_DAYS {
                return Err(GuardError::InvalidConfig {
                    details: format!("{name} must be <= {MAX_RETENTION_DAYS}, got {days}"),
                });
            }
        }
        if ret.emergency_meal_days > ret.routine_meal_days {
            return Err(GuardError::InvalidConfig {
                details: "retention.emergency_meal_days must be <= retention.routine_meal_days"
                    .to_string(),
            });
        }
        if !(ret.compress_max_ratio > 0.0 && ret.compress_max_ratio <= 1.0) {
            return Err(GuardError::InvalidConfig {
                details: format!(
                    "retention.compress_max_ratio must be in (0, 1], got {}",
                    ret.compress_max_ratio
                ),
            });
        }

        if self.secure.chunk_buffer_bytes >= self.secure.item_ceiling_bytes {
            return Err(GuardError::InvalidConfig {
                details: format!(
                    "secure.chunk_buffer_bytes ({}) must be < secure.item_ceiling_bytes ({})",
                    self.secure.chunk_buffer_bytes, self.secure.item_ceiling_bytes
                ),
            });
        }

        for pattern in &self.namespaces.protected_patterns {
            crate::guard::namespace::validate_glob_pattern(pattern)?;
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_parsed<T, F>(lookup: &mut F, name: &str, slot: &mut T) -> Result<()>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = raw.trim().parse::<T>().map_err(|error| GuardError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}
