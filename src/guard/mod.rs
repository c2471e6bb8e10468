//! Storage guard: probes the primary store, classifies pressure, and runs the
//! matching reclamation tier before a write-heavy operation.
//!
//! Every primary-store deletion funnels through [`StorageGuard::remove_primary`],
//! which consults the [`ProtectionRegistry`]; individual steps never decide on
//! their own whether an auth key may go.

#![allow(missing_docs)]
#![allow(clippy::cast_possible_truncation)]

pub mod chunking;
pub mod compress;
pub mod namespace;
pub mod severity;
pub mod tiers;

use std::time::Instant;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::core::config::Config;
use crate::core::errors::{GuardError, Result};
use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle};
use crate::store::{KvStore, NoSecureStore, SecureStore, is_store_full};

use self::compress::{Compaction, compact_text};
use self::namespace::{
    DIAGNOSTICS, ESSENTIAL, KeyRules, MEAL_DATA, MEDIA, NON_ESSENTIAL, PERSISTED_STATE,
    PROBE, PROBE_KEY_PREFIX, ProtectionRegistry, TEMPORARY,
};
use self::severity::{LargeItem, PressureLevel, StorageInfo};
use self::tiers::{ReclaimPlan, ReclaimReport, ReclaimStep, StepOutcome, Tier};

/// Best-effort hook that drops an external in-memory cache.
pub type CacheInvalidator = Box<dyn Fn() -> std::result::Result<(), String> + Send + Sync>;

/// Optional hint asking the runtime to release memory.
pub type MemoryHint = Box<dyn Fn() + Send + Sync>;

/// JSON fields consulted, in order, for a meal entry's age.
const TIMESTAMP_FIELDS: [&str; 3] = ["timestamp", "created_at", "upload_time"];

const PROBE_VALUE: &str = "storage_probe";

/// Why a capacity check ended up where it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// A probe write failed with a store-full signal.
    ProbeFull,
    /// Usage above the critical ratio.
    CriticalRatio,
    /// Usage above the warning ratio.
    WarningRatio,
    /// The check itself failed; escalated as a precaution.
    CheckFailed,
    /// No reclamation needed.
    Healthy,
}

impl Trigger {
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::ProbeFull => "probe reported store full",
            Self::CriticalRatio => "usage above critical ratio",
            Self::WarningRatio => "usage above warning ratio",
            Self::CheckFailed => "capacity check failed",
            Self::Healthy => "healthy",
        }
    }
}

/// Full result of [`StorageGuard::check_capacity`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapacityCheck {
    /// Whether the caller may proceed with its write.
    pub ok: bool,
    pub level: PressureLevel,
    pub trigger: Trigger,
    /// Measurement, when the check got that far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<StorageInfo>,
    /// Tier report, when a tier ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ReclaimReport>,
    /// Secure sweep outcome on the healthy path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep: Option<StepOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// How `store_with_size_guard` ended up persisting a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SecureWrite {
    Direct,
    Compacted { original_len: usize, stored_len: usize },
    Split { chunks: usize },
}

/// Age verdict for one meal/session entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MealAge {
    Fresh,
    Expired,
    Corrupt(&'static str),
}

/// Storage-pressure guard over a primary store and an optional secure store.
pub struct StorageGuard<P, S = NoSecureStore> {
    config: Config,
    primary: P,
    secure: Option<S>,
    protection: ProtectionRegistry,
    cache_invalidator: Option<CacheInvalidator>,
    memory_hint: Option<MemoryHint>,
    logger: Option<ActivityLoggerHandle>,
}

impl<P: KvStore> StorageGuard<P, NoSecureStore> {
    /// Guard without a secure store. Fails with `InvalidConfig` if `config`
    /// does not validate.
    pub fn new(config: Config, primary: P) -> Result<Self> {
        config.validate()?;
        let protection = ProtectionRegistry::new(&config.namespaces.protected_patterns)?;
        Ok(Self {
            config,
            primary,
            secure: None,
            protection,
            cache_invalidator: None,
            memory_hint: None,
            logger: None,
        })
    }
}

impl<P: KvStore, S: SecureStore> StorageGuard<P, S> {
    /// Attach a secure store, replacing any previous one.
    #[must_use]
    pub fn with_secure_store<T: SecureStore>(self, secure: T) -> StorageGuard<P, T> {
        StorageGuard {
            config: self.config,
            primary: self.primary,
            secure: Some(secure),
            protection: self.protection,
            cache_invalidator: self.cache_invalidator,
            memory_hint: self.memory_hint,
            logger: self.logger,
        }
    }

    #[must_use]
    pub fn with_cache_invalidator(
        mut self,
        hook: impl Fn() -> std::result::Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.cache_invalidator = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn with_memory_hint(mut self, hint: impl Fn() + Send + Sync + 'static) -> Self {
        self.memory_hint = Some(Box::new(hint));
        self
    }

    #[must_use]
    pub fn with_logger(mut self, logger: ActivityLoggerHandle) -> Self {
        self.logger = Some(logger);
        self
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn primary(&self) -> &P {
        &self.primary
    }

    #[must_use]
    pub fn secure(&self) -> Option<&S> {
        self.secure.as_ref()
    }

    /// Swap in a new configuration. The current one is kept if the new
    /// one fails validation.
    pub fn reconfigure(&mut self, config: Config) -> Result<()> {
        config.validate()?;
        self.protection = ProtectionRegistry::new(&config.namespaces.protected_patterns)?;
        self.config = config;
        Ok(())
    }

    // ──────────────────── capacity check ────────────────────

    /// Run the capacity check and report whether the caller may write.
    pub fn ensure_capacity(&self) -> bool {
        self.check_capacity().ok
    }

    /// Probe, measure, classify, and reclaim as needed.
    ///
    /// Never fails: any error in the check escalates to the emergency tier.
    pub fn check_capacity(&self) -> CapacityCheck {
        let started = Instant::now();
        let check = match self.assess() {
            Ok(None) => self.escalate(Tier::Emergency, Trigger::ProbeFull, None),
            Ok(Some(info)) => match self.classify(&info) {
                PressureLevel::Critical => {
                    self.escalate(Tier::Emergency, Trigger::CriticalRatio, Some(info))
                }
                PressureLevel::Warning => {
                    self.escalate(Tier::Routine, Trigger::WarningRatio, Some(info))
                }
                PressureLevel::Healthy => {
                    let sweep = self.run_step(Tier::Routine, &ReclaimStep::SweepSecureStore);
                    CapacityCheck {
                        ok: true,
                        level: PressureLevel::Healthy,
                        trigger: Trigger::Healthy,
                        info: Some(info),
                        report: None,
                        sweep: Some(sweep),
                        error: None,
                    }
                }
            },
            Err(err) => {
                self.emit(ActivityEvent::Error {
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
                let mut check = self.escalate(Tier::Emergency, Trigger::CheckFailed, None);
                check.error = Some(err.to_string());
                check
            }
        };

        self.emit(ActivityEvent::CapacityChecked {
            level: check.level.label().to_string(),
            usage_pct: check.info.as_ref().map_or(0.0, StorageInfo::usage_pct),
            used_bytes: check.info.as_ref().map_or(0, |i| i.used_size),
            ok: check.ok,
            duration_ms: elapsed_ms(started),
        });
        check
    }

    /// Severity of a measurement under this guard's thresholds.
    #[must_use]
    pub fn classify(&self, info: &StorageInfo) -> PressureLevel {
        info.level(&self.config.capacity)
    }

    fn escalate(&self, tier: Tier, trigger: Trigger, info: Option<StorageInfo>) -> CapacityCheck {
        let plan = match tier {
            Tier::Routine => ReclaimPlan::routine(&self.config),
            Tier::Emergency => ReclaimPlan::emergency(&self.config),
        };
        let report = self.run_tier(&plan, trigger.describe());
        let level = match tier {
            Tier::Routine => PressureLevel::Warning,
            Tier::Emergency => PressureLevel::Critical,
        };
        CapacityCheck {
            ok: report.succeeded(),
            level,
            trigger,
            info,
            report: Some(report),
            sweep: None,
            error: None,
        }
    }

    /// Two probes, then a measurement. `Ok(None)` means a probe hit "store full".
    fn assess(&self) -> Result<Option<StorageInfo>> {
        for probe in ["availability", "full_store"] {
            if let Err(err) = self.probe() {
                let store_full = is_store_full(&self.primary, &err);
                self.emit(ActivityEvent::ProbeFailed {
                    probe: probe.to_string(),
                    store_full,
                    message: err.to_string(),
                });
                if store_full {
                    return Ok(None);
                }
            }
        }
        self.snapshot().map(Some)
    }

    fn probe(&self) -> crate::store::StoreResult<()> {
        let key = format!(
            "{PROBE_KEY_PREFIX}{}_{}",
            Utc::now().timestamp_millis(),
            rand::random::<u32>()
        );
        self.primary.set_item(&key, PROBE_VALUE)?;
        self.primary.remove_item(&key)
    }

    /// Measure, then drop entries that could not be read.
    fn snapshot(&self) -> Result<StorageInfo> {
        let info = severity::measure(&self.primary, &self.config.capacity)
            .map_err(|e| GuardError::store("measure", e))?;
        if !info.unreadable_keys.is_empty() {
            let mut outcome = StepOutcome::new(ReclaimStep::ClearTemporary);
            let corrupt = info.unreadable_keys.iter().map(|k| (k.clone(), 0)).collect();
            if let Err(err) = self.remove_primary("drop_unreadable", corrupt, &mut outcome) {
                self.emit(ActivityEvent::Error {
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
            }
        }
        Ok(info)
    }

    // ──────────────────── tiers ────────────────────

    /// Run the routine tier. `false` only when no step could complete.
    pub fn routine_reclaim(&self) -> bool {
        self.run_tier(&ReclaimPlan::routine(&self.config), "requested")
            .succeeded()
    }

    /// Run the emergency tier. `false` only when no step could complete.
    pub fn emergency_reclaim(&self) -> bool {
        self.run_tier(&ReclaimPlan::emergency(&self.config), "requested")
            .succeeded()
    }

    /// Run an arbitrary plan and return the per-step report.
    pub fn run_plan(&self, plan: &ReclaimPlan) -> ReclaimReport {
        self.run_tier(plan, "requested")
    }

    fn run_tier(&self, plan: &ReclaimPlan, trigger: &str) -> ReclaimReport {
        let started = Instant::now();
        self.emit(ActivityEvent::ReclaimStarted {
            tier: plan.tier.to_string(),
            trigger: trigger.to_string(),
        });

        let outcomes: Vec<StepOutcome> = plan
            .steps
            .iter()
            .map(|step| self.run_step(plan.tier, step))
            .collect();

        let report = ReclaimReport {
            tier: plan.tier,
            outcomes,
            duration_ms: elapsed_ms(started),
        };
        self.emit(ActivityEvent::ReclaimCompleted {
            tier: plan.tier.to_string(),
            removed: report.removed(),
            compacted: report.compacted(),
            bytes_freed: report.bytes_freed(),
            failed_steps: report.failed_steps().len(),
            duration_ms: report.duration_ms,
        });
        report
    }

    fn run_step(&self, tier: Tier, step: &ReclaimStep) -> StepOutcome {
        let mut outcome = StepOutcome::new(step.clone());
        let result = match step {
            ReclaimStep::InvalidateExternalCache => self.invalidate_external_cache(),
            ReclaimStep::PurgeMedia => self.purge_matching(&[MEDIA], &[], &mut outcome),
            ReclaimStep::ExpireMealData { retention_days } => {
                self.expire_meal_data(*retention_days, Utc::now(), &mut outcome)
            }
            ReclaimStep::CompressLargest {
                count,
                min_size,
                max_ratio,
            } => self.compress_largest(*count, *min_size, *max_ratio, &mut outcome),
            ReclaimStep::SweepSecureStore => self.sweep_secure_store(&mut outcome),
            ReclaimStep::ClearTemporary => {
                let extra = self.config.namespaces.extra_temporary.clone();
                self.purge_matching(&[TEMPORARY, PROBE], &extra, &mut outcome)
            }
            ReclaimStep::PurgePersistedState => {
                self.purge_matching(&[PERSISTED_STATE], &[], &mut outcome)
            }
            ReclaimStep::PurgeSecureKeys => self.purge_secure_keys(&mut outcome),
            ReclaimStep::PurgeDiagnostics => self.purge_matching(&[DIAGNOSTICS], &[], &mut outcome),
            ReclaimStep::PurgeNonEssential => {
                let extra = self.config.namespaces.extra_temporary.clone();
                self.purge_matching(&[NON_ESSENTIAL], &extra, &mut outcome)
            }
            ReclaimStep::CompactEssential { min_size } => {
                self.compact_essential(*min_size, &mut outcome)
            }
            ReclaimStep::MemoryHint => {
                if let Some(hint) = &self.memory_hint {
                    hint();
                }
                Ok(())
            }
        };

        if let Err(err) = result {
            self.emit(ActivityEvent::StepFailed {
                tier: tier.to_string(),
                step: step.name().to_string(),
                code: err.code().to_string(),
                message: err.to_string(),
            });
            outcome.error = Some(err.to_string());
        }
        outcome
    }

    // ──────────────────── steps ────────────────────

    fn invalidate_external_cache(&self) -> Result<()> {
        match &self.cache_invalidator {
            Some(hook) => hook().map_err(|details| GuardError::Reclamation {
                step: "invalidate_external_cache",
                details,
            }),
            None => Ok(()),
        }
    }

    /// Delete every key matched by any of `rules` or containing one of `extra`.
    fn purge_matching(
        &self,
        rules: &[KeyRules],
        extra: &[String],
        outcome: &mut StepOutcome,
    ) -> Result<()> {
        let targets: Vec<String> = self
            .primary_keys()?
            .into_iter()
            .filter(|key| {
                rules.iter().any(|r| r.matches(key)) || extra.iter().any(|e| key.contains(e.as_str()))
            })
            .collect();
        let sized = self.sized(targets);
        self.remove_primary(outcome.step.name(), sized, outcome)
    }

    fn expire_meal_data(
        &self,
        retention_days: u32,
        now: DateTime<Utc>,
        outcome: &mut StepOutcome,
    ) -> Result<()> {
        // A window reaching past the representable range expires nothing by age.
        let cutoff = now
            .checked_sub_signed(Duration::days(i64::from(retention_days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut doomed = Vec::new();
        for key in self.primary_keys()? {
            if !MEAL_DATA.matches(&key) {
                continue;
            }
            match self.primary.get_item(&key) {
                Ok(Some(value)) if !value.is_empty() => match meal_age(&value, cutoff) {
                    MealAge::Fresh => {}
                    MealAge::Expired => doomed.push((key, value.len() as u64)),
                    MealAge::Corrupt(reason) => {
                        let err = GuardError::CorruptEntry {
                            key: key.clone(),
                            details: reason.to_string(),
                        };
                        self.emit(ActivityEvent::Error {
                            code: err.code().to_string(),
                            message: err.to_string(),
                        });
                        doomed.push((key, value.len() as u64));
                    }
                },
                Ok(_) => {}
                Err(_) => doomed.push((key, 0)),
            }
        }
        self.remove_primary(outcome.step.name(), doomed, outcome)
    }

    fn compress_largest(
        &self,
        count: usize,
        min_size: u64,
        max_ratio: f64,
        outcome: &mut StepOutcome,
    ) -> Result<()> {
        let info = self.snapshot()?;
        let candidates: Vec<&LargeItem> = info
            .large_items
            .iter()
            .take(count)
            .filter(|item| item.size > min_size)
            .collect();

        let mut first_err = None;
        for item in candidates {
            let attempt = self.compact_primary(&item.key, outcome, |c| c.beats_ratio(max_ratio));
            if let Err(err) = attempt {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn compact_essential(&self, min_size: u64, outcome: &mut StepOutcome) -> Result<()> {
        let mut first_err = None;
        for key in self.primary_keys()? {
            if !ESSENTIAL.matches(&key) {
                continue;
            }
            let attempt = match self.primary.get_item(&key) {
                Ok(Some(value)) if value.len() as u64 > min_size => {
                    self.commit_compaction(&key, &value, outcome, Compaction::shrank)
                }
                Ok(_) => Ok(()),
                Err(e) => Err(GuardError::store("compact_essential read", e)),
            };
            if let Err(err) = attempt {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn compact_primary(
        &self,
        key: &str,
        outcome: &mut StepOutcome,
        gate: impl Fn(&Compaction) -> bool,
    ) -> Result<()> {
        match self.primary.get_item(key) {
            Ok(Some(value)) => self.commit_compaction(key, &value, outcome, gate),
            Ok(None) => Ok(()),
            Err(e) => Err(GuardError::store("compaction read", e)),
        }
    }

    fn commit_compaction(
        &self,
        key: &str,
        value: &str,
        outcome: &mut StepOutcome,
        gate: impl Fn(&Compaction) -> bool,
    ) -> Result<()> {
        let compaction = Compaction::of(value);
        if !gate(&compaction) {
            return Ok(());
        }
        self.primary
            .set_item(key, &compaction.compacted)
            .map_err(|e| GuardError::store("compaction write", e))?;
        outcome.compacted += 1;
        outcome.bytes_freed += compaction.saved_bytes() as u64;
        self.emit(ActivityEvent::EntryCompacted {
            key: key.to_string(),
            before_bytes: compaction.original_len as u64,
            after_bytes: compaction.compacted.len() as u64,
            step: outcome.step.name().to_string(),
        });
        Ok(())
    }

    fn sweep_secure_store(&self, outcome: &mut StepOutcome) -> Result<()> {
        let Some(secure) = &self.secure else {
            return Ok(());
        };
        let ceiling = self.config.secure.item_ceiling_bytes;
        let mut first_err = None;

        for key in &self.config.secure.sweep_keys {
            match secure.get_item(key) {
                Err(_) => {
                    if secure.remove_item(key).is_ok() {
                        outcome.removed += 1;
                        self.emit_removed(key, 0, outcome);
                    }
                }
                Ok(None) => {}
                Ok(Some(value)) if value.len() <= ceiling => {}
                Ok(Some(value)) => match self.fit_secure(secure, key, &value) {
                    Ok(SecureWrite::Split { .. }) => outcome.split += 1,
                    Ok(SecureWrite::Compacted {
                        original_len,
                        stored_len,
                    }) => {
                        outcome.compacted += 1;
                        outcome.bytes_freed += (original_len - stored_len) as u64;
                    }
                    Ok(SecureWrite::Direct) => {}
                    Err(err) => {
                        outcome.removed += 1;
                        first_err.get_or_insert(err);
                    }
                },
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn purge_secure_keys(&self, outcome: &mut StepOutcome) -> Result<()> {
        let Some(secure) = &self.secure else {
            return Ok(());
        };
        let mut first_err = None;
        for key in &self.config.secure.emergency_purge_keys {
            let existed = !matches!(secure.get_item(key), Ok(None));
            let removal = secure
                .remove_item(key)
                .and_then(|()| chunking::remove_chunks(secure, key));
            match removal {
                Ok(chunks) => {
                    if existed {
                        outcome.removed += 1;
                        self.emit_removed(key, 0, outcome);
                    }
                    outcome.removed += chunks;
                }
                Err(e) => {
                    first_err.get_or_insert(GuardError::store("secure purge", e));
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    // ──────────────────── deletion path ────────────────────

    /// The only place primary-store entries are deleted.
    fn remove_primary(
        &self,
        step: &str,
        targets: Vec<(String, u64)>,
        outcome: &mut StepOutcome,
    ) -> Result<()> {
        let (deletable, protected): (Vec<_>, Vec<_>) = targets
            .into_iter()
            .partition(|(key, _)| !self.protection.is_protected(key));
        outcome.protected += protected.len();
        if deletable.is_empty() {
            return Ok(());
        }

        let keys: Vec<String> = deletable.iter().map(|(key, _)| key.clone()).collect();
        self.primary
            .multi_remove(&keys)
            .map_err(|e| GuardError::store("remove", e))?;

        for (key, size) in deletable {
            outcome.removed += 1;
            outcome.bytes_freed += size;
            self.emit(ActivityEvent::EntryRemoved {
                key,
                size_bytes: size,
                step: step.to_string(),
            });
        }
        Ok(())
    }

    fn primary_keys(&self) -> Result<Vec<String>> {
        self.primary
            .all_keys()
            .map_err(|e| GuardError::store("enumerate", e))
    }

    /// Pair keys with their current size; unreadable entries count as zero.
    fn sized(&self, keys: Vec<String>) -> Vec<(String, u64)> {
        keys.into_iter()
            .map(|key| {
                let size = self
                    .primary
                    .get_item(&key)
                    .ok()
                    .flatten()
                    .map_or(0, |v| v.len() as u64);
                (key, size)
            })
            .collect()
    }

    // ──────────────────── secure store ────────────────────

    /// Persist `value` under `key` in the secure store so that it fits the
    /// per-item ceiling: directly, compacted, or as a chunk set.
    pub fn store_with_size_guard(&self, key: &str, value: &str) -> Result<SecureWrite> {
        let secure = self.secure.as_ref().ok_or_else(|| GuardError::Runtime {
            details: "no secure store attached".to_string(),
        })?;
        if value.len() <= self.config.secure.item_ceiling_bytes {
            secure
                .set_item(key, value)
                .map_err(|e| GuardError::store("secure write", e))?;
            let _ = chunking::remove_chunks(secure, key);
            return Ok(SecureWrite::Direct);
        }
        self.fit_secure(secure, key, value)
    }

    /// Read `key` from the secure store, reassembling a chunk set if needed.
    pub fn read_secure(&self, key: &str) -> Result<Option<String>> {
        let Some(secure) = &self.secure else {
            return Ok(None);
        };
        if let Some(value) = secure
            .get_item(key)
            .map_err(|e| GuardError::store("secure read", e))?
        {
            return Ok(Some(value));
        }
        chunking::read_chunks(secure, key).map_err(|e| GuardError::CorruptEntry {
            key: key.to_string(),
            details: e.to_string(),
        })
    }

    /// Compact or split an oversized secure value. On split failure the
    /// original entry is deleted.
    fn fit_secure(&self, secure: &S, key: &str, value: &str) -> Result<SecureWrite> {
        let ceiling = self.config.secure.item_ceiling_bytes;
        let compacted = compact_text(value);
        if compacted.len() <= ceiling {
            secure
                .set_item(key, &compacted)
                .map_err(|e| GuardError::store("secure write", e))?;
            let _ = chunking::remove_chunks(secure, key);
            self.emit(ActivityEvent::EntryCompacted {
                key: key.to_string(),
                before_bytes: value.len() as u64,
                after_bytes: compacted.len() as u64,
                step: ReclaimStep::SweepSecureStore.name().to_string(),
            });
            return Ok(SecureWrite::Compacted {
                original_len: value.len(),
                stored_len: compacted.len(),
            });
        }

        match chunking::write_chunks(secure, key, value, self.config.secure.chunk_size()) {
            Ok(chunks) => {
                let _ = secure.remove_item(key);
                self.emit(ActivityEvent::SecureSplit {
                    key: key.to_string(),
                    size_bytes: value.len() as u64,
                    chunks,
                });
                Ok(SecureWrite::Split { chunks })
            }
            Err(e) => {
                let _ = secure.remove_item(key);
                Err(GuardError::Split {
                    key: key.to_string(),
                    details: e.to_string(),
                })
            }
        }
    }

    // ──────────────────── reporting ────────────────────

    /// Current usage snapshot. Read-only.
    pub fn report(&self) -> Result<StorageInfo> {
        severity::measure(&self.primary, &self.config.capacity)
            .map_err(|e| GuardError::store("measure", e))
    }

    /// Logging-only health sample: usage, a high-usage warning, and the largest
    /// entries. Failures are logged and yield `None`.
    pub fn monitor(&self) -> Option<StorageInfo> {
        let info = match self.report() {
            Ok(info) => info,
            Err(err) => {
                self.emit(ActivityEvent::Error {
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
                return None;
            }
        };

        let cap = &self.config.capacity;
        let mut notes = Vec::new();
        if info.usage_ratio() > cap.monitor_warning_ratio {
            notes.push("usage is high, consider reclaiming".to_string());
        }
        let top: Vec<String> = info
            .large_items
            .iter()
            .take(cap.monitor_top_items)
            .map(|item| format!("{}={}KB", item.key, (item.size + 512) / 1024))
            .collect();
        if !top.is_empty() {
            notes.push(format!("largest: {}", top.join(", ")));
        }

        self.emit(ActivityEvent::MonitorSample {
            level: self.classify(&info).label().to_string(),
            usage_pct: info.usage_pct(),
            used_bytes: info.used_size,
            large_items: info.large_items.len(),
            details: (!notes.is_empty()).then(|| notes.join("; ")),
        });
        Some(info)
    }

    // ──────────────────── logging ────────────────────

    fn emit(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }

    fn emit_removed(&self, key: &str, size_bytes: u64, outcome: &StepOutcome) {
        self.emit(ActivityEvent::EntryRemoved {
            key: key.to_string(),
            size_bytes,
            step: outcome.step.name().to_string(),
        });
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn meal_age(value: &str, cutoff: DateTime<Utc>) -> MealAge {
    let Ok(parsed) = serde_json::from_str::<Value>(value) else {
        return MealAge::Corrupt("not valid JSON");
    };
    let Some(raw) = TIMESTAMP_FIELDS
        .iter()
        .find_map(|field| parsed.get(field).filter(|v| !v.is_null()))
    else {
        return MealAge::Corrupt("no timestamp field");
    };
    match parse_timestamp(raw) {
        Some(ts) if ts < cutoff => MealAge::Expired,
        Some(_) => MealAge::Fresh,
        None => MealAge::Corrupt("unparseable timestamp"),
    }
}

/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM:SS[.fff]` (UTC), `YYYY-MM-DD`, or epoch
/// milliseconds as a number or digit string.
fn parse_timestamp(raw: &Value) -> Option<DateTime<Utc>> {
    match raw {
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            Utc.timestamp_millis_opt(millis).single()
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
                return Some(naive.and_utc());
            }
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
            }
            s.parse::<i64>()
                .ok()
                .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::store::memory::{MemorySecureStore, MemoryStore};
    use crate::store::{StoreError, StoreErrorKind};

    fn meal(days_old: i64) -> String {
        let ts = Utc::now() - Duration::days(days_old);
        format!(r#"{{"timestamp":"{}","items":["rice"]}}"#, ts.to_rfc3339())
    }

    fn guard(store: MemoryStore) -> StorageGuard<MemoryStore> {
        StorageGuard::new(Config::default(), store).unwrap()
    }

    fn small_config(total: u64) -> Config {
        let mut cfg = Config::default();
        cfg.capacity.total_size_bytes = total;
        cfg
    }

    #[test]
    fn meal_age_verdicts() {
        let cutoff = Utc::now() - Duration::days(30);
        assert_eq!(meal_age(&meal(40), cutoff), MealAge::Expired);
        assert_eq!(meal_age(&meal(2), cutoff), MealAge::Fresh);
        assert_eq!(meal_age("{not json", cutoff), MealAge::Corrupt("not valid JSON"));
        assert_eq!(meal_age(r#"{"items":[]}"#, cutoff), MealAge::Corrupt("no timestamp field"));
        assert_eq!(meal_age("[1,2]", cutoff), MealAge::Corrupt("no timestamp field"));
        assert_eq!(
            meal_age(r#"{"created_at":"yesterday-ish"}"#, cutoff),
            MealAge::Corrupt("unparseable timestamp")
        );
    }

    #[test]
    fn timestamp_field_precedence_and_forms() {
        let cutoff = Utc::now() - Duration::days(30);
        let fresh_millis = Utc::now().timestamp_millis();
        let value = format!(r#"{{"timestamp":{fresh_millis},"created_at":"2001-01-01"}}"#);
        assert_eq!(meal_age(&value, cutoff), MealAge::Fresh);
        assert_eq!(meal_age(r#"{"upload_time":"2001-01-01"}"#, cutoff), MealAge::Expired);
        assert_eq!(
            meal_age(r#"{"created_at":"2001-01-01T10:00:00.123"}"#, cutoff),
            MealAge::Expired
        );
        assert_eq!(
            meal_age(r#"{"timestamp":null,"created_at":"978307200000"}"#, cutoff),
            MealAge::Expired
        );
    }

    #[test]
    fn routine_expires_only_stale_meals() {
        let store = MemoryStore::new();
        for i in 0..7 {
            store.insert(format!("meal_old_{i}"), meal(45));
        }
        for i in 0..3 {
            store.insert(format!("meal_new_{i}"), meal(1));
        }
        let g = guard(store);
        let report = g.run_plan(&ReclaimPlan::routine(g.config()));
        assert_eq!(report.outcome("expire_meal_data").unwrap().removed, 7);
        assert_eq!(g.primary().len(), 3);
        assert!(g.primary().contains("meal_new_0"));
    }

    #[test]
    fn unbounded_retention_window_expires_nothing_by_age() {
        let store = MemoryStore::new();
        store.insert("meal_ancient", meal(20_000));
        store.insert("meal_garbled", "{not json");
        let g = guard(store);
        let plan = ReclaimPlan {
            tier: Tier::Routine,
            steps: vec![ReclaimStep::ExpireMealData { retention_days: u32::MAX }],
        };
        let report = g.run_plan(&plan);
        let expire = report.outcome("expire_meal_data").unwrap();
        assert!(expire.error.is_none());
        assert_eq!(expire.removed, 1);
        assert!(g.primary().contains("meal_ancient"));
    }

    #[test]
    fn oversized_retention_rejected_at_construction() {
        let mut cfg = Config::default();
        cfg.retention.routine_meal_days = 100_000_000;
        let err = StorageGuard::new(cfg, MemoryStore::new()).err().unwrap();
        assert_eq!(err.code(), "STG-1001");
    }

    #[test]
    fn reconfigure_keeps_current_config_when_invalid() {
        let mut g = guard(MemoryStore::new());
        let mut cfg = Config::default();
        cfg.capacity.warning_ratio = 0.9;
        cfg.capacity.critical_ratio = 0.8;
        assert!(matches!(g.reconfigure(cfg), Err(GuardError::InvalidConfig { .. })));
        assert!((g.config().capacity.warning_ratio - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn leftover_availability_keys_are_cleared() {
        let store = MemoryStore::new();
        store.insert(format!("{PROBE_KEY_PREFIX}1700000000000_7"), "1");
        store.insert("storage_test_1", "1");
        store.insert("user_profile", "{}");
        let g = guard(store);
        let report = g.run_plan(&ReclaimPlan::routine(g.config()));
        assert_eq!(report.outcome("clear_temporary").unwrap().removed, 2);
        assert_eq!(g.primary().keys(), vec!["user_profile".to_string()]);
    }

    #[test]
    fn empty_meal_values_are_skipped() {
        let store = MemoryStore::new();
        store.insert("meal_blank", "");
        let g = guard(store);
        g.routine_reclaim();
        assert!(g.primary().contains("meal_blank"));
    }

    #[test]
    fn unreadable_meal_is_removed() {
        let store = MemoryStore::new();
        store.insert("meal_x", meal(1));
        store.mark_unreadable("meal_x");
        let g = guard(store);
        let report = g.run_plan(&ReclaimPlan::routine(g.config()));
        assert!(!g.primary().contains("meal_x"));
        assert!(report.removed() >= 1);
    }

    #[test]
    fn auth_keys_survive_emergency() {
        let store = MemoryStore::new();
        store.insert("persist:auth", r#"{"token":"abc"}"#);
        store.insert("auth_token", "xyz");
        store.insert("persist:settings", "{}");
        store.insert("cache_feed", "data");
        let g = guard(store);
        let report = g.run_plan(&ReclaimPlan::emergency(g.config()));
        assert!(g.primary().contains("persist:auth"));
        assert!(g.primary().contains("auth_token"));
        assert!(!g.primary().contains("persist:settings"));
        assert!(!g.primary().contains("cache_feed"));
        assert!(report.outcome("purge_persisted_state").unwrap().protected >= 1);
    }

    #[test]
    fn configured_protected_patterns_are_honored() {
        let mut cfg = Config::default();
        cfg.namespaces.protected_patterns = vec!["cache_keep*".to_string()];
        let store = MemoryStore::new();
        store.insert("cache_keep_me", "x");
        store.insert("cache_drop_me", "x");
        let g = StorageGuard::new(cfg, store).unwrap();
        g.emergency_reclaim();
        assert!(g.primary().contains("cache_keep_me"));
        assert!(!g.primary().contains("cache_drop_me"));
    }

    #[test]
    fn extra_temporary_substrings_are_cleared() {
        let mut cfg = Config::default();
        cfg.namespaces.extra_temporary = vec!["scratch".to_string()];
        let store = MemoryStore::new();
        store.insert("draft_scratch_1", "x");
        store.insert("draft_final", "x");
        let g = StorageGuard::new(cfg, store).unwrap();
        g.routine_reclaim();
        assert!(!g.primary().contains("draft_scratch_1"));
        assert!(g.primary().contains("draft_final"));
    }

    #[test]
    fn compress_largest_respects_ratio_gate() {
        let store = MemoryStore::new();
        let padded = format!("{{{}\"a\": 1{}}}", " ".repeat(1500), " ".repeat(1500));
        store.insert("profile_blob", padded);
        let dense = format!("{{\"a\":\"{}\" }}", "x".repeat(2000));
        store.insert("dense_blob", dense.clone());
        let g = guard(store);
        let report = g.run_plan(&ReclaimPlan::routine(g.config()));
        assert_eq!(g.primary().get("profile_blob").as_deref(), Some("{ \"a\": 1 }"));
        assert_eq!(g.primary().get("dense_blob"), Some(dense));
        assert_eq!(report.outcome("compress_largest").unwrap().compacted, 1);
    }

    #[test]
    fn compact_essential_commits_any_shrink() {
        let store = MemoryStore::new();
        let value = format!("{{\"theme\":\"{}\"  }}", "d".repeat(1200));
        store.insert("theme", value.clone());
        let g = guard(store);
        let report = g.run_plan(&ReclaimPlan::emergency(g.config()));
        let stored = g.primary().get("theme").unwrap();
        assert_eq!(stored.len(), value.len() - 1);
        assert!(report.outcome("compact_essential").unwrap().compacted >= 1);
    }

    #[test]
    fn probe_full_escalates_to_emergency() {
        let store = MemoryStore::new();
        store.insert("image_1", "x");
        store.fail_writes_with(Some(StoreError::unclassified("disk full")));
        let invoked = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&invoked);
        let g = guard(store).with_cache_invalidator(move || {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let check = g.check_capacity();
        assert_eq!(check.trigger, Trigger::ProbeFull);
        assert_eq!(check.report.as_ref().unwrap().tier, Tier::Emergency);
        assert_eq!(invoked.load(Ordering::SeqCst), 1);
        assert!(!g.primary().contains("image_1"));
    }

    #[test]
    fn non_full_probe_failure_is_ignored() {
        let store = MemoryStore::new();
        store.fail_writes_with(Some(StoreError::new(StoreErrorKind::Unavailable, "busy")));
        let g = guard(store);
        let check = g.check_capacity();
        assert!(check.ok);
        assert_eq!(check.trigger, Trigger::Healthy);
    }

    #[test]
    fn enumeration_failure_escalates() {
        let store = MemoryStore::new();
        store.fail_enumeration_with(Some(StoreError::new(StoreErrorKind::Unavailable, "closed")));
        let g = guard(store);
        let check = g.check_capacity();
        assert_eq!(check.trigger, Trigger::CheckFailed);
        assert!(check.error.is_some());
        assert_eq!(check.report.unwrap().tier, Tier::Emergency);
    }

    #[test]
    fn ratio_thresholds_choose_tier() {
        let store = MemoryStore::new();
        store.insert("blob", "x".repeat(80));
        let g = StorageGuard::new(small_config(100), store).unwrap();
        let check = g.check_capacity();
        assert_eq!(check.trigger, Trigger::WarningRatio);
        assert_eq!(check.report.unwrap().tier, Tier::Routine);

        let store = MemoryStore::new();
        store.insert("blob", "x".repeat(90));
        let g = StorageGuard::new(small_config(100), store).unwrap();
        assert_eq!(g.check_capacity().trigger, Trigger::CriticalRatio);
    }

    #[test]
    fn probe_keys_do_not_linger() {
        let g = guard(MemoryStore::new());
        assert!(g.ensure_capacity());
        assert!(g.primary().is_empty());
    }

    #[test]
    fn unreadable_entries_dropped_during_check() {
        let store = MemoryStore::new();
        store.insert("rn:junk", "x");
        store.mark_unreadable("rn:junk");
        store.insert("persist:auth", "{}");
        store.mark_unreadable("persist:auth");
        let g = guard(store);
        g.check_capacity();
        assert!(!g.primary().contains("rn:junk"));
        assert!(g.primary().contains("persist:auth"));
    }

    #[test]
    fn store_with_size_guard_modes() {
        let g = guard(MemoryStore::new()).with_secure_store(MemorySecureStore::new());
        assert_eq!(g.store_with_size_guard("a", "small").unwrap(), SecureWrite::Direct);

        let airy = format!("{{{}}}", " ".repeat(3000));
        assert_eq!(
            g.store_with_size_guard("b", &airy).unwrap(),
            SecureWrite::Compacted {
                original_len: 3002,
                stored_len: 3
            }
        );

        let dense = "z".repeat(3000);
        assert_eq!(
            g.store_with_size_guard("c", &dense).unwrap(),
            SecureWrite::Split { chunks: 2 }
        );
        assert_eq!(g.read_secure("c").unwrap(), Some(dense));
        assert!(!g.secure().unwrap().contains("c"));
    }

    #[test]
    fn direct_write_replaces_stale_chunk_set() {
        let g = guard(MemoryStore::new()).with_secure_store(MemorySecureStore::new());
        g.store_with_size_guard("k", &"z".repeat(5000)).unwrap();
        g.store_with_size_guard("k", "tiny").unwrap();
        let secure = g.secure().unwrap();
        assert_eq!(secure.keys(), vec!["k".to_string()]);
        assert_eq!(g.read_secure("k").unwrap().as_deref(), Some("tiny"));
    }

    #[test]
    fn split_failure_deletes_original() {
        let secure = MemorySecureStore::new();
        secure.insert("user_data", "q".repeat(3000));
        secure.fail_writes_after(Some(1));
        let g = guard(MemoryStore::new()).with_secure_store(secure);
        let report = g.run_plan(&ReclaimPlan::routine(g.config()));
        let sweep = report.outcome("sweep_secure_store").unwrap();
        assert!(sweep.error.as_deref().unwrap().contains("STG-2005"));
        assert!(g.secure().unwrap().keys().is_empty());
    }

    #[test]
    fn failed_resplit_leaves_no_chunk_set() {
        let g = guard(MemoryStore::new()).with_secure_store(MemorySecureStore::new());
        let value = "k".repeat(5000);
        assert_eq!(g.store_with_size_guard("k", &value).unwrap(), SecureWrite::Split { chunks: 3 });

        g.secure().unwrap().fail_writes_after(Some(1));
        let err = g.store_with_size_guard("k", &value).unwrap_err();
        assert!(matches!(err, GuardError::Split { .. }), "got {err:?}");
        g.secure().unwrap().fail_writes_after(None);

        let keys = g.secure().unwrap().keys();
        assert!(!keys.iter().any(|k| k.starts_with("k_chunk")), "left behind: {keys:?}");
        assert_eq!(g.read_secure("k").unwrap(), None);
    }

    #[test]
    fn undeletable_unreadable_secure_entry_is_not_counted() {
        let secure = MemorySecureStore::new();
        secure.insert("user_data", "x");
        secure.mark_unreadable("user_data");
        secure.fail_removals_of("user_data");
        secure.insert("meal_data", "y");
        secure.mark_unreadable("meal_data");
        let g = guard(MemoryStore::new()).with_secure_store(secure);
        let plan = ReclaimPlan {
            tier: Tier::Routine,
            steps: vec![ReclaimStep::SweepSecureStore],
        };
        let report = g.run_plan(&plan);
        assert_eq!(report.outcome("sweep_secure_store").unwrap().removed, 1);
        assert!(g.secure().unwrap().contains("user_data"));
        assert!(!g.secure().unwrap().contains("meal_data"));
    }

    #[test]
    fn secure_purge_only_in_emergency() {
        let secure = MemorySecureStore::new();
        secure.insert("cachedUserData", "x");
        secure.insert("largeImageData", "y");
        let g = guard(MemoryStore::new()).with_secure_store(secure);
        g.routine_reclaim();
        assert!(g.secure().unwrap().contains("cachedUserData"));
        let report = g.run_plan(&ReclaimPlan::emergency(g.config()));
        assert!(!g.secure().unwrap().contains("cachedUserData"));
        assert_eq!(report.outcome("purge_secure_keys").unwrap().removed, 2);
    }

    #[test]
    fn without_secure_store_secure_api_degrades() {
        let g = guard(MemoryStore::new());
        assert!(g.read_secure("x").unwrap().is_none());
        assert!(g.store_with_size_guard("x", "v").is_err());
    }

    #[test]
    fn cache_hook_failure_is_absorbed() {
        let store = MemoryStore::new();
        store.insert("image_a", "x");
        let g = guard(store).with_cache_invalidator(|| Err("query cache busy".to_string()));
        let report = g.run_plan(&ReclaimPlan::emergency(g.config()));
        let hook = report.outcome("invalidate_external_cache").unwrap();
        assert!(hook.error.as_deref().unwrap().contains("query cache busy"));
        assert!(!g.primary().contains("image_a"));
        assert!(report.succeeded());
    }

    #[test]
    fn memory_hint_invoked_in_emergency_only() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let g = guard(MemoryStore::new()).with_memory_hint(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        g.routine_reclaim();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        g.emergency_reclaim();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn events_reach_logger() {
        let (handle, rx) = ActivityLoggerHandle::detached(256);
        let store = MemoryStore::new();
        store.insert("temp_1", "abc");
        let g = guard(store).with_logger(handle);
        g.routine_reclaim();
        let events: Vec<ActivityEvent> = rx.try_iter().collect();
        assert!(matches!(events.first(), Some(ActivityEvent::ReclaimStarted { .. })));
        assert!(events.iter().any(|e| matches!(
            e,
            ActivityEvent::EntryRemoved { key, size_bytes: 3, .. } if key == "temp_1"
        )));
        assert!(matches!(events.last(), Some(ActivityEvent::ReclaimCompleted { removed: 1, .. })));
    }

    #[test]
    fn monitor_reports_largest_items() {
        let (handle, rx) = ActivityLoggerHandle::detached(16);
        let store = MemoryStore::new();
        store.insert("big", "x".repeat(90));
        let mut cfg = small_config(100);
        cfg.capacity.large_item_threshold_bytes = 10;
        let g = StorageGuard::new(cfg, store).unwrap().with_logger(handle);
        let info = g.monitor().unwrap();
        assert_eq!(info.large_items.len(), 1);
        match rx.try_recv().unwrap() {
            ActivityEvent::MonitorSample { details, level, .. } => {
                assert_eq!(level, "critical");
                let details = details.unwrap();
                assert!(details.contains("usage is high"));
                assert!(details.contains("big="));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
