//! Reclamation tiers as inspectable step lists.
//!
//! A plan is data: the orchestrator walks `steps` in order and records one
//! [`StepOutcome`] per step. EMERGENCY is built from ROUTINE's steps rather than
//! restating them, so the two cannot drift apart.

#![allow(missing_docs)]

use std::fmt;

use serde::Serialize;

use crate::core::config::Config;

/// Severity tier of a reclamation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Routine,
    Emergency,
}

impl Tier {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Routine => "routine",
            Self::Emergency => "emergency",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of reclamation work.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReclaimStep {
    /// Invoke the external cache-clear hook. Failure is logged only.
    InvalidateExternalCache,
    /// Delete every media-tagged key.
    PurgeMedia,
    /// Delete meal/session entries older than the window or unparseable.
    ExpireMealData { retention_days: u32 },
    /// Compact the largest entries, committing only below `max_ratio`.
    CompressLargest {
        count: usize,
        min_size: u64,
        max_ratio: f64,
    },
    /// Compact or split oversized secure-store entries.
    SweepSecureStore,
    /// Delete scratch and cache keys.
    ClearTemporary,
    /// Delete `persist:*` slices outside the auth namespace.
    PurgePersistedState,
    /// Delete the configured large secure-store keys and their chunk sets.
    PurgeSecureKeys,
    /// Delete analytics/debug/log/crash/performance keys.
    PurgeDiagnostics,
    /// Delete the broad non-essential denylist.
    PurgeNonEssential,
    /// Compact allow-listed essential entries above `min_size`.
    CompactEssential { min_size: u64 },
    /// Ask the runtime to release memory.
    MemoryHint,
}

impl ReclaimStep {
    /// Stable step name used in logs and reports.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::InvalidateExternalCache => "invalidate_external_cache",
            Self::PurgeMedia => "purge_media",
            Self::ExpireMealData { .. } => "expire_meal_data",
            Self::CompressLargest { .. } => "compress_largest",
            Self::SweepSecureStore => "sweep_secure_store",
            Self::ClearTemporary => "clear_temporary",
            Self::PurgePersistedState => "purge_persisted_state",
            Self::PurgeSecureKeys => "purge_secure_keys",
            Self::PurgeDiagnostics => "purge_diagnostics",
            Self::PurgeNonEssential => "purge_non_essential",
            Self::CompactEssential { .. } => "compact_essential",
            Self::MemoryHint => "memory_hint",
        }
    }
}

impl fmt::Display for ReclaimStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered list of steps for one tier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReclaimPlan {
    pub tier: Tier,
    pub steps: Vec<ReclaimStep>,
}

impl ReclaimPlan {
    /// Routine tier: retention, compaction, secure sweep, temporary cleanup.
    #[must_use]
    pub fn routine(config: &Config) -> Self {
        Self {
            tier: Tier::Routine,
            steps: routine_steps(config, config.retention.routine_meal_days),
        }
    }

    /// Emergency tier: cache hook and media purge, then the routine steps with
    /// the short retention window, then the aggressive purges.
    #[must_use]
    pub fn emergency(config: &Config) -> Self {
        let mut steps = vec![ReclaimStep::InvalidateExternalCache, ReclaimStep::PurgeMedia];
        steps.extend(routine_steps(config, config.retention.emergency_meal_days));
        steps.extend([
            ReclaimStep::PurgePersistedState,
            ReclaimStep::PurgeSecureKeys,
            ReclaimStep::PurgeDiagnostics,
            ReclaimStep::PurgeNonEssential,
            ReclaimStep::CompactEssential {
                min_size: config.retention.compact_essential_min_bytes,
            },
            ReclaimStep::MemoryHint,
        ]);
        Self {
            tier: Tier::Emergency,
            steps,
        }
    }

    /// Whether every step kind of `other` also appears in this plan.
    ///
    /// Compares by step name; parameters (e.g. the retention window) may differ.
    #[must_use]
    pub fn contains_all_of(&self, other: &Self) -> bool {
        other
            .steps
            .iter()
            .all(|step| self.steps.iter().any(|s| s.name() == step.name()))
    }

    #[must_use]
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(ReclaimStep::name).collect()
    }
}

fn routine_steps(config: &Config, retention_days: u32) -> Vec<ReclaimStep> {
    let ret = &config.retention;
    vec![
        ReclaimStep::ExpireMealData { retention_days },
        ReclaimStep::CompressLargest {
            count: ret.compress_top_items,
            min_size: ret.compress_min_bytes,
            max_ratio: ret.compress_max_ratio,
        },
        ReclaimStep::SweepSecureStore,
        ReclaimStep::ClearTemporary,
    ]
}

/// What one step did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    pub step: ReclaimStep,
    /// Entries deleted (primary and secure).
    pub removed: usize,
    /// Entries rewritten in compacted form.
    pub compacted: usize,
    /// Secure entries converted to chunk sets.
    pub split: usize,
    /// Keys the protection registry kept out of a deletion.
    pub protected: usize,
    pub bytes_freed: u64,
    /// Absorbed failure, if the step did not complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepOutcome {
    #[must_use]
    pub fn new(step: ReclaimStep) -> Self {
        Self {
            step,
            removed: 0,
            compacted: 0,
            split: 0,
            protected: 0,
            bytes_freed: 0,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Result of running one plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReclaimReport {
    pub tier: Tier,
    pub outcomes: Vec<StepOutcome>,
    pub duration_ms: u64,
}

impl ReclaimReport {
    #[must_use]
    pub fn removed(&self) -> usize {
        self.outcomes.iter().map(|o| o.removed).sum()
    }

    #[must_use]
    pub fn compacted(&self) -> usize {
        self.outcomes.iter().map(|o| o.compacted).sum()
    }

    #[must_use]
    pub fn bytes_freed(&self) -> u64 {
        self.outcomes.iter().map(|o| o.bytes_freed).sum()
    }

    #[must_use]
    pub fn failed_steps(&self) -> Vec<&StepOutcome> {
        self.outcomes.iter().filter(|o| o.failed()).collect()
    }

    /// A tier fails only when none of its steps completed.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.outcomes.is_empty() || self.outcomes.iter().any(|o| !o.failed())
    }

    /// Outcome of the first step with this name.
    #[must_use]
    pub fn outcome(&self, name: &str) -> Option<&StepOutcome> {
        self.outcomes.iter().find(|o| o.step.name() == name)
    }
}
