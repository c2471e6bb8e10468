//! Dual-write coordinator: JSONL always, SQLite when enabled, graceful degradation.
//!
//! Architecture: a dedicated logger thread owns the `JsonlWriter` and the optional
//! `SqliteLogger`. The guard sends `ActivityEvent`s through a bounded crossbeam
//! channel with `try_send()`, so reclamation never waits on log I/O.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::config::Config;
use crate::core::errors::{GuardError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};
#[cfg(feature = "sqlite")]
use crate::logger::sqlite::{ActivityRow, SqliteLogger};

// ──────────────────── channel capacity ────────────────────

const CHANNEL_CAPACITY: usize = 1024;

// ──────────────────── public event type ────────────────────

/// Events emitted by the guard and the maintenance loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityEvent {
    WatchStarted {
        version: String,
        config_hash: String,
    },
    WatchStopped {
        reason: String,
        uptime_secs: u64,
    },
    CapacityChecked {
        level: String,
        usage_pct: f64,
        used_bytes: u64,
        ok: bool,
        duration_ms: u64,
    },
    ProbeFailed {
        probe: String,
        store_full: bool,
        message: String,
    },
    ReclaimStarted {
        tier: String,
        trigger: String,
    },
    ReclaimCompleted {
        tier: String,
        removed: usize,
        compacted: usize,
        bytes_freed: u64,
        failed_steps: usize,
        duration_ms: u64,
    },
    EntryRemoved {
        key: String,
        size_bytes: u64,
        step: String,
    },
    EntryCompacted {
        key: String,
        before_bytes: u64,
        after_bytes: u64,
        step: String,
    },
    SecureSplit {
        key: String,
        size_bytes: u64,
        chunks: usize,
    },
    StepFailed {
        tier: String,
        step: String,
        code: String,
        message: String,
    },
    MonitorSample {
        level: String,
        usage_pct: f64,
        used_bytes: u64,
        large_items: usize,
        details: Option<String>,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel to request graceful shutdown of the logger thread.
    Shutdown,
}

// ──────────────────── public handle ────────────────────

/// Thread-safe, cheaply-cloneable handle for sending log events.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Handle whose events land on the returned receiver instead of a logger thread.
    #[must_use]
    pub fn detached(capacity: usize) -> (Self, Receiver<ActivityEvent>) {
        let (tx, rx) = bounded(capacity);
        (
            Self {
                tx,
                dropped_events: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Send an event. Non-blocking; drops and counts on back-pressure.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

// ──────────────────── configuration ────────────────────

/// Options for building the dual-write logger.
pub struct DualLoggerConfig {
    /// SQLite database path. `None` disables SQLite.
    pub sqlite_path: Option<PathBuf>,
    /// SQLite rows older than this many days are pruned at startup.
    pub sqlite_retention_days: u32,
    pub jsonl_config: JsonlConfig,
    pub channel_capacity: usize,
}

impl DualLoggerConfig {
    /// Logger layout for a loaded guard configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            sqlite_path: config
                .logging
                .sqlite
                .then(|| config.paths.activity_db.clone()),
            sqlite_retention_days: config.logging.activity_retention_days,
            jsonl_config: JsonlConfig::at(
                config.paths.jsonl_log.clone(),
                config.logging.max_jsonl_bytes,
            ),
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

impl Default for DualLoggerConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

// ──────────────────── spawn ────────────────────

/// Spawn the logger thread and return a handle plus its join handle.
pub fn spawn_logger(
    config: DualLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("stg-logger".to_string())
        .spawn(move || {
            logger_thread_main(
                rx,
                config.sqlite_path,
                config.sqlite_retention_days,
                config.jsonl_config,
                dropped_clone,
            );
        })
        .map_err(|e| GuardError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

// ──────────────────── logger thread ────────────────────

#[allow(clippy::needless_pass_by_value)]
fn logger_thread_main(
    rx: Receiver<ActivityEvent>,
    sqlite_path: Option<PathBuf>,
    retention_days: u32,
    jsonl_config: JsonlConfig,
    dropped: Arc<AtomicU64>,
) {
    #[cfg(feature = "sqlite")]
    let mut sqlite = sqlite_path.and_then(|p| match SqliteLogger::open(&p) {
        Ok(db) => {
            if let Err(e) = db.prune_activity_log(retention_days) {
                eprintln!("[STG-DUAL] activity prune failed: {e}");
            }
            Some(db)
        }
        Err(e) => {
            eprintln!("[STG-DUAL] failed to open SQLite at {}: {e}", p.display());
            None
        }
    });
    #[cfg(not(feature = "sqlite"))]
    let _ = (sqlite_path, retention_days);

    let mut jsonl = JsonlWriter::open(jsonl_config);
    #[cfg(feature = "sqlite")]
    let mut sqlite_failures: u32 = 0;

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }

        let entry = event_to_log_entry(&event);
        jsonl.write_entry(&entry);

        #[cfg(feature = "sqlite")]
        if let Some(db) = &sqlite {
            if db.log_activity(&entry_to_activity_row(&entry)).is_ok() {
                sqlite_failures = 0;
            } else {
                sqlite_failures += 1;
                if sqlite_failures >= 3 {
                    eprintln!("[STG-DUAL] SQLite write failed {sqlite_failures} times, disabling");
                    sqlite = None;
                }
            }
        }
    }

    jsonl.flush();
    jsonl.fsync();
}

// ──────────────────── event conversion ────────────────────

#[allow(clippy::too_many_lines)]
fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::WatchStarted {
            version,
            config_hash,
        } => {
            let mut e = LogEntry::new(EventType::WatchStart, Severity::Info);
            e.details = Some(format!("version={version} config_hash={config_hash}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::WatchStopped {
            reason,
            uptime_secs,
        } => {
            let mut e = LogEntry::new(EventType::WatchStop, Severity::Info);
            e.details = Some(format!("reason={reason} uptime={uptime_secs}s"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::CapacityChecked {
            level,
            usage_pct,
            used_bytes,
            ok,
            duration_ms,
        } => {
            let severity = if *ok { Severity::Info } else { Severity::Critical };
            let mut e = LogEntry::new(EventType::CapacityCheck, severity);
            e.pressure = Some(level.clone());
            e.usage_pct = Some(*usage_pct);
            e.size = Some(*used_bytes);
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(*ok);
            e
        }
        ActivityEvent::ProbeFailed {
            probe,
            store_full,
            message,
        } => {
            let severity = if *store_full {
                Severity::Critical
            } else {
                Severity::Warning
            };
            let mut e = LogEntry::new(EventType::ProbeFailure, severity);
            e.step = Some(probe.clone());
            e.error_message = Some(message.clone());
            e.details = Some(format!("store_full={store_full}"));
            e.ok = Some(false);
            e
        }
        ActivityEvent::ReclaimStarted { tier, trigger } => {
            let severity = if tier == "emergency" {
                Severity::Critical
            } else {
                Severity::Warning
            };
            let mut e = LogEntry::new(EventType::ReclaimStart, severity);
            e.tier = Some(tier.clone());
            e.details = Some(trigger.clone());
            e
        }
        ActivityEvent::ReclaimCompleted {
            tier,
            removed,
            compacted,
            bytes_freed,
            failed_steps,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::ReclaimComplete, Severity::Info);
            e.tier = Some(tier.clone());
            e.size = Some(*bytes_freed);
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(*failed_steps == 0);
            e.details = Some(format!(
                "removed={removed} compacted={compacted} failed_steps={failed_steps}"
            ));
            e
        }
        ActivityEvent::EntryRemoved {
            key,
            size_bytes,
            step,
        } => {
            let mut e = LogEntry::new(EventType::EntryRemove, Severity::Info);
            e.key = Some(key.clone());
            e.size = Some(*size_bytes);
            e.step = Some(step.clone());
            e.ok = Some(true);
            e
        }
        ActivityEvent::EntryCompacted {
            key,
            before_bytes,
            after_bytes,
            step,
        } => {
            let mut e = LogEntry::new(EventType::EntryCompact, Severity::Info);
            e.key = Some(key.clone());
            e.size = Some(before_bytes.saturating_sub(*after_bytes));
            e.step = Some(step.clone());
            e.details = Some(format!("{before_bytes}->{after_bytes} bytes"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::SecureSplit {
            key,
            size_bytes,
            chunks,
        } => {
            let mut e = LogEntry::new(EventType::SecureSplit, Severity::Info);
            e.key = Some(key.clone());
            e.size = Some(*size_bytes);
            e.details = Some(format!("chunks={chunks}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::StepFailed {
            tier,
            step,
            code,
            message,
        } => {
            let mut e = LogEntry::new(EventType::StepFailure, Severity::Warning);
            e.tier = Some(tier.clone());
            e.step = Some(step.clone());
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        ActivityEvent::MonitorSample {
            level,
            usage_pct,
            used_bytes,
            large_items,
            details,
        } => {
            let severity = if details.is_some() {
                Severity::Warning
            } else {
                Severity::Info
            };
            let mut e = LogEntry::new(EventType::MonitorSample, severity);
            e.pressure = Some(level.clone());
            e.usage_pct = Some(*usage_pct);
            e.size = Some(*used_bytes);
            e.details = Some(details.as_ref().map_or_else(
                || format!("large_items={large_items}"),
                |d| format!("large_items={large_items} {d}"),
            ));
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::WatchStop, Severity::Info),
    }
}

#[cfg(feature = "sqlite")]
#[allow(clippy::cast_possible_wrap)]
fn entry_to_activity_row(entry: &LogEntry) -> ActivityRow {
    let severity = match entry.severity {
        Severity::Info => "info",
        Severity::Warning => "warning",
        Severity::Critical => "critical",
    };
    ActivityRow {
        timestamp: entry.ts.clone(),
        event_type: entry.event.as_str().to_string(),
        severity: severity.to_string(),
        entry_key: entry.key.clone(),
        size_bytes: entry.size.map(|s| s as i64),
        tier: entry.tier.clone(),
        step: entry.step.clone(),
        pressure_level: entry.pressure.clone(),
        usage_pct: entry.usage_pct,
        duration_ms: entry.duration_ms.map(|d| d as i64),
        success: i32::from(entry.ok.unwrap_or(true)),
        error_code: entry.error_code.clone(),
        error_message: entry.error_message.clone(),
        details: entry.details.clone(),
    }
}

// ──────────────────── tests ────────────────────
