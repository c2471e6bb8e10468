//! Watch loop: run the capacity check on a fixed interval until a shutdown
//! signal arrives.
//!
//! Each pass calls [`StorageGuard::check_capacity`], so a pass can reclaim.
//! SIGHUP reloads the config file in place; SIGUSR1 cuts the current wait
//! short and runs a pass immediately.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use crate::core::config::Config;
use crate::core::errors::Result;
use crate::daemon::signals::SignalHandler;
use crate::guard::severity::PressureLevel;
use crate::guard::{CapacityCheck, StorageGuard};
use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle};
use crate::store::{KvStore, SecureStore};

/// How often the loop wakes to poll signal flags while waiting.
const POLL_TICK: Duration = Duration::from_millis(100);

/// Arguments for `stg watch`.
#[derive(Debug, Clone)]
pub struct WatchArgs {
    /// Time between passes.
    pub interval: Duration,
    /// Stop after this many passes (`None` = until signalled).
    pub max_passes: Option<u64>,
    /// Config file re-read on SIGHUP; `None` re-reads the default location.
    pub config_path: Option<PathBuf>,
}

impl Default for WatchArgs {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_passes: None,
            config_path: None,
        }
    }
}

/// Totals reported when the loop exits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub passes: u64,
    pub refused: u64,
    pub routine_runs: u64,
    pub emergency_runs: u64,
    pub reloads: u64,
    pub stop_reason: String,
}

/// Drives a [`StorageGuard`] on a schedule.
pub struct MaintenanceLoop<P, S> {
    guard: StorageGuard<P, S>,
    args: WatchArgs,
    signals: SignalHandler,
    logger: Option<ActivityLoggerHandle>,
    last_level: Option<PressureLevel>,
}

impl<P: KvStore, S: SecureStore> MaintenanceLoop<P, S> {
    pub fn new(guard: StorageGuard<P, S>, args: WatchArgs, signals: SignalHandler) -> Self {
        Self {
            guard,
            args,
            signals,
            logger: None,
            last_level: None,
        }
    }

    /// Lifecycle events (start/stop) go here; pass-level events come from the
    /// guard's own logger.
    #[must_use]
    pub fn with_logger(mut self, logger: ActivityLoggerHandle) -> Self {
        self.logger = Some(logger);
        self
    }

    #[must_use]
    pub fn guard(&self) -> &StorageGuard<P, S> {
        &self.guard
    }

    /// Run passes until shutdown is requested or `max_passes` is reached.
    pub fn run(&mut self) -> Result<WatchSummary> {
        let started = Instant::now();
        let config_hash = self.guard.config().stable_hash()?;
        self.emit(ActivityEvent::WatchStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash,
        });

        let mut summary = WatchSummary::default();
        let reason = loop {
            if self.signals.should_shutdown() {
                break "signal";
            }
            if self.signals.should_reload() {
                self.reload(&mut summary);
            }

            let check = self.guard.check_capacity();
            self.record(&check, &mut summary);

            if self
                .args
                .max_passes
                .is_some_and(|max| summary.passes >= max)
            {
                break "pass limit reached";
            }
            self.wait();
        };

        summary.stop_reason = reason.to_string();
        self.emit(ActivityEvent::WatchStopped {
            reason: summary.stop_reason.clone(),
            uptime_secs: started.elapsed().as_secs(),
        });
        Ok(summary)
    }

    fn record(&mut self, check: &CapacityCheck, summary: &mut WatchSummary) {
        summary.passes += 1;
        if !check.ok {
            summary.refused += 1;
        }
        match check.level {
            PressureLevel::Warning => summary.routine_runs += 1,
            PressureLevel::Critical => summary.emergency_runs += 1,
            PressureLevel::Healthy => {}
        }
        if self.last_level != Some(check.level) {
            if let Some(previous) = self.last_level {
                eprintln!("[STG-WATCH] pressure {previous} -> {}", check.level);
            }
            self.last_level = Some(check.level);
        }
    }

    fn reload(&mut self, summary: &mut WatchSummary) {
        let loaded = Config::load(self.args.config_path.as_deref())
            .and_then(|config| self.guard.reconfigure(config));
        match loaded {
            Ok(()) => {
                summary.reloads += 1;
                eprintln!("[STG-WATCH] configuration reloaded");
            }
            Err(err) => {
                eprintln!("[STG-WATCH] reload failed, keeping previous config: {err}");
                self.emit(ActivityEvent::Error {
                    code: err.code().to_string(),
                    message: format!("config reload failed: {err}"),
                });
            }
        }
    }

    /// Sleep out the interval in short ticks so signals are seen promptly.
    fn wait(&self) {
        let deadline = Instant::now() + self.args.interval;
        while Instant::now() < deadline {
            if self.signals.should_shutdown() || self.signals.should_check() {
                return;
            }
            thread::sleep(POLL_TICK.min(deadline.saturating_duration_since(Instant::now())));
        }
    }

    fn emit(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }
}
