//! Signal handling for the watch loop: SIGTERM/SIGINT graceful shutdown,
//! SIGHUP config reload, SIGUSR1 immediate capacity check.
//!
//! Uses the `signal-hook` crate for safe signal registration. The loop polls
//! `SignalHandler` flags between passes rather than blocking on signals.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::{SIGINT, SIGTERM};

/// Thread-safe signal state shared between the signal handler and the loop.
///
/// All flags use `Ordering::Relaxed`; the loop polls them every tick.
#[derive(Clone)]
pub struct SignalHandler {
    shutdown_flag: Arc<AtomicBool>,
    reload_flag: Arc<AtomicBool>,
    check_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Create a handler and register OS signal hooks.
    ///
    /// Registration is best-effort; failures are reported on stderr.
    pub fn new() -> Self {
        let handler = Self::unregistered();
        handler.register_signals();
        handler
    }

    /// Handler with no OS hooks; flags change only through `request_*`.
    pub fn unregistered() -> Self {
        Self {
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            reload_flag: Arc::new(AtomicBool::new(false)),
            check_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn should_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Check (and clear) whether a config reload has been requested.
    pub fn should_reload(&self) -> bool {
        self.reload_flag.swap(false, Ordering::Relaxed)
    }

    /// Check (and clear) whether an out-of-schedule check has been requested.
    pub fn should_check(&self) -> bool {
        self.check_flag.swap(false, Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }

    pub fn request_reload(&self) {
        self.reload_flag.store(true, Ordering::Relaxed);
    }

    pub fn request_check(&self) {
        self.check_flag.store(true, Ordering::Relaxed);
    }

    fn register_signals(&self) {
        if let Err(e) = signal_hook::flag::register(SIGTERM, Arc::clone(&self.shutdown_flag)) {
            eprintln!("[STG-SIGNAL] failed to register SIGTERM: {e}");
        }
        if let Err(e) = signal_hook::flag::register(SIGINT, Arc::clone(&self.shutdown_flag)) {
            eprintln!("[STG-SIGNAL] failed to register SIGINT: {e}");
        }

        #[cfg(unix)]
        {
            use signal_hook::consts::{SIGHUP, SIGUSR1};
            if let Err(e) = signal_hook::flag::register(SIGHUP, Arc::clone(&self.reload_flag)) {
                eprintln!("[STG-SIGNAL] failed to register SIGHUP: {e}");
            }
            if let Err(e) = signal_hook::flag::register(SIGUSR1, Arc::clone(&self.check_flag)) {
                eprintln!("[STG-SIGNAL] failed to register SIGUSR1: {e}");
            }
        }
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_quiet() {
        let handler = SignalHandler::unregistered();
        assert!(!handler.should_shutdown());
        assert!(!handler.should_reload());
        assert!(!handler.should_check());
    }

    #[test]
    fn shutdown_is_sticky() {
        let handler = SignalHandler::unregistered();
        handler.request_shutdown();
        assert!(handler.should_shutdown());
        assert!(handler.should_shutdown());
    }

    #[test]
    fn reload_and_check_clear_on_read() {
        let handler = SignalHandler::unregistered();
        handler.request_reload();
        handler.request_check();
        assert!(handler.should_reload());
        assert!(!handler.should_reload());
        assert!(handler.should_check());
        assert!(!handler.should_check());
    }

    #[test]
    fn clones_share_flags() {
        let handler = SignalHandler::unregistered();
        let h2 = handler.clone();
        handler.request_shutdown();
        assert!(h2.should_shutdown());
    }
}
