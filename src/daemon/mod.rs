//! Daemon subsystem: the periodic watch loop and its signal handling.

#[cfg(feature = "daemon")]
pub mod maintenance;
#[cfg(feature = "daemon")]
pub mod signals;
