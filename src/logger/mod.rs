//! Activity logging: JSONL append-only plus optional SQLite (WAL), fed from a
//! dedicated thread.

pub mod dual;
pub mod jsonl;
#[cfg(feature = "sqlite")]
pub mod sqlite;
