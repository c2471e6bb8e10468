//! STG-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::store::StoreError;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, GuardError>;

/// Top-level error type for the storage guard.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("[STG-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[STG-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[STG-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[STG-2001] store full during {context}: {source}")]
    StoreFull {
        context: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("[STG-2002] store failure during {context}: {source}")]
    Store {
        context: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("[STG-2003] corrupt entry {key}: {details}")]
    CorruptEntry { key: String, details: String },

    #[error("[STG-2004] reclamation step {step} failed: {details}")]
    Reclamation { step: &'static str, details: String },

    #[error("[STG-2005] failed to split secure entry {key}: {details}")]
    Split { key: String, details: String },

    #[error("[STG-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[STG-2102] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[STG-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[STG-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl GuardError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "STG-1001",
            Self::MissingConfig { .. } => "STG-1002",
            Self::ConfigParse { .. } => "STG-1003",
            Self::StoreFull { .. } => "STG-2001",
            Self::Store { .. } => "STG-2002",
            Self::CorruptEntry { .. } => "STG-2003",
            Self::Reclamation { .. } => "STG-2004",
            Self::Split { .. } => "STG-2005",
            Self::Serialization { .. } => "STG-2101",
            Self::Sql { .. } => "STG-2102",
            Self::Io { .. } => "STG-3002",
            Self::Runtime { .. } => "STG-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Store { .. }
                | Self::Io { .. }
                | Self::Sql { .. }
                | Self::Runtime { .. }
        )
    }

    /// Whether this error means the underlying store has no room left.
    #[must_use]
    pub const fn is_store_full(&self) -> bool {
        matches!(self, Self::StoreFull { .. })
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Wrap an adapter error, promoting store-full signals to [`GuardError::StoreFull`].
    #[must_use]
    pub fn store(context: &'static str, source: StoreError) -> Self {
        if source.is_full() {
            Self::StoreFull { context, source }
        } else {
            Self::Store { context, source }
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for GuardError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for GuardError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for GuardError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreErrorKind;

    fn all_variants() -> Vec<GuardError> {
        vec![
            GuardError::InvalidConfig {
                details: String::new(),
            },
            GuardError::MissingConfig {
                path: PathBuf::new(),
            },
            GuardError::ConfigParse {
                context: "",
                details: String::new(),
            },
            GuardError::StoreFull {
                context: "",
                source: StoreError::new(StoreErrorKind::Full, "full"),
            },
            GuardError::Store {
                context: "",
                source: StoreError::unclassified("boom"),
            },
            GuardError::CorruptEntry {
                key: String::new(),
                details: String::new(),
            },
            GuardError::Reclamation {
                step: "",
                details: String::new(),
            },
            GuardError::Split {
                key: String::new(),
                details: String::new(),
            },
            GuardError::Serialization {
                context: "",
                details: String::new(),
            },
            GuardError::Sql {
                context: "",
                details: String::new(),
            },
            GuardError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
            GuardError::Runtime {
                details: String::new(),
            },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let errors = all_variants();
        let codes: Vec<&str> = errors.iter().map(GuardError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn error_codes_have_stg_prefix() {
        for err in &all_variants() {
            assert!(
                err.code().starts_with("STG-"),
                "code {} must start with STG-",
                err.code()
            );
        }
    }

    #[test]
    fn error_display_includes_code() {
        let err = GuardError::InvalidConfig {
            details: "bad ratio".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("STG-1001"), "display should contain code: {msg}");
        assert!(msg.contains("bad ratio"), "display should contain details: {msg}");
    }

    #[test]
    fn store_constructor_promotes_full_signal() {
        let full = GuardError::store("probe", StoreError::new(StoreErrorKind::Full, "no room"));
        assert!(full.is_store_full());
        assert_eq!(full.code(), "STG-2001");

        let other = GuardError::store("probe", StoreError::unclassified("timeout"));
        assert!(!other.is_store_full());
        assert_eq!(other.code(), "STG-2002");
    }

    #[test]
    fn retryable_errors_are_correct() {
        assert!(
            GuardError::Store {
                context: "",
                source: StoreError::unclassified("x"),
            }
            .is_retryable()
        );
        assert!(
            !GuardError::InvalidConfig {
                details: String::new()
            }
            .is_retryable()
        );
        assert!(
            !GuardError::CorruptEntry {
                key: String::new(),
                details: String::new()
            }
            .is_retryable()
        );
        assert!(
            !GuardError::StoreFull {
                context: "",
                source: StoreError::new(StoreErrorKind::Full, "x"),
            }
            .is_retryable()
        );
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: GuardError = json_err.into();
        assert_eq!(err.code(), "STG-2101");
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let err: GuardError = toml_err.into();
        assert_eq!(err.code(), "STG-1003");
    }
}
