//! Key namespaces: built-in rule tables that classify keys by purpose, plus the
//! protection registry that keeps the auth namespace out of every deletion.
//!
//! Keys follow an advisory prefix convention (`meal_`, `cache_`, `persist:<slice>`,
//! ...). Rules mirror how writers actually name keys, so most are substring
//! matches rather than strict prefixes.

#![allow(missing_docs)]

use regex::Regex;

use crate::core::errors::{GuardError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact(&'static str),
    Prefix(&'static str),
    Contains(&'static str),
}

impl MatchKind {
    #[must_use]
    pub fn matches(self, key: &str) -> bool {
        match self {
            Self::Exact(needle) => key == needle,
            Self::Prefix(needle) => key.starts_with(needle),
            Self::Contains(needle) => key.contains(needle),
        }
    }
}

/// A named set of match rules; a key belongs to the set if any rule matches.
#[derive(Debug, Clone, Copy)]
pub struct KeyRules {
    name: &'static str,
    rules: &'static [MatchKind],
}

impl KeyRules {
    #[must_use]
    pub const fn new(name: &'static str, rules: &'static [MatchKind]) -> Self {
        Self { name, rules }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        self.rules.iter().any(|rule| rule.matches(key))
    }
}

use MatchKind::{Contains, Prefix};

/// Authentication state. Never deleted by reclamation.
pub const AUTH: KeyRules = KeyRules::new(
    "auth",
    &[Prefix("persist:auth"), Contains("auth_token")],
);

/// Meal and session records subject to age-based retention.
pub const MEAL_DATA: KeyRules = KeyRules::new(
    "meal-data",
    &[
        Contains("meal_"),
        Contains("pendingMeal"),
        Contains("persist:meal"),
    ],
);

/// Captured images and media caches.
pub const MEDIA: KeyRules = KeyRules::new(
    "media",
    &[
        Contains("image_"),
        Contains("cached_"),
        Contains("photo_"),
        Contains("base64_"),
        Contains("pendingMeal"),
        Prefix("rn:"),
        Contains("ImagePicker"),
        Contains("CameraRoll"),
        Contains("MediaLibrary"),
        Contains("FileSystem"),
    ],
);

/// Scratch data that is always safe to drop.
pub const TEMPORARY: KeyRules = KeyRules::new(
    "temporary",
    &[
        Contains("temp_"),
        Contains("tmp_"),
        Contains("cache_"),
        Prefix("__"),
        Contains("query_cache"),
    ],
);

/// Analytics, debug, log, crash and performance records.
pub const DIAGNOSTICS: KeyRules = KeyRules::new(
    "diagnostics",
    &[
        Contains("analytics_"),
        Contains("debug_"),
        Contains("log_"),
        Contains("crash_"),
        Contains("performance_"),
    ],
);

/// Broad denylist used only under emergency pressure.
pub const NON_ESSENTIAL: KeyRules = KeyRules::new(
    "non-essential",
    &[
        Contains("cache_"),
        Contains("temp_"),
        Contains("debug_"),
        Contains("log_"),
        Contains("analytics_"),
        Contains("performance_"),
        Contains("crash_"),
        Contains("query_"),
        Contains("image_"),
        Contains("photo_"),
        Contains("base64_"),
        Prefix("rn:"),
        Prefix("__"),
        Contains("react-query"),
        Contains("@react-navigation"),
        Contains("expo-"),
        Contains("flipper"),
    ],
);

/// Persisted state slices (`persist:<slice>`).
pub const PERSISTED_STATE: KeyRules = KeyRules::new("persisted-state", &[Prefix("persist:")]);

/// Small allow-list of entries worth keeping and compacting under pressure.
pub const ESSENTIAL: KeyRules = KeyRules::new(
    "essential",
    &[
        Prefix("persist:auth"),
        Contains("auth_token"),
        Contains("user_"),
        Contains("language"),
        Contains("theme"),
        Contains("notification"),
    ],
);

/// Keys left behind by availability probes (current and legacy naming).
/// Cleared with the temporary keys.
pub const PROBE: KeyRules = KeyRules::new(
    "probe",
    &[Prefix(PROBE_KEY_PREFIX), Prefix("storage_test_")],
);

/// Prefix for throwaway probe keys.
pub const PROBE_KEY_PREFIX: &str = "storage_probe_";

/// Decides which keys reclamation may never delete.
///
/// Built-in auth rules always apply; config-level globs extend them.
#[derive(Debug, Clone, Default)]
pub struct ProtectionRegistry {
    patterns: Vec<Regex>,
}

impl ProtectionRegistry {
    /// Build from config-level glob patterns (`*` any run, `?` one character).
    pub fn new(patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|pat| glob_to_regex(pat))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    #[must_use]
    pub fn is_protected(&self, key: &str) -> bool {
        AUTH.matches(key) || self.patterns.iter().any(|p| p.is_match(key))
    }
}

/// Check that a protected-key glob compiles.
pub fn validate_glob_pattern(pattern: &str) -> Result<()> {
    glob_to_regex(pattern).map(|_| ())
}

/// Convert a key glob to an anchored regex. Every other metacharacter is literal.
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut regex_str = String::with_capacity(pattern.len() * 2 + 6);
    regex_str.push_str("(?s)^");
    for c in pattern.chars() {
        match c {
            '*' => regex_str.push_str(".*"),
            '?' => regex_str.push('.'),
            other => regex_str.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }
    regex_str.push('$');

    Regex::new(&regex_str).map_err(|err| GuardError::InvalidConfig {
        details: format!("invalid protected key pattern {pattern:?}: {err}"),
    })
}
