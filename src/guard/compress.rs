//! Textual compaction for verbose JSON/text payloads.
//!
//! Not a general-purpose compressor: it only removes redundant whitespace.
//! Every whitespace run (spaces, tabs, `\r`, `\n`, Unicode spaces) becomes a
//! single space and both ends are trimmed. The result is never longer than
//! the input and the function cannot fail.

/// Collapse whitespace runs to one space and trim.
#[must_use]
pub fn compact_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_space = false;
    for c in input.chars() {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(c);
    }
    out
}

/// Result of compacting one value against a commit gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compaction {
    pub original_len: usize,
    pub compacted: String,
}

impl Compaction {
    #[must_use]
    pub fn of(value: &str) -> Self {
        Self {
            original_len: value.len(),
            compacted: compact_text(value),
        }
    }

    /// Bytes saved by committing the compacted form.
    #[must_use]
    pub fn saved_bytes(&self) -> usize {
        self.original_len.saturating_sub(self.compacted.len())
    }

    /// Whether the compacted form is strictly below `max_ratio` of the original.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn beats_ratio(&self, max_ratio: f64) -> bool {
        (self.compacted.len() as f64) < (self.original_len as f64) * max_ratio
    }

    /// Whether compaction changed anything at all.
    #[must_use]
    pub fn shrank(&self) -> bool {
        self.compacted.len() < self.original_len
    }
}
