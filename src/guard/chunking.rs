//! Chunk sets for values too large for the secure store.
//!
//! Layout for a split key `k` with `n` chunks:
//! - `k_chunk_0 .. k_chunk_{n-1}`: consecutive slices of the value
//! - `k_chunks`: decimal `n`, written last so a reader never sees a marker
//!   without its chunks
//!
//! Chunks are sized in bytes. A cut that would fall inside a multi-byte
//! character moves back to the previous character boundary, so every chunk is
//! valid UTF-8 and concatenation is exact.

#![allow(missing_docs)]

use crate::store::{SecureStore, StoreError, StoreErrorKind, StoreResult};

/// Marker key holding the chunk count.
#[must_use]
pub fn marker_key(key: &str) -> String {
    format!("{key}_chunks")
}

/// Key of chunk `index`.
#[must_use]
pub fn chunk_key(key: &str, index: usize) -> String {
    format!("{key}_chunk_{index}")
}

/// Cut `value` into slices of at most `chunk_size` bytes.
///
/// A slice only exceeds `chunk_size` when a single character is wider than it.
#[must_use]
pub fn split_value(value: &str, chunk_size: usize) -> Vec<&str> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::with_capacity(value.len().div_ceil(chunk_size));
    let mut rest = value;
    while !rest.is_empty() {
        let mut cut = chunk_size.min(rest.len());
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == 0 {
            cut = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let (head, tail) = rest.split_at(cut);
        chunks.push(head);
        rest = tail;
    }
    chunks
}

/// Write `value` as a chunk set under `key`. Returns the chunk count.
///
/// Leftover chunks from an earlier, longer chunk set are removed. On failure
/// no chunk set remains under `key`: the chunks written so far are removed,
/// and so is any earlier set they were overwriting. The original `key` is
/// left alone; the caller decides when to delete it.
pub fn write_chunks<S: SecureStore + ?Sized>(
    store: &S,
    key: &str,
    value: &str,
    chunk_size: usize,
) -> StoreResult<usize> {
    let previous = read_count(store, key).ok().flatten().unwrap_or(0);
    let chunks = split_value(value, chunk_size);
    for (index, chunk) in chunks.iter().enumerate() {
        if let Err(err) = store.set_item(&chunk_key(key, index), chunk) {
            discard_set(store, key, index.max(previous));
            return Err(err);
        }
    }
    if let Err(err) = store.set_item(&marker_key(key), &chunks.len().to_string()) {
        discard_set(store, key, chunks.len().max(previous));
        return Err(err);
    }
    for stale in chunks.len()..previous {
        let _ = store.remove_item(&chunk_key(key, stale));
    }
    Ok(chunks.len())
}

/// Best-effort removal of the marker and chunks `0..count`. Marker goes first
/// so a reader never sees it pointing at missing chunks.
fn discard_set<S: SecureStore + ?Sized>(store: &S, key: &str, count: usize) {
    let _ = store.remove_item(&marker_key(key));
    for index in 0..count {
        let _ = store.remove_item(&chunk_key(key, index));
    }
}

/// Reassemble the chunk set stored under `key`, if one exists.
pub fn read_chunks<S: SecureStore + ?Sized>(store: &S, key: &str) -> StoreResult<Option<String>> {
    let Some(count) = read_count(store, key)? else {
        return Ok(None);
    };
    let mut value = String::new();
    for index in 0..count {
        let chunk = store.get_item(&chunk_key(key, index))?.ok_or_else(|| {
            StoreError::new(
                StoreErrorKind::Corrupt,
                format!("chunk {index} of {count} missing for {key}"),
            )
        })?;
        value.push_str(&chunk);
    }
    Ok(Some(value))
}

/// Delete the chunk set under `key` (marker and chunks). Returns chunks removed.
pub fn remove_chunks<S: SecureStore + ?Sized>(store: &S, key: &str) -> StoreResult<usize> {
    let count = read_count(store, key).ok().flatten().unwrap_or(0);
    for index in 0..count {
        store.remove_item(&chunk_key(key, index))?;
    }
    store.remove_item(&marker_key(key))?;
    Ok(count)
}

fn read_count<S: SecureStore + ?Sized>(store: &S, key: &str) -> StoreResult<Option<usize>> {
    let Some(raw) = store.get_item(&marker_key(key))? else {
        return Ok(None);
    };
    raw.trim().parse::<usize>().map(Some).map_err(|err| {
        StoreError::new(
            StoreErrorKind::Corrupt,
            format!("chunk marker for {key} is {raw:?}: {err}"),
        )
    })
}
