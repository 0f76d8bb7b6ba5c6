//! Splits a table's rows into bounded chunks
//!
//! Chunks cap per-statement size and the memory held by one task. Order is
//! preserved and nothing is deduplicated here.

use std::num::NonZeroUsize;

/// Split `rows` into consecutive chunks of at most `max_chunk_size` items.
///
/// Every chunk except possibly the last holds exactly `max_chunk_size`
/// items. Empty input yields no chunks.
pub fn split<T>(rows: Vec<T>, max_chunk_size: NonZeroUsize) -> Vec<Vec<T>> {
    let size = max_chunk_size.get();
    let mut chunks = Vec::with_capacity(rows.len().div_ceil(size));
    let mut rows = rows.into_iter().peekable();

    while rows.peek().is_some() {
        chunks.push(rows.by_ref().take(size).collect());
    }

    chunks
}
