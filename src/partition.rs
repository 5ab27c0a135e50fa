//! Work splitting and worker-pool scoping shared by conversion and dissolve.

use std::ops::Range;

use rayon::ThreadPoolBuilder;
use tracing::debug;

use crate::error::Result;

/// Splits `rows` into at most `parts` contiguous, ordered, non-empty ranges
/// whose lengths differ by at most one.
pub fn row_chunks(rows: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.clamp(1, rows.max(1));
    let base = rows / parts;
    let extra = rows % parts;

    let mut chunks = Vec::with_capacity(parts);
    let mut start = 0;
    for k in 0..parts {
        let len = base + usize::from(k < extra);
        if len == 0 {
            continue;
        }
        chunks.push(start..start + len);
        start += len;
    }
    chunks
}

/// Splits `items` into at most `parts` near-equal consecutive slices.
pub fn split_even<T>(items: &[T], parts: usize) -> Vec<&[T]> {
    row_chunks(items.len(), parts)
        .into_iter()
        .map(|range| &items[range])
        .collect()
}

/// Extends a chunk by `halo` rows on each side, clipped to the grid.
pub fn with_halo(chunk: &Range<usize>, halo: usize, rows: usize) -> Range<usize> {
    chunk.start.saturating_sub(halo)..(chunk.end + halo).min(rows)
}

/// Runs `op` inside a rayon pool of `workers` threads that exists only for
/// the duration of the call. All worker threads are joined before this
/// returns, whether `op` succeeded or not.
pub fn with_worker_pool<R, F>(workers: usize, op: F) -> Result<R>
where
    R: Send,
    F: FnOnce() -> R + Send,
{
    debug!("Starting scoped pool with {} workers", workers);
    let result = ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("stare-worker-{}", i))
        .build_scoped(|thread| thread.run(), |pool| pool.install(op))?;
    debug!("Scoped pool with {} workers torn down", workers);
    Ok(result)
}
