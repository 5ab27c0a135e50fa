//! Cover synthesis: compact sets of cells spanning a granule.
//!
//! Two routes lead to a cover. A granule with a boundary ring is covered by
//! handing the ring to the hull oracle. A granule without one is covered by
//! dissolving its per-pixel index: coarsen, deduplicate, and let `expand`
//! merge siblings and close gaps.
//!
//! Dissolving in parallel is a two-phase reduce. Phase one dissolves each
//! partition on its own; phase two deduplicates the union of the partial
//! covers and expands it once more. Because `expand` is a closure operator
//! the result does not depend on how the input was partitioned.

use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{Result, SidecarError};
use crate::model::{BoundaryRing, Cover, IndexGrid, Sid, MAX_LEVEL};
use crate::oracle::{HullCover, ResolutionOps};
use crate::partition::{split_even, with_worker_pool};

/// How a cover resolution is derived from an index grid when the caller did
/// not ask for one: the coarsest level in the grid, lowered by `step` and
/// clamped at level 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionPolicy {
    pub step: u8,
}

impl ResolutionPolicy {
    /// Ring covers use the grid's coarsest level as is.
    pub const RING: ResolutionPolicy = ResolutionPolicy { step: 0 };
    /// Dissolved covers drop two levels to keep the cover sparse.
    pub const DISSOLVE: ResolutionPolicy = ResolutionPolicy { step: 2 };

    /// Resolves the level to build a cover at. An explicit request wins.
    pub fn resolve<O>(&self, oracle: &O, grid: &IndexGrid, requested: Option<u8>) -> Result<u8>
    where
        O: ResolutionOps + ?Sized,
    {
        if let Some(level) = requested {
            check_level(level)?;
            return Ok(level);
        }
        let valid: Vec<Sid> = grid.valid_sids().collect();
        let min = oracle.min_resolution(&valid)?.ok_or_else(|| {
            SidecarError::validation("index grid has no valid pixels to derive a cover resolution from")
        })?;
        let level = min.saturating_sub(self.step);
        debug!("Derived cover resolution {} (min level {}, step {})", level, min, self.step);
        Ok(level)
    }
}

fn check_level(level: u8) -> Result<()> {
    if level > MAX_LEVEL {
        return Err(SidecarError::validation(format!(
            "cover resolution {} exceeds the finest level {}",
            level, MAX_LEVEL
        )));
    }
    Ok(())
}

/// Covers the region enclosed by `ring` with cells at `level`.
pub fn cover_from_ring<O>(oracle: &O, ring: &BoundaryRing, level: u8) -> Result<Cover>
where
    O: HullCover + ?Sized,
{
    ring.validate()?;
    check_level(level)?;
    let sids = oracle.cover(ring.lats(), ring.lons(), level)?;
    info!("Ring of {} points covered by {} cells at level {}", ring.len(), sids.len(), level);
    Ok(Cover::new(sids))
}

/// Covers a ring at the level derived from `grid` unless `requested` is set.
pub fn cover_from_ring_for_grid<O>(
    oracle: &O,
    ring: &BoundaryRing,
    grid: &IndexGrid,
    requested: Option<u8>,
) -> Result<Cover>
where
    O: HullCover + ResolutionOps + ?Sized,
{
    // validate before touching the oracle
    ring.validate()?;
    let level = ResolutionPolicy::RING.resolve(oracle, grid, requested)?;
    cover_from_ring(oracle, ring, level)
}

#[derive(Debug, Clone)]
pub struct DissolveOptions {
    /// Level every input SID is coarsened to before merging.
    pub resolution: u8,
    /// Parallel partitions. Takes precedence over `chunks` when above one.
    pub workers: usize,
    /// Sequential partitions, used when `workers` is one.
    pub chunks: usize,
}

impl DissolveOptions {
    pub fn new(resolution: u8) -> Self {
        Self {
            resolution,
            workers: 1,
            chunks: 1,
        }
    }
}

fn dedup(mut sids: Vec<Sid>) -> Vec<Sid> {
    sids.sort_unstable();
    sids.dedup();
    sids
}

/// Dissolves one partition: deduplicate and expand.
fn dissolve_local<O>(oracle: &O, sids: &[Sid]) -> Result<Vec<Sid>>
where
    O: ResolutionOps + ?Sized,
{
    oracle.expand(&dedup(sids.to_vec()))
}

/// Dissolves a dense SID set into a compact cover.
pub fn dissolve<O>(oracle: &O, sids: &[Sid], options: &DissolveOptions) -> Result<Cover>
where
    O: ResolutionOps + ?Sized,
{
    check_level(options.resolution)?;
    let coarse = dedup(oracle.coerce(sids, options.resolution)?);
    debug!(
        "Dissolve: {} SIDs coarsened to {} distinct cells at level {}",
        sids.len(),
        coarse.len(),
        options.resolution
    );

    let workers = options.workers.max(1);
    let chunks = options.chunks.max(1);
    if workers == 1 && chunks == 1 {
        let cover = oracle.expand(&coarse)?;
        return Ok(Cover::new(cover));
    }

    // phase one: independent partial covers
    let parts = if workers > 1 { workers } else { chunks };
    let partitions = split_even(&coarse, parts);
    let partials: Vec<Vec<Sid>> = if workers > 1 {
        with_worker_pool(workers, || {
            partitions
                .par_iter()
                .map(|part| dissolve_local(oracle, part))
                .collect::<Result<Vec<_>>>()
        })??
    } else {
        partitions
            .iter()
            .map(|part| dissolve_local(oracle, part))
            .collect::<Result<Vec<_>>>()?
    };

    // phase two: one global pass over the union
    let merged = dedup(partials.concat());
    debug!(
        "Dissolve: {} partitions produced {} distinct cells",
        partitions.len(),
        merged.len()
    );
    let cover = oracle.expand(&merged)?;
    Ok(Cover::new(cover))
}
