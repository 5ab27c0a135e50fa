//! Conversion of lat/lon grids into index grids.
//!
//! With one worker and one chunk the whole grid goes to the oracle in a
//! single call. Otherwise the grid is cut into contiguous row chunks, encoded
//! on a scoped pool (or one after another on the calling thread), and the
//! results are stitched back together in row order. Once a chunk fails no
//! further chunk is started.
//! Each chunk carries the oracle's neighbourhood rows as a halo so that
//! adaptive resolution sees the same neighbours as in the single call; the
//! output is identical for every worker count.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{Result, SidecarError};
use crate::model::{Grid, IndexGrid, Sid, MAX_LEVEL};
use crate::oracle::{CellIndex, LatLonBand, Resolution};
use crate::partition::{row_chunks, with_halo, with_worker_pool};

#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Fixed encode level. Setting it turns resolution adaptation off.
    pub resolution: Option<u8>,
    pub workers: usize,
    /// Sequential row chunks, used when `workers` is one.
    pub chunks: usize,
    pub adapt_resolution: bool,
    /// Coordinate value marking pixels without geolocation.
    pub fill_value: Option<f64>,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            resolution: None,
            workers: 1,
            chunks: 1,
            adapt_resolution: true,
            fill_value: None,
        }
    }
}

impl ConvertOptions {
    /// Resolution handed to the oracle. An explicit level always wins over
    /// adaptation.
    pub fn effective_resolution(&self) -> Resolution {
        match self.resolution {
            Some(level) => Resolution::Fixed(level),
            None if self.adapt_resolution => Resolution::Adaptive,
            None => Resolution::Fixed(MAX_LEVEL),
        }
    }
}

/// Converts a lat/lon grid pair into an index grid of the same shape.
pub fn convert<O>(oracle: &O, lats: &Grid<f64>, lons: &Grid<f64>, options: &ConvertOptions) -> Result<IndexGrid>
where
    O: CellIndex + ?Sized,
{
    if lats.shape() != lons.shape() {
        return Err(SidecarError::validation(format!(
            "latitude grid {:?} and longitude grid {:?} differ in shape",
            lats.shape(),
            lons.shape()
        )));
    }
    if lats.is_empty() {
        return Err(SidecarError::validation("cannot convert an empty grid"));
    }
    if let Some(level) = options.resolution {
        if level > MAX_LEVEL {
            return Err(SidecarError::validation(format!(
                "resolution {} exceeds the finest level {}",
                level, MAX_LEVEL
            )));
        }
    }

    let (rows, cols) = lats.shape();
    let resolution = options.effective_resolution();

    let workers = options.workers.max(1);
    let chunks = options.chunks.max(1);
    let sids = if workers == 1 && chunks == 1 {
        info!("Converting {}x{} grid in a single call ({:?})", rows, cols, resolution);
        let band = LatLonBand {
            lats: &lats.values,
            lons: &lons.values,
            cols,
            fill_value: options.fill_value,
        };
        let sids = oracle.encode(&band, resolution)?;
        check_len(&sids, rows * cols)?;
        sids
    } else {
        let row_ranges = row_chunks(rows, if workers > 1 { workers } else { chunks });
        info!(
            "Converting {}x{} grid in {} chunks on {} workers ({:?})",
            rows,
            cols,
            row_ranges.len(),
            workers,
            resolution
        );
        let halo = oracle.neighborhood_rows();
        let failed = AtomicBool::new(false);
        let encode = |chunk: &Range<usize>| -> Result<Option<Vec<Sid>>> {
            if failed.load(Ordering::Acquire) {
                return Ok(None);
            }
            encode_chunk(oracle, lats, lons, chunk, halo, resolution, options.fill_value)
                .map(Some)
                .inspect_err(|_| failed.store(true, Ordering::Release))
        };
        let parts: Vec<Option<Vec<Sid>>> = if workers > 1 {
            with_worker_pool(workers, || row_ranges.par_iter().map(encode).collect::<Result<Vec<_>>>())??
        } else {
            row_ranges.iter().map(encode).collect::<Result<Vec<_>>>()?
        };
        let parts: Vec<Vec<Sid>> = parts
            .into_iter()
            .collect::<Option<_>>()
            .ok_or_else(|| SidecarError::oracle("conversion abandoned after a failed chunk"))?;
        parts.concat()
    };

    Grid::new(rows, cols, sids)
}

fn encode_chunk<O>(
    oracle: &O,
    lats: &Grid<f64>,
    lons: &Grid<f64>,
    chunk: &Range<usize>,
    halo: usize,
    resolution: Resolution,
    fill_value: Option<f64>,
) -> Result<Vec<Sid>>
where
    O: CellIndex + ?Sized,
{
    let slab = with_halo(chunk, halo, lats.rows);
    let cols = lats.cols;
    let band = LatLonBand {
        lats: lats.row_band(slab.clone()),
        lons: lons.row_band(slab.clone()),
        cols,
        fill_value,
    };
    let sids = oracle.encode(&band, resolution)?;
    check_len(&sids, slab.len() * cols)?;

    let skip = (chunk.start - slab.start) * cols;
    debug!("Encoded rows {:?} (slab {:?})", chunk, slab);
    Ok(sids[skip..skip + chunk.len() * cols].to_vec())
}

fn check_len(sids: &[Sid], expected: usize) -> Result<()> {
    if sids.len() != expected {
        return Err(SidecarError::oracle(format!(
            "oracle returned {} SIDs for {} pixels",
            sids.len(),
            expected
        )));
    }
    Ok(())
}
