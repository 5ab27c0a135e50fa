//! Contracts the pipeline needs from a hierarchical spatial index.
//!
//! The pipeline never looks inside a [`Sid`]; everything it knows about cell
//! geometry and resolution goes through these traits. [`QuadTreeIndex`] is the
//! implementation shipped with the crate.

pub mod quadtree;

pub use quadtree::QuadTreeIndex;

use crate::error::Result;
use crate::model::Sid;

/// Resolution requested from [`CellIndex::encode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Every pixel at this level.
    Fixed(u8),
    /// Level per pixel, matched to the spacing of its neighbours.
    Adaptive,
}

/// A band of consecutive rows of a lat/lon grid.
#[derive(Debug, Clone, Copy)]
pub struct LatLonBand<'a> {
    pub lats: &'a [f64],
    pub lons: &'a [f64],
    pub cols: usize,
    /// Pixels whose latitude or longitude equals this value have no
    /// geolocation and encode to [`crate::model::FILL_SID`].
    pub fill_value: Option<f64>,
}

impl LatLonBand<'_> {
    pub fn rows(&self) -> usize {
        if self.cols == 0 {
            0
        } else {
            self.lats.len() / self.cols
        }
    }

    pub fn is_fill(&self, idx: usize) -> bool {
        match self.fill_value {
            Some(fill) => self.lats[idx] == fill || self.lons[idx] == fill,
            None => false,
        }
    }
}

/// Point to cell encoding.
pub trait CellIndex: Sync {
    /// Encodes every pixel of `band`, returning one SID per pixel in the same
    /// row-major order.
    fn encode(&self, band: &LatLonBand<'_>, resolution: Resolution) -> Result<Vec<Sid>>;

    /// Number of rows above and below a pixel that adaptive encoding reads.
    /// Callers splitting a grid must hand the oracle this many extra rows on
    /// each side of a chunk.
    fn neighborhood_rows(&self) -> usize {
        1
    }
}

/// Polygon to cell covering.
pub trait HullCover: Sync {
    /// Cells at `level` whose union covers the region enclosed by the ring.
    fn cover(&self, lats: &[f64], lons: &[f64], level: u8) -> Result<Vec<Sid>>;
}

/// Resolution queries and transforms on SIDs.
pub trait ResolutionOps: Sync {
    /// Level encoded in a single SID.
    fn level(&self, sid: Sid) -> Result<u8>;

    fn min_resolution(&self, sids: &[Sid]) -> Result<Option<u8>> {
        let mut min = None;
        for &sid in sids {
            let level = self.level(sid)?;
            min = Some(min.map_or(level, |m: u8| m.min(level)));
        }
        Ok(min)
    }

    fn max_resolution(&self, sids: &[Sid]) -> Result<Option<u8>> {
        let mut max = None;
        for &sid in sids {
            let level = self.level(sid)?;
            max = Some(max.map_or(level, |m: u8| m.max(level)));
        }
        Ok(max)
    }

    /// Coarsens every SID to `level`. SIDs already at or above it are kept
    /// as they are; coercion never adds precision.
    fn coerce(&self, sids: &[Sid], level: u8) -> Result<Vec<Sid>>;

    /// Turns a set into its enclosing multi-resolution form. The output may
    /// differ in size and mix levels.
    fn expand(&self, sids: &[Sid]) -> Result<Vec<Sid>>;
}

/// Everything the pipeline needs from one index implementation.
pub trait SpatialIndex: CellIndex + HullCover + ResolutionOps {}

impl<T: CellIndex + HullCover + ResolutionOps> SpatialIndex for T {}
