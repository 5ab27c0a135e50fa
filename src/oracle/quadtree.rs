//! Equirectangular quadtree implementation of the oracle contracts.
//!
//! SID layout (64 bits):
//!
//! ```text
//! | quadrant path, 2 bits per level, left-aligned | unused | level (5 bits) |
//!   63 ..................................... 10     9 .. 5     4 ........ 0
//! ```
//!
//! Quadrant digits are `(north << 1) | east`. Because the path is left-aligned
//! a cell sorts immediately before all of its descendants, and the
//! descendants of a cell occupy one contiguous numeric range.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::{CellIndex, HullCover, LatLonBand, Resolution, ResolutionOps};
use crate::error::{Result, SidecarError};
use crate::model::{normalize_lon, Sid, UnwrappedRing, FILL_SID, MAX_LEVEL};

const LEVEL_BITS: u64 = 0x1f;

/// Cells a single hull cover may enumerate before giving up.
const MAX_HULL_CELLS: u64 = 1 << 22;

/// Children of one parent that `expand` needs before it replaces them by the
/// parent. Three closes single-cell gaps.
const MERGE_SIBLINGS: usize = 3;

#[derive(Debug, Clone, Copy, Default)]
pub struct QuadTreeIndex;

/// Extent of a cell in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellBounds {
    pub south: f64,
    pub north: f64,
    pub west: f64,
    pub east: f64,
}

impl CellBounds {
    /// (lat, lon) of the cell center.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.south + self.north) / 2.0,
            (self.west + self.east) / 2.0,
        )
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.south && lat <= self.north && lon >= self.west && lon <= self.east
    }
}

fn tail_mask(level: u8) -> u64 {
    if level == 0 {
        u64::MAX
    } else {
        (1u64 << (64 - 2 * u32::from(level))) - 1
    }
}

fn level_bits(raw: u64) -> u8 {
    (raw & LEVEL_BITS) as u8
}

/// Ancestor of a well-formed raw SID at a coarser or equal `level`.
fn clear_to(raw: u64, level: u8) -> u64 {
    if level >= level_bits(raw) {
        raw
    } else {
        (raw & !tail_mask(level)) | u64::from(level)
    }
}

fn angular_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (p1, p2) = (lat1.to_radians(), lat2.to_radians());
    let dp = p2 - p1;
    let dl = (lon2 - lon1).to_radians();
    let a = (dp / 2.0).sin().powi(2) + p1.cos() * p2.cos() * (dl / 2.0).sin().powi(2);
    2.0 * a.sqrt().min(1.0).asin().to_degrees()
}

impl QuadTreeIndex {
    pub fn new() -> Self {
        Self
    }

    /// Level of a SID, rejecting anything that is not a well-formed cell.
    pub fn level_of(sid: Sid) -> Result<u8> {
        let level = level_bits(sid.0);
        if level > MAX_LEVEL || sid.0 & tail_mask(level) & !LEVEL_BITS != 0 {
            return Err(SidecarError::oracle(format!("malformed SID {:#018x}", sid.0)));
        }
        Ok(level)
    }

    fn check_level(level: u8) -> Result<()> {
        if level > MAX_LEVEL {
            return Err(SidecarError::oracle(format!(
                "resolution level {} exceeds {}",
                level, MAX_LEVEL
            )));
        }
        Ok(())
    }

    fn from_xy(x: u64, y: u64, level: u8) -> Sid {
        let mut path = 0u64;
        for i in (0..u32::from(level)).rev() {
            let digit = (((y >> i) & 1) << 1) | ((x >> i) & 1);
            path = (path << 2) | digit;
        }
        if level > 0 {
            path <<= 64 - 2 * u32::from(level);
        }
        Sid(path | u64::from(level))
    }

    fn to_xy(sid: Sid) -> Result<(u64, u64, u8)> {
        let level = Self::level_of(sid)?;
        if level == 0 {
            return Ok((0, 0, 0));
        }
        let path = sid.0 >> (64 - 2 * u32::from(level));
        let (mut x, mut y) = (0u64, 0u64);
        for i in (0..u32::from(level)).rev() {
            let digit = (path >> (2 * i)) & 0b11;
            y = (y << 1) | (digit >> 1);
            x = (x << 1) | (digit & 1);
        }
        Ok((x, y, level))
    }

    /// Encodes one point at a fixed level.
    pub fn encode_point(&self, lat: f64, lon: f64, level: u8) -> Result<Sid> {
        Self::check_level(level)?;
        if !lat.is_finite() || !lon.is_finite() || lat.abs() > 90.0 {
            return Err(SidecarError::oracle(format!(
                "malformed coordinate (lat {}, lon {})",
                lat, lon
            )));
        }
        let n = 1u64 << level;
        let x = ((normalize_lon(lon) + 180.0) / 360.0 * n as f64).floor() as u64;
        let y = ((lat + 90.0) / 180.0 * n as f64).floor() as u64;
        Ok(Self::from_xy(x.min(n - 1), y.min(n - 1), level))
    }

    pub fn bounds(&self, sid: Sid) -> Result<CellBounds> {
        let (x, y, level) = Self::to_xy(sid)?;
        let n = (1u64 << level) as f64;
        let (w, h) = (360.0 / n, 180.0 / n);
        let west = -180.0 + x as f64 * w;
        let south = -90.0 + y as f64 * h;
        Ok(CellBounds {
            south,
            north: south + h,
            west,
            east: west + w,
        })
    }

    pub fn center(&self, sid: Sid) -> Result<(f64, f64)> {
        Ok(self.bounds(sid)?.center())
    }

    /// The four children of a cell, in SID order.
    pub fn children(&self, sid: Sid) -> Result<[Sid; 4]> {
        let (x, y, level) = Self::to_xy(sid)?;
        if level == MAX_LEVEL {
            return Err(SidecarError::oracle(format!("SID {} is already at the finest level", sid)));
        }
        let (x, y, child) = (x << 1, y << 1, level + 1);
        Ok([
            Self::from_xy(x, y, child),
            Self::from_xy(x + 1, y, child),
            Self::from_xy(x, y + 1, child),
            Self::from_xy(x + 1, y + 1, child),
        ])
    }

    /// Finest level whose cell height still spans `spacing` degrees.
    fn adaptive_level(spacing: f64) -> u8 {
        if spacing.is_nan() || spacing <= 0.0 {
            return MAX_LEVEL;
        }
        let level = (180.0 / spacing).log2().floor();
        level.clamp(0.0, f64::from(MAX_LEVEL)) as u8
    }

    /// Largest distance from pixel (row, col) to its valid 4-neighbours.
    fn neighbour_spacing(band: &LatLonBand<'_>, row: usize, col: usize) -> Option<f64> {
        let rows = band.rows();
        let idx = row * band.cols + col;
        let (lat, lon) = (band.lats[idx], band.lons[idx]);

        let mut neighbours = Vec::with_capacity(4);
        if row > 0 {
            neighbours.push(idx - band.cols);
        }
        if row + 1 < rows {
            neighbours.push(idx + band.cols);
        }
        if col > 0 {
            neighbours.push(idx - 1);
        }
        if col + 1 < band.cols {
            neighbours.push(idx + 1);
        }

        neighbours
            .into_iter()
            .filter(|&n| !band.is_fill(n) && band.lats[n].is_finite() && band.lons[n].is_finite())
            .map(|n| angular_distance(lat, lon, band.lats[n], band.lons[n]))
            .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |m| m.max(d))))
    }
}

impl CellIndex for QuadTreeIndex {
    fn encode(&self, band: &LatLonBand<'_>, resolution: Resolution) -> Result<Vec<Sid>> {
        if band.lats.len() != band.lons.len() || band.cols == 0 || band.lats.len() % band.cols != 0 {
            return Err(SidecarError::oracle(format!(
                "band of {} latitudes and {} longitudes does not have {} columns",
                band.lats.len(),
                band.lons.len(),
                band.cols
            )));
        }
        if let Resolution::Fixed(level) = resolution {
            Self::check_level(level)?;
        }

        let mut sids = Vec::with_capacity(band.lats.len());
        for idx in 0..band.lats.len() {
            if band.is_fill(idx) {
                sids.push(FILL_SID);
                continue;
            }
            let (row, col) = (idx / band.cols, idx % band.cols);
            let level = match resolution {
                Resolution::Fixed(level) => level,
                Resolution::Adaptive => Self::neighbour_spacing(band, row, col)
                    .map_or(MAX_LEVEL, Self::adaptive_level),
            };
            let sid = self
                .encode_point(band.lats[idx], band.lons[idx], level)
                .map_err(|e| SidecarError::oracle(format!("row {} col {}: {}", row, col, e)))?;
            sids.push(sid);
        }
        Ok(sids)
    }
}

impl HullCover for QuadTreeIndex {
    fn cover(&self, lats: &[f64], lons: &[f64], level: u8) -> Result<Vec<Sid>> {
        Self::check_level(level)?;
        if lats.len() != lons.len() || lats.len() < 3 {
            return Err(SidecarError::oracle(format!(
                "hull needs at least 3 matched vertices, got {} lats and {} lons",
                lats.len(),
                lons.len()
            )));
        }
        if lats.iter().chain(lons).any(|v| !v.is_finite()) {
            return Err(SidecarError::oracle("hull vertex is not finite"));
        }

        // Cell columns of an unwrapped ring are wrapped back when emitting SIDs.
        let ring = UnwrappedRing::from_slices(lats, lons);
        if let Some(pole) = ring.pole {
            debug!("hull encircles the pole at latitude {}", pole);
        }
        let points = ring.capped();

        let (mut west, mut east) = (f64::INFINITY, f64::NEG_INFINITY);
        let (mut south, mut north) = (f64::INFINITY, f64::NEG_INFINITY);
        for &(x, y) in &points {
            west = west.min(x);
            east = east.max(x);
            south = south.min(y);
            north = north.max(y);
        }

        let n = 1i64 << level;
        let (w, h) = (360.0 / n as f64, 180.0 / n as f64);
        let x0 = ((west + 180.0) / w).floor() as i64;
        let x1 = ((east + 180.0) / w).floor() as i64;
        let y0 = (((south + 90.0) / h).floor() as i64).clamp(0, n - 1);
        let y1 = (((north + 90.0) / h).floor() as i64).clamp(0, n - 1);

        let candidates = (x1 - x0 + 1) as u64 * (y1 - y0 + 1) as u64;
        if candidates > MAX_HULL_CELLS {
            return Err(SidecarError::oracle(format!(
                "hull at level {} spans {} cells (limit {})",
                level, candidates, MAX_HULL_CELLS
            )));
        }

        let mut sids = Vec::new();
        for yi in y0..=y1 {
            for xi in x0..=x1 {
                let rect = CellBounds {
                    south: -90.0 + yi as f64 * h,
                    north: -90.0 + (yi + 1) as f64 * h,
                    west: -180.0 + xi as f64 * w,
                    east: -180.0 + (xi + 1) as f64 * w,
                };
                if rect_intersects_polygon(&rect, &points) {
                    sids.push(Self::from_xy(xi.rem_euclid(n) as u64, yi as u64, level));
                }
            }
        }
        sids.sort_unstable();
        sids.dedup();
        debug!("hull cover at level {}: {} of {} candidate cells", level, sids.len(), candidates);
        Ok(sids)
    }
}

impl ResolutionOps for QuadTreeIndex {
    fn level(&self, sid: Sid) -> Result<u8> {
        Self::level_of(sid)
    }

    fn coerce(&self, sids: &[Sid], level: u8) -> Result<Vec<Sid>> {
        Self::check_level(level)?;
        sids.iter()
            .map(|&sid| {
                Self::level_of(sid)?;
                Ok(Sid(clear_to(sid.0, level)))
            })
            .collect()
    }

    fn expand(&self, sids: &[Sid]) -> Result<Vec<Sid>> {
        let mut set = BTreeSet::new();
        for &sid in sids {
            Self::level_of(sid)?;
            set.insert(sid.0);
        }

        // cells already inside an ancestor add nothing
        let members: Vec<u64> = set.iter().copied().collect();
        for raw in members {
            let level = level_bits(raw);
            if (0..level).any(|k| set.contains(&clear_to(raw, k))) {
                set.remove(&raw);
            }
        }

        for level in (1..=MAX_LEVEL).rev() {
            let mut siblings: BTreeMap<u64, usize> = BTreeMap::new();
            for &raw in &set {
                if level_bits(raw) == level {
                    *siblings.entry(clear_to(raw, level - 1)).or_default() += 1;
                }
            }
            for (parent, count) in siblings {
                if count < MERGE_SIBLINGS {
                    continue;
                }
                let lo = parent & !tail_mask(level - 1);
                let hi = lo | tail_mask(level - 1);
                let inside: Vec<u64> = set.range(lo..=hi).copied().collect();
                for raw in inside {
                    set.remove(&raw);
                }
                set.insert(parent);
            }
        }

        Ok(set.into_iter().map(Sid).collect())
    }
}

fn point_in_polygon(x: f64, y: f64, points: &[(f64, f64)]) -> bool {
    let mut inside = false;
    let mut j = points.len() - 1;
    for i in 0..points.len() {
        let (xi, yi) = points[i];
        let (xj, yj) = points[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Liang-Barsky clip of segment a-b against the rectangle.
fn segment_hits_rect(a: (f64, f64), b: (f64, f64), rect: &CellBounds) -> bool {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let (mut t0, mut t1) = (0.0f64, 1.0f64);
    for (p, q) in [
        (-dx, a.0 - rect.west),
        (dx, rect.east - a.0),
        (-dy, a.1 - rect.south),
        (dy, rect.north - a.1),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return false;
            }
        } else {
            let t = q / p;
            if p < 0.0 {
                if t > t1 {
                    return false;
                }
                t0 = t0.max(t);
            } else {
                if t < t0 {
                    return false;
                }
                t1 = t1.min(t);
            }
        }
    }
    true
}

fn rect_intersects_polygon(rect: &CellBounds, points: &[(f64, f64)]) -> bool {
    let (clat, clon) = rect.center();
    if point_in_polygon(clon, clat, points) {
        return true;
    }
    (0..points.len()).any(|i| segment_hits_rect(points[i], points[(i + 1) % points.len()], rect))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oracle() -> QuadTreeIndex {
        QuadTreeIndex::new()
    }

    #[test]
    fn test_root_cell() {
        assert_eq!(oracle().encode_point(12.0, 34.0, 0).unwrap(), Sid(0));
        assert_eq!(QuadTreeIndex::level_of(Sid(0)).unwrap(), 0);
    }

    #[test]
    fn test_point_lies_in_its_cell() {
        let index = oracle();
        for &(lat, lon) in &[(0.0, 0.0), (45.5, -120.25), (-89.9, 179.9), (90.0, -180.0), (12.3, 540.0)] {
            for level in [1u8, 5, 14, 20] {
                let sid = index.encode_point(lat, lon, level).unwrap();
                assert_eq!(QuadTreeIndex::level_of(sid).unwrap(), level);
                let bounds = index.bounds(sid).unwrap();
                assert!(
                    bounds.contains(lat, normalize_lon(lon)),
                    "({}, {}) at level {} not in {:?}",
                    lat,
                    lon,
                    level,
                    bounds
                );
            }
        }
    }

    #[test]
    fn test_parent_sorts_before_children() {
        let index = oracle();
        let parent = index.encode_point(10.0, 20.0, 6).unwrap();
        let children = index.children(parent).unwrap();
        for child in children {
            assert!(parent < child);
            assert_eq!(index.coerce(&[child], 6).unwrap(), vec![parent]);
        }
        assert!(children.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_malformed_sid() {
        assert!(QuadTreeIndex::level_of(FILL_SID).is_err());
        // level 0 with stray location bits
        assert!(QuadTreeIndex::level_of(Sid(1 << 40)).is_err());
        assert!(oracle().expand(&[FILL_SID]).is_err());
    }

    #[test]
    fn test_coerce_is_idempotent_and_never_refines() {
        let index = oracle();
        let sids: Vec<Sid> = (0..50)
            .map(|k| index.encode_point(-40.0 + k as f64 * 1.7, -170.0 + k as f64 * 6.9, 8 + (k % 10) as u8).unwrap())
            .collect();

        let once = index.coerce(&sids, 9).unwrap();
        let twice = index.coerce(&once, 9).unwrap();
        assert_eq!(once, twice);
        assert!(index.max_resolution(&once).unwrap().unwrap() <= 9);

        // asking for a finer level than present leaves the cell untouched
        let coarse = index.encode_point(1.0, 1.0, 4).unwrap();
        assert_eq!(index.coerce(&[coarse], 20).unwrap(), vec![coarse]);
        assert_eq!(index.min_resolution(&index.coerce(&[coarse], 20).unwrap()).unwrap(), Some(4));
    }

    #[test]
    fn test_min_max_resolution() {
        let index = oracle();
        let a = index.encode_point(0.0, 0.0, 3).unwrap();
        let b = index.encode_point(0.0, 0.0, 11).unwrap();
        assert_eq!(index.min_resolution(&[a, b]).unwrap(), Some(3));
        assert_eq!(index.max_resolution(&[a, b]).unwrap(), Some(11));
        assert_eq!(index.min_resolution(&[]).unwrap(), None);
    }

    #[test]
    fn test_expand_merges_siblings() {
        let index = oracle();
        let parent = index.encode_point(30.0, 60.0, 7).unwrap();
        let children = index.children(parent).unwrap();

        assert_eq!(index.expand(&children).unwrap(), vec![parent]);
        assert_eq!(index.expand(&children[..3]).unwrap(), vec![parent]);

        let two = index.expand(&children[..2]).unwrap();
        assert_eq!(two, children[..2].to_vec());
    }

    #[test]
    fn test_expand_cascades_upwards() {
        let index = oracle();
        let grandparent = index.encode_point(-10.0, 100.0, 5).unwrap();
        let mut fine = Vec::new();
        for parent in index.children(grandparent).unwrap() {
            fine.extend(index.children(parent).unwrap());
        }
        assert_eq!(index.expand(&fine).unwrap(), vec![grandparent]);
    }

    #[test]
    fn test_expand_drops_covered_descendants() {
        let index = oracle();
        let parent = index.encode_point(5.0, 5.0, 9).unwrap();
        let child = index.children(parent).unwrap()[2];
        let elsewhere = index.encode_point(-50.0, -50.0, 12).unwrap();
        let out = index.expand(&[child, parent, elsewhere, parent]).unwrap();
        assert_eq!(out, vec![elsewhere.min(parent), elsewhere.max(parent)]);
    }

    #[test]
    fn test_adaptive_encoding_tracks_spacing() {
        let index = oracle();
        let (rows, cols) = (10, 10);
        let lats: Vec<f64> = (0..rows * cols).map(|k| 40.0 + (k / cols) as f64 * 0.01).collect();
        let lons: Vec<f64> = (0..rows * cols).map(|k| -105.0 + (k % cols) as f64 * 0.01).collect();
        let band = LatLonBand {
            lats: &lats,
            lons: &lons,
            cols,
            fill_value: None,
        };
        let sids = index.encode(&band, Resolution::Adaptive).unwrap();
        assert_eq!(sids.len(), 100);
        for sid in sids {
            assert_eq!(QuadTreeIndex::level_of(sid).unwrap(), 14);
        }
    }

    #[test]
    fn test_fill_pixels() {
        let index = oracle();
        let lats = [10.0, -9999.0, 10.0, 10.1];
        let lons = [20.0, -9999.0, 20.1, 20.0];
        let band = LatLonBand {
            lats: &lats,
            lons: &lons,
            cols: 2,
            fill_value: Some(-9999.0),
        };
        let sids = index.encode(&band, Resolution::Fixed(10)).unwrap();
        assert_eq!(sids[1], FILL_SID);
        assert!(!sids[0].is_fill());
    }

    #[test]
    fn test_malformed_coordinate_fails() {
        let index = oracle();
        let lats = [10.0, 95.0];
        let lons = [20.0, 20.0];
        let band = LatLonBand {
            lats: &lats,
            lons: &lons,
            cols: 2,
            fill_value: None,
        };
        assert!(matches!(
            index.encode(&band, Resolution::Adaptive),
            Err(SidecarError::Oracle(_))
        ));
    }

    #[test]
    fn test_box_hull_cover() {
        let index = oracle();
        let lats = [10.0, 10.0, 11.0, 11.0];
        let lons = [20.0, 21.0, 21.0, 20.0];
        let cover = index.cover(&lats, &lons, 5).unwrap();
        assert!(!cover.is_empty());

        // level 5 cells are 11.25 x 5.625 degrees
        let (cell_w, cell_h) = (11.25, 5.625);
        for sid in cover {
            let (lat, lon) = index.center(sid).unwrap();
            assert!(lat >= 10.0 - cell_h && lat <= 11.0 + cell_h, "lat {}", lat);
            assert!(lon >= 20.0 - cell_w && lon <= 21.0 + cell_w, "lon {}", lon);
        }
    }

    #[test]
    fn test_hull_cover_fine_level_stays_inside() {
        let index = oracle();
        let lats = [10.0, 10.0, 11.0, 11.0];
        let lons = [20.0, 21.0, 21.0, 20.0];
        let cover = index.cover(&lats, &lons, 10).unwrap();
        // level 10 cells are ~0.35 x 0.18 degrees: a handful per side
        assert!(cover.len() > 4);
        for sid in &cover {
            let b = index.bounds(*sid).unwrap();
            assert!(b.north >= 10.0 && b.south <= 11.0);
            assert!(b.east >= 20.0 && b.west <= 21.0);
        }
        // the interior point is covered
        let inner = index.encode_point(10.5, 20.5, 10).unwrap();
        assert!(cover.contains(&inner));
    }

    #[test]
    fn test_hull_cover_across_antimeridian() {
        let index = oracle();
        let lats = [-1.0, -1.0, 1.0, 1.0];
        let lons = [179.0, -179.0, -179.0, 179.0];
        let cover = index.cover(&lats, &lons, 6).unwrap();
        let east = index.encode_point(0.0, 179.5, 6).unwrap();
        let west = index.encode_point(0.0, -179.5, 6).unwrap();
        assert!(cover.contains(&east));
        assert!(cover.contains(&west));
        // no cell from the far side of the globe
        for sid in cover {
            let (_, lon) = index.center(sid).unwrap();
            assert!(lon.abs() > 170.0, "unexpected cell at lon {}", lon);
        }
    }

    #[test]
    fn test_hull_cover_around_pole_reaches_pole() {
        let index = oracle();
        let lats = [80.0, 81.0, 80.0, 81.0, 80.0, 81.0];
        let lons = [0.0, 60.0, 120.0, 180.0, -120.0, -60.0];
        let cover = index.cover(&lats, &lons, 6).unwrap();

        // the cap above the ring is covered all the way round
        for lon in [-170.0, -90.0, 0.0, 90.0, 170.0] {
            let polar = index.encode_point(89.9, lon, 6).unwrap();
            assert!(cover.contains(&polar), "no polar cell at lon {}", lon);
            let inner = index.encode_point(85.0, lon, 6).unwrap();
            assert!(cover.contains(&inner), "no cell at 85N lon {}", lon);
        }
        // nothing far south of the ring
        for sid in cover {
            assert!(index.bounds(sid).unwrap().north > 79.0);
        }
    }

    #[test]
    fn test_hull_cell_budget() {
        let index = oracle();
        let lats = [-60.0, -60.0, 60.0, 60.0];
        let lons = [-100.0, 100.0, 100.0, -100.0];
        assert!(matches!(index.cover(&lats, &lons, 20), Err(SidecarError::Oracle(_))));
    }
}
