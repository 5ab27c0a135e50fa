use std::fmt;
use std::ops::Range;

use crate::error::{Result, SidecarError};

/// Finest resolution level a SID can carry.
pub const MAX_LEVEL: u8 = 27;

/// Spatial cell identifier. Opaque to the pipeline: only the oracle may
/// interpret its bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Sid(pub u64);

/// Marker stored in index grids for pixels without valid geolocation
/// (off-disk or limb pixels). Never a legal SID.
pub const FILL_SID: Sid = Sid(u64::MAX);

impl Sid {
    pub fn is_fill(self) -> bool {
        self == FILL_SID
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Row-major 2-D array, rows along the first axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid<T> {
    pub rows: usize,
    pub cols: usize,
    pub values: Vec<T>,
}

impl<T> Grid<T> {
    pub fn new(rows: usize, cols: usize, values: Vec<T>) -> Result<Self> {
        if rows.checked_mul(cols) != Some(values.len()) {
            return Err(SidecarError::validation(format!(
                "grid of {}x{} cannot hold {} values",
                rows,
                cols,
                values.len()
            )));
        }
        Ok(Self { rows, cols, values })
    }

    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut values = Vec::with_capacity(rows * cols);
        for i in 0..rows {
            for j in 0..cols {
                values.push(f(i, j));
            }
        }
        Self { rows, cols, values }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&T> {
        if row < self.rows && col < self.cols {
            self.values.get(row * self.cols + col)
        } else {
            None
        }
    }

    /// Values of a contiguous band of rows.
    pub fn row_band(&self, rows: Range<usize>) -> &[T] {
        &self.values[rows.start * self.cols..rows.end * self.cols]
    }
}

/// Per-pixel SIDs with the shape of the source lat/lon grid.
pub type IndexGrid = Grid<Sid>;

impl Grid<Sid> {
    /// SIDs of all pixels that carry geolocation.
    pub fn valid_sids(&self) -> impl Iterator<Item = Sid> + '_ {
        self.values.iter().copied().filter(|sid| !sid.is_fill())
    }
}

/// Label namespacing the grids of one granule ("1km", "500m", "S1", ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NominalTag(String);

impl NominalTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NominalTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deduplicated set of SIDs covering a region. Kept sorted so that equal
/// sets compare equal; callers must not attach meaning to the order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cover(Vec<Sid>);

impl Cover {
    pub fn new(sids: impl IntoIterator<Item = Sid>) -> Self {
        let mut sids: Vec<Sid> = sids.into_iter().collect();
        sids.sort_unstable();
        sids.dedup();
        Self(sids)
    }

    pub fn as_slice(&self) -> &[Sid] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, sid: Sid) -> bool {
        self.0.binary_search(&sid).is_ok()
    }

    pub fn into_vec(self) -> Vec<Sid> {
        self.0
    }
}

/// Ordered (lat, lon) polygon approximating a granule footprint.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryRing {
    lats: Vec<f64>,
    lons: Vec<f64>,
}

impl BoundaryRing {
    pub fn new(lats: Vec<f64>, lons: Vec<f64>) -> Result<Self> {
        if lats.len() != lons.len() {
            return Err(SidecarError::validation(format!(
                "ring has {} latitudes but {} longitudes",
                lats.len(),
                lons.len()
            )));
        }
        Ok(Self { lats, lons })
    }

    /// Builds a ring from metadata order. Granule metadata lists G-ring points
    /// in the opposite winding to the one the hull cover expects.
    pub fn from_metadata_order(mut lats: Vec<f64>, mut lons: Vec<f64>) -> Result<Self> {
        lats.reverse();
        lons.reverse();
        Self::new(lats, lons)
    }

    pub fn lats(&self) -> &[f64] {
        &self.lats
    }

    pub fn lons(&self) -> &[f64] {
        &self.lons
    }

    pub fn len(&self) -> usize {
        self.lats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lats.is_empty()
    }

    /// Rejects rings the hull cover cannot handle: non-finite points, fewer
    /// than three distinct vertices, or crossing edges.
    pub fn validate(&self) -> Result<()> {
        if let Some(k) = (0..self.len()).find(|&k| !self.lats[k].is_finite() || !self.lons[k].is_finite()) {
            return Err(SidecarError::validation(format!("ring vertex {} is not finite", k)));
        }
        if let Some(k) = self.lats.iter().position(|lat| lat.abs() > 90.0) {
            return Err(SidecarError::validation(format!(
                "ring vertex {} has latitude {} outside [-90, 90]",
                k, self.lats[k]
            )));
        }

        let points = self.open_points();
        if points.len() < 3 {
            return Err(SidecarError::validation(format!(
                "ring needs at least 3 distinct vertices, got {}",
                points.len()
            )));
        }

        // A ring around a pole has no crossing-free picture in (lon, lat):
        // test it in an azimuthal plane centred on that pole instead.
        let unwrapped = UnwrappedRing::new(&points);
        let plane: Vec<(f64, f64)> = match unwrapped.pole {
            Some(pole) => unwrapped.points.iter().map(|&p| polar_azimuthal(p, pole)).collect(),
            None => unwrapped.points,
        };

        let n = plane.len();
        for a in 0..n {
            for b in (a + 1)..n {
                // adjacent edges share a vertex
                if b == a + 1 || (a == 0 && b == n - 1) {
                    continue;
                }
                let (p1, p2) = (plane[a], plane[(a + 1) % n]);
                let (q1, q2) = (plane[b], plane[(b + 1) % n]);
                if segments_intersect(p1, p2, q1, q2) {
                    return Err(SidecarError::validation(format!(
                        "ring is self-intersecting (edges {} and {})",
                        a, b
                    )));
                }
            }
        }
        Ok(())
    }

    /// Vertices as (lon, lat) with consecutive duplicates and an explicit
    /// closing vertex removed.
    fn open_points(&self) -> Vec<(f64, f64)> {
        let mut points: Vec<(f64, f64)> = Vec::with_capacity(self.len());
        for (&lat, &lon) in self.lats.iter().zip(&self.lons) {
            if points.last() != Some(&(lon, lat)) {
                points.push((lon, lat));
            }
        }
        while points.len() > 1 && points.first() == points.last() {
            points.pop();
        }
        points
    }
}

/// Wraps a longitude into [-180, 180).
pub(crate) fn normalize_lon(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

/// Ring vertices as (lon, lat) with longitudes unwrapped so that no step
/// exceeds 180 degrees. Rings crossing the antimeridian stay contiguous.
///
/// A ring whose longitudes drift a full turn before closing encircles a
/// pole: `pole` holds that pole's latitude, taken on the side of the ring's
/// mean latitude.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct UnwrappedRing {
    pub points: Vec<(f64, f64)>,
    pub pole: Option<f64>,
    drift: f64,
}

impl UnwrappedRing {
    pub fn new(vertices: &[(f64, f64)]) -> Self {
        let mut points: Vec<(f64, f64)> = Vec::with_capacity(vertices.len());
        for &(lon, lat) in vertices {
            let mut lon = normalize_lon(lon);
            if let Some(&(prev, _)) = points.last() {
                while lon - prev > 180.0 {
                    lon -= 360.0;
                }
                while lon - prev < -180.0 {
                    lon += 360.0;
                }
            }
            points.push((lon, lat));
        }

        let (mut drift, mut pole) = (0.0, None);
        if let (Some(&(first, _)), Some(&(last, _))) = (points.first(), points.last()) {
            let closing = normalize_lon(first - last);
            drift = last + closing - first;
            if drift.abs() > 180.0 {
                let mean = points.iter().map(|p| p.1).sum::<f64>() / points.len() as f64;
                pole = Some(if mean >= 0.0 { 90.0 } else { -90.0 });
            } else {
                drift = 0.0;
            }
        }
        Self { points, pole, drift }
    }

    pub fn from_slices(lats: &[f64], lons: &[f64]) -> Self {
        let vertices: Vec<(f64, f64)> = lons.iter().copied().zip(lats.iter().copied()).collect();
        Self::new(&vertices)
    }

    /// Planar polygon of the enclosed area. A polar ring is closed a full
    /// turn later and run along the pole's latitude back to its start.
    pub fn capped(&self) -> Vec<(f64, f64)> {
        let mut polygon = self.points.clone();
        if let (Some(pole), Some(&(lon, lat))) = (self.pole, self.points.first()) {
            polygon.push((lon + self.drift, lat));
            polygon.push((lon + self.drift, pole));
            polygon.push((lon, pole));
        }
        polygon
    }
}

/// Azimuthal equidistant projection centred on `pole`, in degrees of arc.
fn polar_azimuthal((lon, lat): (f64, f64), pole: f64) -> (f64, f64) {
    let r = (pole - lat).abs();
    let theta = lon.to_radians();
    (r * theta.cos(), r * theta.sin())
}

fn orientation(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> f64 {
    (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0)
}

fn on_segment(a: (f64, f64), b: (f64, f64), p: (f64, f64)) -> bool {
    p.0 >= a.0.min(b.0) && p.0 <= a.0.max(b.0) && p.1 >= a.1.min(b.1) && p.1 <= a.1.max(b.1)
}

fn segments_intersect(p1: (f64, f64), p2: (f64, f64), q1: (f64, f64), q2: (f64, f64)) -> bool {
    let d1 = orientation(q1, q2, p1);
    let d2 = orientation(q1, q2, p2);
    let d3 = orientation(p1, p2, q1);
    let d4 = orientation(p1, p2, q2);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    (d1 == 0.0 && on_segment(q1, q2, p1))
        || (d2 == 0.0 && on_segment(q1, q2, p2))
        || (d3 == 0.0 && on_segment(p1, p2, q1))
        || (d4 == 0.0 && on_segment(p1, p2, q2))
}
