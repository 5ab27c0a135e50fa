//! Fixed-grid geostationary projection of the GOES-R imagers.
//!
//! Imager pixels are addressed by scan angles in radians from the
//! sub-satellite point. Pixels whose line of sight misses the Earth lie off
//! the disk and have no geolocation.

use crate::error::{Result, SidecarError};
use crate::model::{normalize_lon, Grid};

/// GRS80 equatorial radius, in metres.
pub const GRS80_SEMI_MAJOR: f64 = 6_378_137.0;
/// GRS80 polar radius, in metres.
pub const GRS80_SEMI_MINOR: f64 = 6_356_752.314_14;
/// Height of a geostationary orbit above the equator, in metres.
pub const GOES_PERSPECTIVE_HEIGHT: f64 = 35_786_023.0;

#[derive(Debug, Clone, PartialEq)]
pub struct GeosProjection {
    /// Satellite distance from the Earth's centre (metres).
    h: f64,
    req: f64,
    rpol: f64,
    /// Sub-satellite longitude (degrees).
    lon_origin: f64,
}

impl GeosProjection {
    pub fn new(perspective_point_height: f64, semi_major: f64, semi_minor: f64, lon_origin: f64) -> Result<Self> {
        let finite = [perspective_point_height, semi_major, semi_minor, lon_origin]
            .iter()
            .all(|v| v.is_finite());
        if !finite || perspective_point_height <= 0.0 || semi_major <= 0.0 || semi_minor <= 0.0 {
            return Err(SidecarError::validation(format!(
                "invalid geostationary projection (height {}, axes {} / {}, lon {})",
                perspective_point_height, semi_major, semi_minor, lon_origin
            )));
        }
        Ok(Self {
            h: perspective_point_height + semi_major,
            req: semi_major,
            rpol: semi_minor,
            lon_origin,
        })
    }

    /// GOES-East, parked at 75.2°W.
    pub fn goes_east() -> Self {
        Self {
            h: GOES_PERSPECTIVE_HEIGHT + GRS80_SEMI_MAJOR,
            req: GRS80_SEMI_MAJOR,
            rpol: GRS80_SEMI_MINOR,
            lon_origin: -75.2,
        }
    }

    pub fn lon_origin(&self) -> f64 {
        self.lon_origin
    }

    /// Geodetic (lat, lon) in degrees seen at scan angles `x`, `y`, or `None`
    /// when the line of sight misses the Earth.
    pub fn scan_to_geo(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let (sin_x, cos_x) = x.sin_cos();
        let (sin_y, cos_y) = y.sin_cos();
        let axes = (self.req / self.rpol).powi(2);

        let a = sin_x.powi(2) + cos_x.powi(2) * (cos_y.powi(2) + axes * sin_y.powi(2));
        let b = -2.0 * self.h * cos_x * cos_y;
        let c = self.h.powi(2) - self.req.powi(2);
        let discriminant = b * b - 4.0 * a * c;
        if discriminant < 0.0 {
            return None;
        }

        let rs = (-b - discriminant.sqrt()) / (2.0 * a);
        let sx = rs * cos_x * cos_y;
        let sy = -rs * sin_x;
        let sz = rs * cos_x * sin_y;

        let lat = (axes * sz / (self.h - sx).hypot(sy)).atan().to_degrees();
        let lon = self.lon_origin - sy.atan2(self.h - sx).to_degrees();
        Some((lat, normalize_lon(lon)))
    }

    /// Latitude and longitude grids of the fixed grid spanned by the scan
    /// axes: rows follow `y`, columns follow `x`. Off-disk pixels get `fill`
    /// in both grids.
    pub fn lat_lon_grids(&self, x: &[f64], y: &[f64], fill: f64) -> Result<(Grid<f64>, Grid<f64>)> {
        let (rows, cols) = (y.len(), x.len());
        let mut lats = Vec::with_capacity(rows * cols);
        let mut lons = Vec::with_capacity(rows * cols);
        for &yi in y {
            for &xj in x {
                let (lat, lon) = self.scan_to_geo(xj, yi).unwrap_or((fill, fill));
                lats.push(lat);
                lons.push(lon);
            }
        }
        Ok((Grid::new(rows, cols, lats)?, Grid::new(rows, cols, lons)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nadir_is_sub_satellite_point() {
        let proj = GeosProjection::goes_east();
        let (lat, lon) = proj.scan_to_geo(0.0, 0.0).unwrap();
        assert!(lat.abs() < 1e-9, "lat {}", lat);
        assert!((lon - -75.2).abs() < 1e-9, "lon {}", lon);
    }

    #[test]
    fn test_scan_directions() {
        let proj = GeosProjection::goes_east();
        // positive x looks east, positive y looks north
        let (_, east) = proj.scan_to_geo(0.05, 0.0).unwrap();
        let (north, _) = proj.scan_to_geo(0.0, 0.05).unwrap();
        assert!(east > -75.2);
        assert!(north > 0.0);
    }

    #[test]
    fn test_space_pixels_have_no_geolocation() {
        let proj = GeosProjection::goes_east();
        // the disk spans about 0.152 rad from nadir
        assert!(proj.scan_to_geo(0.15, 0.0).is_some());
        assert!(proj.scan_to_geo(0.16, 0.0).is_none());
        assert!(proj.scan_to_geo(0.12, 0.12).is_none());
    }

    #[test]
    fn test_west_satellite_wraps_longitudes() {
        let proj = GeosProjection::new(GOES_PERSPECTIVE_HEIGHT, GRS80_SEMI_MAJOR, GRS80_SEMI_MINOR, -137.2).unwrap();
        let (_, lon) = proj.scan_to_geo(-0.14, 0.0).unwrap();
        assert!((-180.0..180.0).contains(&lon), "lon {}", lon);
        assert!(lon > 0.0, "limb west of the antimeridian should wrap, got {}", lon);
    }

    #[test]
    fn test_full_disk_corners_are_filled() {
        let proj = GeosProjection::goes_east();
        let axis: Vec<f64> = (0..5).map(|k| -0.15 + k as f64 * 0.075).collect();
        let y: Vec<f64> = axis.iter().rev().copied().collect();
        let (lats, lons) = proj.lat_lon_grids(&axis, &y, -9999.0).unwrap();

        assert_eq!(lats.shape(), (5, 5));
        for (i, j) in [(0, 0), (0, 4), (4, 0), (4, 4)] {
            assert_eq!(lats.get(i, j), Some(&-9999.0));
            assert_eq!(lons.get(i, j), Some(&-9999.0));
        }
        let centre = *lats.get(2, 2).unwrap();
        assert!(centre.abs() < 1e-9);
        // first row is the northern edge
        assert!(*lats.get(0, 2).unwrap() > 60.0);
    }

    #[test]
    fn test_invalid_projection() {
        assert!(GeosProjection::new(0.0, GRS80_SEMI_MAJOR, GRS80_SEMI_MINOR, -75.0).is_err());
        assert!(GeosProjection::new(GOES_PERSPECTIVE_HEIGHT, f64::NAN, GRS80_SEMI_MINOR, -75.0).is_err());
    }
}
