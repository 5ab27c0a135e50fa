//! MERRA-2 regular lat/lon grid.
//!
//! The grid is fixed (0.5° x 0.625°, 361 x 576), so no file is read: the
//! coordinates are generated and encoded at one fixed level.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::model::{Grid, NominalTag};
use crate::product::{Geolocation, GeolocationSource, ProductKind};

pub const MERRA2_ROWS: usize = 361;
pub const MERRA2_COLS: usize = 576;
const LAT_STEP: f64 = 0.5;
const LON_STEP: f64 = 0.625;
/// Encode level used for every MERRA-2 pixel.
pub const MERRA2_LEVEL: u8 = 10;

#[derive(Debug, Clone)]
pub struct Merra2Grid {
    path: PathBuf,
    rows: usize,
    cols: usize,
}

impl Merra2Grid {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            rows: MERRA2_ROWS,
            cols: MERRA2_COLS,
        }
    }

    /// Keeps only the first `rows` x `cols` corner of the grid.
    pub fn truncated(mut self, rows: usize, cols: usize) -> Self {
        self.rows = rows.clamp(1, MERRA2_ROWS);
        self.cols = cols.clamp(1, MERRA2_COLS);
        self
    }

    pub fn lat_lon(&self) -> (Grid<f64>, Grid<f64>) {
        let lats = Grid::from_fn(self.rows, self.cols, |i, _| -90.0 + i as f64 * LAT_STEP);
        let lons = Grid::from_fn(self.rows, self.cols, |_, j| -180.0 + j as f64 * LON_STEP);
        (lats, lons)
    }
}

impl GeolocationSource for Merra2Grid {
    fn product(&self) -> ProductKind {
        ProductKind::Merra2
    }

    fn granule_path(&self) -> &Path {
        &self.path
    }

    fn geolocations(&self) -> Result<Vec<Geolocation>> {
        let (lats, lons) = self.lat_lon();
        Ok(vec![Geolocation {
            tag: NominalTag::new(ProductKind::Merra2.nominal_tag().unwrap_or("50km")),
            lats,
            lons,
            fill_value: None,
        }])
    }

    fn encode_resolution(&self) -> Option<u8> {
        Some(MERRA2_LEVEL)
    }
}
