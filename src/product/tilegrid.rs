//! MODIS sinusoidal tiles.
//!
//! A tile `hHHvVV` is a 10°x10° block of the MODIS sinusoidal grid. Its pixel
//! centres are laid out on a regular grid in projected metres and mapped back
//! to geographic coordinates on the MODIS sphere.

use std::f64::consts::PI;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, SidecarError};
use crate::model::{Grid, NominalTag};
use crate::product::{Geolocation, GeolocationSource, ProductKind};

/// Pixels along each side of a 500 m tile.
pub const TILE_SIZE: usize = 2400;
/// Pixel size of a 500 m tile, in metres.
pub const PIXEL_SIZE: f64 = 463.312_716_569_385_2;
/// Radius of the MODIS sinusoidal sphere, in metres.
pub const SPHERE_RADIUS: f64 = 6_371_007.181;

const TILE_DEGREES: f64 = 10.0;
const MAX_H: u32 = 35;
const MAX_V: u32 = 17;
const FILL_VALUE: f64 = -9999.0;

/// Finds an `hHHvVV` token in a file or tile name.
pub fn find_tile_token(name: &str) -> Option<(u32, u32)> {
    let bytes = name.as_bytes();
    bytes.windows(6).find_map(|w| {
        let is_token = w[0].eq_ignore_ascii_case(&b'h')
            && w[3].eq_ignore_ascii_case(&b'v')
            && [w[1], w[2], w[4], w[5]].iter().all(u8::is_ascii_digit);
        if !is_token {
            return None;
        }
        let h = u32::from(w[1] - b'0') * 10 + u32::from(w[2] - b'0');
        let v = u32::from(w[4] - b'0') * 10 + u32::from(w[5] - b'0');
        Some((h, v))
    })
}

#[derive(Debug, Clone)]
pub struct ModisTile {
    h: u32,
    v: u32,
    size: usize,
    path: PathBuf,
}

impl ModisTile {
    pub fn new(h: u32, v: u32) -> Result<Self> {
        if h > MAX_H || v > MAX_V {
            return Err(SidecarError::validation(format!(
                "tile h{:02}v{:02} is outside the sinusoidal grid",
                h, v
            )));
        }
        Ok(Self {
            h,
            v,
            size: TILE_SIZE,
            path: PathBuf::from(format!("h{:02}v{:02}.hdf", h, v)),
        })
    }

    /// Parses a tile name such as `h08v05`.
    pub fn from_name(name: &str) -> Result<Self> {
        let (h, v) = find_tile_token(name)
            .ok_or_else(|| SidecarError::validation(format!("{:?} names no hHHvVV tile", name)))?;
        Self::new(h, v)
    }

    /// Tile named by a granule file such as `MOD09GA.A2020001.h08v05.006.hdf`.
    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path.file_name().and_then(|s| s.to_str()).unwrap_or_default();
        let mut tile = Self::from_name(name)?;
        tile.path = path.to_path_buf();
        Ok(tile)
    }

    /// Samples the tile with `size` pixels per side instead of the native
    /// 2400.
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size.max(1);
        self
    }

    pub fn name(&self) -> String {
        format!("h{:02}v{:02}", self.h, self.v)
    }

    /// West and north edges of the tile in sinusoidal degrees.
    pub fn origin(&self) -> (f64, f64) {
        (
            -180.0 + f64::from(self.h) * TILE_DEGREES,
            90.0 - f64::from(self.v) * TILE_DEGREES,
        )
    }

    fn pixel_size(&self) -> f64 {
        PIXEL_SIZE * TILE_SIZE as f64 / self.size as f64
    }

    /// Geographic coordinates of every pixel centre. Pixels that fall off
    /// the sinusoidal domain carry the fill value.
    pub fn lat_lon(&self) -> (Grid<f64>, Grid<f64>) {
        let (west, north) = self.origin();
        let metres_per_degree = SPHERE_RADIUS * PI / 180.0;
        let left = west * metres_per_degree;
        let top = north * metres_per_degree;
        let res = self.pixel_size();

        let mut lats = Vec::with_capacity(self.size * self.size);
        let mut lons = Vec::with_capacity(self.size * self.size);
        for i in 0..self.size {
            let y = top - (i as f64 + 0.5) * res;
            let lat = y / metres_per_degree;
            for k in 0..self.size {
                let x = left + (k as f64 + 0.5) * res;
                let lon = x / (SPHERE_RADIUS * lat.to_radians().cos()) * 180.0 / PI;
                if lon.is_finite() && (-180.0..=180.0).contains(&lon) {
                    lats.push(lat);
                    lons.push(lon);
                } else {
                    lats.push(FILL_VALUE);
                    lons.push(FILL_VALUE);
                }
            }
        }
        let n = self.size;
        (
            Grid { rows: n, cols: n, values: lats },
            Grid { rows: n, cols: n, values: lons },
        )
    }
}

impl GeolocationSource for ModisTile {
    fn product(&self) -> ProductKind {
        ProductKind::ModisTile
    }

    fn granule_path(&self) -> &Path {
        &self.path
    }

    fn geolocations(&self) -> Result<Vec<Geolocation>> {
        debug!("Computing pixel centres of tile {} ({}x{})", self.name(), self.size, self.size);
        let (lats, lons) = self.lat_lon();
        Ok(vec![Geolocation {
            tag: NominalTag::new(ProductKind::ModisTile.nominal_tag().unwrap_or("500m")),
            lats,
            lons,
            fill_value: Some(FILL_VALUE),
        }])
    }
}
