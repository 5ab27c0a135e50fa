//! Granule adapters.
//!
//! Each supported product knows how to hand over its geolocation grids and,
//! when the product carries one, its boundary ring. The pipeline only sees
//! the [`GeolocationSource`] capability; products are picked by
//! [`ProductKind`] tag.

pub mod geostationary;
pub mod hdfeos;
pub mod latlon_grid;
#[cfg(feature = "netcdf")]
pub mod netcdf;
pub mod tilegrid;

pub use geostationary::GeosProjection;
pub use hdfeos::HdfEosSwath;
pub use latlon_grid::Merra2Grid;
pub use tilegrid::ModisTile;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::debug;

use crate::error::{Result, SidecarError};
use crate::model::{BoundaryRing, Grid, NominalTag};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProductKind {
    Mod05,
    Mod09,
    Vnp03Dnb,
    Vnp02Dnb,
    CldmskL2Viirs,
    Ssmis,
    Goes,
    ModisTile,
    Merra2,
}

impl ProductKind {
    pub const ALL: [ProductKind; 9] = [
        ProductKind::Mod05,
        ProductKind::Mod09,
        ProductKind::Vnp03Dnb,
        ProductKind::Vnp02Dnb,
        ProductKind::CldmskL2Viirs,
        ProductKind::Ssmis,
        ProductKind::Goes,
        ProductKind::ModisTile,
        ProductKind::Merra2,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ProductKind::Mod05 => "MOD05",
            ProductKind::Mod09 => "MOD09",
            ProductKind::Vnp03Dnb => "VNP03DNB",
            ProductKind::Vnp02Dnb => "VNP02DNB",
            ProductKind::CldmskL2Viirs => "CLDMSK_L2_VIIRS",
            ProductKind::Ssmis => "SSMIS",
            ProductKind::Goes => "GOES",
            ProductKind::ModisTile => "MODIS_TILE",
            ProductKind::Merra2 => "MERRA2",
        }
    }

    /// Nominal resolution namespacing a single-grid product. Products with
    /// several scan groups name each group instead.
    pub fn nominal_tag(&self) -> Option<&'static str> {
        match self {
            ProductKind::Mod05 => Some("5km"),
            ProductKind::Mod09 => Some("1km"),
            ProductKind::Vnp03Dnb | ProductKind::Vnp02Dnb | ProductKind::CldmskL2Viirs => Some("750m"),
            ProductKind::ModisTile => Some("500m"),
            ProductKind::Merra2 => Some("50km"),
            ProductKind::Ssmis | ProductKind::Goes => None,
        }
    }

    /// Guesses the product from a granule file name.
    pub fn guess(path: &Path) -> Option<ProductKind> {
        let name = path.file_name()?.to_str()?.to_ascii_uppercase();
        if tilegrid::find_tile_token(&name).is_some() {
            return Some(ProductKind::ModisTile);
        }
        let kind = if name.contains("CLDMSK_L2_VIIRS") {
            ProductKind::CldmskL2Viirs
        } else if name.contains("VNP03DNB") {
            ProductKind::Vnp03Dnb
        } else if name.contains("VNP02DNB") {
            ProductKind::Vnp02Dnb
        } else if name.contains("MOD05") {
            ProductKind::Mod05
        } else if name.contains("MOD09") {
            ProductKind::Mod09
        } else if name.contains("SSMIS") {
            ProductKind::Ssmis
        } else if name.contains("ABI-L") || name.contains("GOES") {
            ProductKind::Goes
        } else if name.contains("MERRA2") {
            ProductKind::Merra2
        } else {
            return None;
        };
        Some(kind)
    }
}

impl fmt::Display for ProductKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProductKind {
    type Err = SidecarError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_uppercase();
        ProductKind::ALL
            .into_iter()
            .find(|kind| kind.name() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = ProductKind::ALL.iter().map(|k| k.name()).collect();
                SidecarError::UnsupportedProduct(format!("{} (known: {})", s, known.join(", ")))
            })
    }
}

/// How the namespaces of a sidecar are laid out in the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceLayout {
    /// All variables at the root, suffixed with their tag.
    Flat,
    /// One container group per tag, plus a combined cover at the root.
    Grouped,
}

/// One lat/lon grid of a granule.
#[derive(Debug, Clone)]
pub struct Geolocation {
    pub tag: NominalTag,
    pub lats: Grid<f64>,
    pub lons: Grid<f64>,
    pub fill_value: Option<f64>,
}

/// What the pipeline needs from a granule.
pub trait GeolocationSource: Send + Sync {
    fn product(&self) -> ProductKind;

    fn granule_path(&self) -> &Path;

    fn geolocations(&self) -> Result<Vec<Geolocation>>;

    /// Footprint ring, for products that carry one.
    fn boundary(&self) -> Result<Option<BoundaryRing>> {
        Ok(None)
    }

    /// Fixed encode level; `None` adapts to the pixel spacing.
    fn encode_resolution(&self) -> Option<u8> {
        None
    }

    fn layout(&self) -> NamespaceLayout {
        NamespaceLayout::Flat
    }
}

/// Opens a granule of `kind` stored at `path`.
pub fn open_granule(kind: ProductKind, path: &Path) -> Result<Box<dyn GeolocationSource>> {
    debug!("Opening {} granule {:?}", kind, path);
    match kind {
        ProductKind::ModisTile => Ok(Box::new(ModisTile::from_path(path)?)),
        ProductKind::Merra2 => Ok(Box::new(Merra2Grid::new(path))),
        ProductKind::Mod05 | ProductKind::Mod09 => Err(SidecarError::UnsupportedProduct(format!(
            "{} granules are HDF4; read them externally and use HdfEosSwath::from_parts",
            kind
        ))),
        #[cfg(feature = "netcdf")]
        ProductKind::Vnp03Dnb | ProductKind::CldmskL2Viirs => {
            Ok(Box::new(self::netcdf::ViirsL2::open(kind, path, path)?))
        }
        #[cfg(feature = "netcdf")]
        ProductKind::Vnp02Dnb => {
            let geolocation = vnp03_companion(path)?;
            Ok(Box::new(self::netcdf::ViirsL2::open(kind, path, &geolocation)?))
        }
        #[cfg(feature = "netcdf")]
        ProductKind::Ssmis => Ok(Box::new(self::netcdf::Ssmis::open(path)?)),
        #[cfg(feature = "netcdf")]
        ProductKind::Goes => Ok(Box::new(self::netcdf::Goes::open(path)?)),
        #[cfg(not(feature = "netcdf"))]
        ProductKind::Vnp03Dnb
        | ProductKind::Vnp02Dnb
        | ProductKind::CldmskL2Viirs
        | ProductKind::Ssmis
        | ProductKind::Goes => {
            Err(SidecarError::UnsupportedProduct(format!(
                "{} needs the `netcdf` feature",
                kind
            )))
        }
    }
}

/// Finds the VNP03DNB geolocation file belonging to a VNP02DNB granule.
///
/// The two share the name up to the production timestamp, e.g.
/// `VNP02DNB.A2020001.0000.001.2020001123456.nc` pairs with
/// `VNP03DNB.A2020001.0000.001.<any>.nc` in the same folder.
pub fn vnp03_companion(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| SidecarError::validation(format!("{:?} has no file name", path)))?;
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() < 3 || !name.contains("VNP02DNB") {
        return Err(SidecarError::validation(format!("{} is not a VNP02DNB granule name", name)));
    }
    let prefix = parts[..parts.len() - 2].join(".").replace("VNP02DNB", "VNP03DNB");

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut candidates: Vec<PathBuf> = fs::read_dir(&dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|s| s.to_str())
                .is_some_and(|s| s.starts_with(&prefix))
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next().ok_or_else(|| {
        SidecarError::validation(format!("no {}* next to {}", prefix, name))
    })
}
