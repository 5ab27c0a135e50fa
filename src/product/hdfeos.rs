//! MODIS HDF-EOS swaths (MOD05, MOD09).
//!
//! The HDF4 container itself is read outside this crate; callers hand over
//! the latitude/longitude arrays and the raw ODL metadata blocks. The swath
//! footprint comes from the G-ring stored in that metadata.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, SidecarError};
use crate::model::{BoundaryRing, Grid, NominalTag};
use crate::parser::{parse_odl, parse_tuple, OdlGroup};
use crate::product::{Geolocation, GeolocationSource, ProductKind};

const CORE_GRING: &[&str] = &[
    "INVENTORYMETADATA",
    "SPATIALDOMAINCONTAINER",
    "HORIZONTALSPATIALDOMAINCONTAINER",
    "GPOLYGON",
    "GPOLYGONCONTAINER",
    "GRINGPOINT",
];

const ARCHIVE_GRING: &[&str] = &["ARCHIVEDMETADATA", "GPOLYGON", "GPOLYGONCONTAINER", "GRINGPOINT"];

/// Where the G-ring lives for each swath product. MOD05 keeps it in the
/// archive metadata, MOD09 in the core metadata.
fn gring_group(kind: ProductKind) -> Result<&'static [&'static str]> {
    match kind {
        ProductKind::Mod05 => Ok(ARCHIVE_GRING),
        ProductKind::Mod09 => Ok(CORE_GRING),
        other => Err(SidecarError::UnsupportedProduct(format!("{} is not an HDF-EOS swath", other))),
    }
}

fn gring_values<'a>(tree: &OdlGroup, group: &[&'a str], leaf: &'a str) -> Result<Vec<f64>> {
    let path: Vec<&str> = group.iter().copied().chain([leaf, "VALUE"]).collect();
    parse_tuple(tree.text_at(&path)?)
}

/// Reads the G-ring out of the given ODL metadata blocks.
pub fn read_gring(kind: ProductKind, metadata: &[&str]) -> Result<BoundaryRing> {
    let group = gring_group(kind)?;
    let mut tree = OdlGroup::default();
    for block in metadata {
        tree.merge(parse_odl(block)?);
    }
    let lats = gring_values(&tree, group, "GRINGPOINTLATITUDE")?;
    let lons = gring_values(&tree, group, "GRINGPOINTLONGITUDE")?;
    debug!("{} G-ring has {} points", kind, lats.len());
    BoundaryRing::from_metadata_order(lats, lons)
}

#[derive(Debug, Clone)]
pub struct HdfEosSwath {
    kind: ProductKind,
    path: PathBuf,
    lats: Grid<f64>,
    lons: Grid<f64>,
    ring: BoundaryRing,
}

impl HdfEosSwath {
    /// Builds a swath from already-read arrays and its metadata blocks
    /// (`CoreMetadata.0`, `ArchiveMetadata.0`, ...).
    pub fn from_parts(
        kind: ProductKind,
        path: &Path,
        lats: Grid<f64>,
        lons: Grid<f64>,
        metadata: &[&str],
    ) -> Result<Self> {
        let ring = read_gring(kind, metadata)?;
        if lats.shape() != lons.shape() {
            return Err(SidecarError::validation(format!(
                "{:?}: latitude {:?} and longitude {:?} differ in shape",
                path,
                lats.shape(),
                lons.shape()
            )));
        }
        Ok(Self {
            kind,
            path: path.to_path_buf(),
            lats,
            lons,
            ring,
        })
    }
}

impl GeolocationSource for HdfEosSwath {
    fn product(&self) -> ProductKind {
        self.kind
    }

    fn granule_path(&self) -> &Path {
        &self.path
    }

    fn geolocations(&self) -> Result<Vec<Geolocation>> {
        let tag = self.kind.nominal_tag().ok_or_else(|| {
            SidecarError::UnsupportedProduct(format!("{} has no nominal resolution", self.kind))
        })?;
        Ok(vec![Geolocation {
            tag: NominalTag::new(tag),
            lats: self.lats.clone(),
            lons: self.lons.clone(),
            fill_value: None,
        }])
    }

    fn boundary(&self) -> Result<Option<BoundaryRing>> {
        Ok(Some(self.ring.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARCHIVE: &str = "
GROUP = ARCHIVEDMETADATA
  GROUPTYPE = MASTERGROUP
  GROUP = GPOLYGON
    OBJECT = GPOLYGONCONTAINER
      CLASS = \"1\"
      GROUP = GRINGPOINT
        OBJECT = GRINGPOINTLONGITUDE
          VALUE = (-84.0, -55.0, -61.0, -94.0)
        END_OBJECT = GRINGPOINTLONGITUDE
        OBJECT = GRINGPOINTLATITUDE
          VALUE = (31.0, 35.0, 53.0, 48.0)
        END_OBJECT = GRINGPOINTLATITUDE
      END_GROUP = GRINGPOINT
    END_OBJECT = GPOLYGONCONTAINER
  END_GROUP = GPOLYGON
END_GROUP = ARCHIVEDMETADATA
END
";

    fn small_grid() -> (Grid<f64>, Grid<f64>) {
        (
            Grid::from_fn(3, 2, |i, _| 40.0 + i as f64),
            Grid::from_fn(3, 2, |_, j| -70.0 + j as f64),
        )
    }

    #[test]
    fn test_mod05_ring_is_reversed() {
        let ring = read_gring(ProductKind::Mod05, &["GROUP = OTHER\nEND_GROUP = OTHER\n", ARCHIVE]).unwrap();
        assert_eq!(ring.lats(), &[48.0, 53.0, 35.0, 31.0]);
        assert_eq!(ring.lons(), &[-94.0, -61.0, -55.0, -84.0]);
    }

    #[test]
    fn test_mod09_looks_in_core_metadata() {
        // archive metadata alone does not satisfy MOD09
        assert!(matches!(
            read_gring(ProductKind::Mod09, &[ARCHIVE]),
            Err(SidecarError::Parse(_))
        ));
    }

    #[test]
    fn test_swath_source() {
        let (lats, lons) = small_grid();
        let swath = HdfEosSwath::from_parts(ProductKind::Mod05, Path::new("MOD05_L2.hdf"), lats, lons, &[ARCHIVE])
            .unwrap();
        let geo = swath.geolocations().unwrap();
        assert_eq!(geo[0].tag.as_str(), "5km");
        assert!(swath.boundary().unwrap().is_some());
    }

    #[test]
    fn test_non_swath_product_rejected() {
        let (lats, lons) = small_grid();
        assert!(matches!(
            HdfEosSwath::from_parts(ProductKind::Merra2, Path::new("x"), lats, lons, &[ARCHIVE]),
            Err(SidecarError::UnsupportedProduct(_))
        ));
    }
}
