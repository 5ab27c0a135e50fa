//! NetCDF/HDF5 granules: VIIRS level-2 swaths, SSMIS scan groups and GOES
//! fixed-grid imagery.

use std::path::{Path, PathBuf};

use netcdf::AttributeValue;
use tracing::{debug, warn};

use crate::error::{Result, SidecarError};
use crate::model::{BoundaryRing, Grid, NominalTag};
use crate::product::geostationary::{GeosProjection, GRS80_SEMI_MAJOR, GRS80_SEMI_MINOR};
use crate::product::{Geolocation, GeolocationSource, NamespaceLayout, ProductKind};

const VIIRS_GEO_GROUP: &str = "geolocation_data";
const SSMIS_GROUPS: [&str; 4] = ["S1", "S2", "S3", "S4"];
const GOES_PROJECTION: &str = "goes_imager_projection";
/// Coordinate value of GOES pixels off the Earth's disk.
pub const GOES_FILL_VALUE: f64 = -9999.0;

fn missing(what: &str, path: &Path) -> SidecarError {
    SidecarError::validation(format!("{:?} has no {}", path, what))
}

/// Reads a 2-D coordinate variable as `f64`.
fn read_grid(var: &netcdf::Variable<'_>) -> Result<Grid<f64>> {
    let dims = var.dimensions();
    if dims.len() != 2 {
        return Err(SidecarError::validation(format!(
            "{} has {} dimensions, expected 2",
            var.name(),
            dims.len()
        )));
    }
    let (rows, cols) = (dims[0].len(), dims[1].len());
    let values: Vec<f64> = var.get_values::<f64, _>(..)?;
    Grid::new(rows, cols, values)
}

fn fill_value(var: &netcdf::Variable<'_>) -> Option<f64> {
    if !var.attributes().any(|attr| attr.name() == "_FillValue") {
        return None;
    }
    let value = var.attribute_value("_FillValue")?.ok()?;
    f64::try_from(value).ok()
}

fn as_f64s(value: AttributeValue) -> Option<Vec<f64>> {
    match value {
        AttributeValue::Doubles(v) => Some(v),
        AttributeValue::Floats(v) => Some(v.into_iter().map(f64::from).collect()),
        AttributeValue::Double(v) => Some(vec![v]),
        AttributeValue::Float(v) => Some(vec![f64::from(v)]),
        _ => None,
    }
}

fn var_f64(var: &netcdf::Variable<'_>, name: &str) -> Result<Option<f64>> {
    match var.attribute_value(name) {
        Some(value) => Ok(as_f64s(value?).and_then(|v| v.first().copied())),
        None => Ok(None),
    }
}

fn var_text(var: &netcdf::Variable<'_>, name: &str) -> Result<Option<String>> {
    match var.attribute_value(name) {
        Some(value) => match value? {
            AttributeValue::Str(text) => Ok(Some(text)),
            _ => Ok(None),
        },
        None => Ok(None),
    }
}

/// Reads a 1-D variable, applying its packing attributes.
fn read_unpacked(var: &netcdf::Variable<'_>) -> Result<Vec<f64>> {
    let scale = var_f64(var, "scale_factor")?.unwrap_or(1.0);
    let offset = var_f64(var, "add_offset")?.unwrap_or(0.0);
    let raw: Vec<f64> = var.get_values::<f64, _>(..)?;
    Ok(raw.into_iter().map(|v| v * scale + offset).collect())
}

fn global_f64s(file: &netcdf::File, name: &str) -> Result<Option<Vec<f64>>> {
    match file.attribute(name) {
        Some(attr) => Ok(as_f64s(attr.value()?)),
        None => Ok(None),
    }
}

/// VIIRS level-2 swath (VNP03DNB, VNP02DNB via its VNP03DNB companion,
/// CLDMSK_L2_VIIRS).
#[derive(Debug, Clone)]
pub struct ViirsL2 {
    kind: ProductKind,
    path: PathBuf,
    geolocation: Geolocation,
    ring: Option<BoundaryRing>,
}

impl ViirsL2 {
    /// Opens the swath `path`, reading coordinates from `geolocation_path`
    /// (the granule itself for all products but VNP02DNB).
    pub fn open(kind: ProductKind, path: &Path, geolocation_path: &Path) -> Result<Self> {
        let tag = kind
            .nominal_tag()
            .ok_or_else(|| SidecarError::UnsupportedProduct(format!("{} is not a VIIRS swath", kind)))?;
        debug!("Reading {} geolocation from {:?}", kind, geolocation_path);
        let file = netcdf::open(geolocation_path)?;
        let group = file
            .group(VIIRS_GEO_GROUP)?
            .ok_or_else(|| missing(VIIRS_GEO_GROUP, geolocation_path))?;
        let lat_var = group
            .variable("latitude")
            .ok_or_else(|| missing("latitude", geolocation_path))?;
        let lon_var = group
            .variable("longitude")
            .ok_or_else(|| missing("longitude", geolocation_path))?;

        let geolocation = Geolocation {
            tag: NominalTag::new(tag),
            lats: read_grid(&lat_var)?,
            lons: read_grid(&lon_var)?,
            fill_value: fill_value(&lat_var),
        };

        let ring = match (
            global_f64s(&file, "GRingPointLatitude")?,
            global_f64s(&file, "GRingPointLongitude")?,
        ) {
            (Some(lats), Some(lons)) => Some(BoundaryRing::from_metadata_order(lats, lons)?),
            _ => {
                warn!("{:?} carries no G-ring; the cover will be dissolved", geolocation_path);
                None
            }
        };

        Ok(Self {
            kind,
            path: path.to_path_buf(),
            geolocation,
            ring,
        })
    }
}

impl GeolocationSource for ViirsL2 {
    fn product(&self) -> ProductKind {
        self.kind
    }

    fn granule_path(&self) -> &Path {
        &self.path
    }

    fn geolocations(&self) -> Result<Vec<Geolocation>> {
        Ok(vec![self.geolocation.clone()])
    }

    fn boundary(&self) -> Result<Option<BoundaryRing>> {
        Ok(self.ring.clone())
    }
}

/// SSMIS granule with one geolocation grid per scan group.
#[derive(Debug, Clone)]
pub struct Ssmis {
    path: PathBuf,
    groups: Vec<Geolocation>,
}

impl Ssmis {
    pub fn open(path: &Path) -> Result<Self> {
        let file = netcdf::open(path)?;
        let mut groups = Vec::with_capacity(SSMIS_GROUPS.len());
        for name in SSMIS_GROUPS {
            let group = file.group(name)?.ok_or_else(|| missing(name, path))?;
            let lat_var = group.variable("Latitude").ok_or_else(|| missing("Latitude", path))?;
            let lon_var = group.variable("Longitude").ok_or_else(|| missing("Longitude", path))?;
            groups.push(Geolocation {
                tag: NominalTag::new(name),
                lats: read_grid(&lat_var)?,
                lons: read_grid(&lon_var)?,
                fill_value: fill_value(&lat_var),
            });
        }
        debug!("Read {} SSMIS scan groups from {:?}", groups.len(), path);
        Ok(Self {
            path: path.to_path_buf(),
            groups,
        })
    }
}

impl GeolocationSource for Ssmis {
    fn product(&self) -> ProductKind {
        ProductKind::Ssmis
    }

    fn granule_path(&self) -> &Path {
        &self.path
    }

    fn geolocations(&self) -> Result<Vec<Geolocation>> {
        Ok(self.groups.clone())
    }

    fn layout(&self) -> NamespaceLayout {
        NamespaceLayout::Grouped
    }
}

/// GOES imager granule on the fixed geostationary grid. The single grid is
/// named after the granule's spatial resolution.
#[derive(Debug, Clone)]
pub struct Goes {
    path: PathBuf,
    geolocation: Geolocation,
}

impl Goes {
    pub fn open(path: &Path) -> Result<Self> {
        let file = netcdf::open(path)?;
        let proj_var = file
            .variable(GOES_PROJECTION)
            .ok_or_else(|| missing(GOES_PROJECTION, path))?;
        let height = var_f64(&proj_var, "perspective_point_height")?
            .ok_or_else(|| missing("perspective_point_height", path))?;
        let lon_origin = var_f64(&proj_var, "longitude_of_projection_origin")?
            .ok_or_else(|| missing("longitude_of_projection_origin", path))?;
        let semi_major = var_f64(&proj_var, "semi_major_axis")?.unwrap_or(GRS80_SEMI_MAJOR);
        let semi_minor = var_f64(&proj_var, "semi_minor_axis")?.unwrap_or(GRS80_SEMI_MINOR);
        if let Some(sweep) = var_text(&proj_var, "sweep_angle_axis")? {
            if sweep.trim() != "x" {
                return Err(SidecarError::UnsupportedProduct(format!(
                    "{:?}: sweep angle axis {:?}, only \"x\" is handled",
                    path, sweep
                )));
            }
        }
        let projection = GeosProjection::new(height, semi_major, semi_minor, lon_origin)?;

        let x = read_unpacked(&file.variable("x").ok_or_else(|| missing("x", path))?)?;
        let y = read_unpacked(&file.variable("y").ok_or_else(|| missing("y", path))?)?;
        let (lats, lons) = projection.lat_lon_grids(&x, &y, GOES_FILL_VALUE)?;

        let resolution = match file.attribute("spatial_resolution") {
            Some(attr) => match attr.value()? {
                AttributeValue::Str(text) => text,
                _ => return Err(missing("textual spatial_resolution", path)),
            },
            None => return Err(missing("spatial_resolution", path)),
        };
        let tag = resolution.trim().replace(' ', "_");
        debug!(
            "GOES grid {}x{} ({}) seen from {}°",
            lats.rows,
            lats.cols,
            tag,
            projection.lon_origin()
        );

        Ok(Self {
            path: path.to_path_buf(),
            geolocation: Geolocation {
                tag: NominalTag::new(tag),
                lats,
                lons,
                fill_value: Some(GOES_FILL_VALUE),
            },
        })
    }
}

impl GeolocationSource for Goes {
    fn product(&self) -> ProductKind {
        ProductKind::Goes
    }

    fn granule_path(&self) -> &Path {
        &self.path
    }

    fn geolocations(&self) -> Result<Vec<Geolocation>> {
        Ok(vec![self.geolocation.clone()])
    }

    fn layout(&self) -> NamespaceLayout {
        NamespaceLayout::Grouped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_viirs(path: &Path, with_ring: bool) {
        let mut file = netcdf::create(path).unwrap();
        if with_ring {
            file.add_attribute("GRingPointLatitude", vec![10.0f32, 10.0, 12.0, 12.0])
                .unwrap();
            file.add_attribute("GRingPointLongitude", vec![20.0f32, 22.0, 22.0, 20.0])
                .unwrap();
        }
        let mut group = file.add_group(VIIRS_GEO_GROUP).unwrap();
        group.add_dimension("number_of_lines", 3).unwrap();
        group.add_dimension("number_of_pixels", 4).unwrap();
        let dims = ["number_of_lines", "number_of_pixels"];
        let lats: Vec<f32> = (0..12).map(|k| 10.0 + (k / 4) as f32 * 0.5).collect();
        let lons: Vec<f32> = (0..12).map(|k| 20.0 + (k % 4) as f32 * 0.5).collect();
        let mut lat = group.add_variable::<f32>("latitude", &dims).unwrap();
        lat.put_attribute("_FillValue", -999.9f32).unwrap();
        lat.put_values(&lats, ..).unwrap();
        let mut lon = group.add_variable::<f32>("longitude", &dims).unwrap();
        lon.put_values(&lons, ..).unwrap();
    }

    #[test]
    fn test_open_viirs_with_ring() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("VNP03DNB.A2020001.0000.001.2020001123456.nc");
        write_viirs(&path, true);

        let swath = ViirsL2::open(ProductKind::Vnp03Dnb, &path, &path).unwrap();
        let geo = swath.geolocations().unwrap();
        assert_eq!(geo[0].lats.shape(), (3, 4));
        assert_eq!(geo[0].tag.as_str(), "750m");
        assert!(geo[0].fill_value.is_some());
        let ring = swath.boundary().unwrap().unwrap();
        assert_eq!(ring.lats(), &[12.0, 12.0, 10.0, 10.0]);
    }

    #[test]
    fn test_open_viirs_without_ring() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("CLDMSK_L2_VIIRS_SNPP.A2020001.0000.001.nc");
        write_viirs(&path, false);
        let swath = ViirsL2::open(ProductKind::CldmskL2Viirs, &path, &path).unwrap();
        assert!(swath.boundary().unwrap().is_none());
    }

    fn write_goes(path: &Path, sweep: &str) {
        let mut file = netcdf::create(path).unwrap();
        file.add_attribute("spatial_resolution", "2km at nadir").unwrap();
        file.add_dimension("x", 5).unwrap();
        file.add_dimension("y", 5).unwrap();
        let mut proj = file.add_variable::<i32>(GOES_PROJECTION, &[]).unwrap();
        proj.put_attribute("perspective_point_height", 35786023.0f64).unwrap();
        proj.put_attribute("semi_major_axis", 6378137.0f64).unwrap();
        proj.put_attribute("semi_minor_axis", 6356752.31414f64).unwrap();
        proj.put_attribute("longitude_of_projection_origin", -75.0f64).unwrap();
        proj.put_attribute("sweep_angle_axis", sweep).unwrap();
        for (name, raw) in [("x", [-2i16, -1, 0, 1, 2]), ("y", [2i16, 1, 0, -1, -2])] {
            let mut var = file.add_variable::<i16>(name, &[name]).unwrap();
            var.put_attribute("scale_factor", 0.075f32).unwrap();
            var.put_attribute("add_offset", 0.0f32).unwrap();
            var.put_values(&raw, ..).unwrap();
        }
    }

    #[test]
    fn test_open_goes_full_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("OR_ABI-L1b-RadF-M6C01_G16_s20200010000.nc");
        write_goes(&path, "x");

        let goes = Goes::open(&path).unwrap();
        assert_eq!(goes.layout(), NamespaceLayout::Grouped);
        let geo = goes.geolocations().unwrap();
        assert_eq!(geo.len(), 1);
        assert_eq!(geo[0].tag.as_str(), "2km_at_nadir");
        assert_eq!(geo[0].lats.shape(), (5, 5));
        assert_eq!(geo[0].fill_value, Some(GOES_FILL_VALUE));

        // corners look past the limb
        for (i, j) in [(0, 0), (0, 4), (4, 0), (4, 4)] {
            assert_eq!(geo[0].lats.get(i, j), Some(&GOES_FILL_VALUE));
            assert_eq!(geo[0].lons.get(i, j), Some(&GOES_FILL_VALUE));
        }
        let (lat, lon) = (*geo[0].lats.get(2, 2).unwrap(), *geo[0].lons.get(2, 2).unwrap());
        assert!(lat.abs() < 1e-6 && (lon + 75.0).abs() < 1e-6, "nadir at {} {}", lat, lon);
    }

    #[test]
    fn test_goes_other_sweep_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("himawari.nc");
        write_goes(&path, "y");
        assert!(matches!(Goes::open(&path), Err(SidecarError::UnsupportedProduct(_))));
    }

    #[test]
    fn test_missing_group_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.nc");
        netcdf::create(&path).unwrap();
        assert!(matches!(
            ViirsL2::open(ProductKind::Vnp03Dnb, &path, &path),
            Err(SidecarError::Validation(_))
        ));
    }
}
