//! NetCDF-4 sidecar container.
//!
//! Flat sidecars keep every variable at the root; grouped sidecars put each
//! tag in its own NetCDF group and the combined cover at the root.
//! Coordinates are stored as `f32`, SIDs as `u64`, all deflated with the
//! shuffle filter on.

use std::path::{Path, PathBuf};

use netcdf::AttributeValue;
use tracing::{debug, info};

use crate::error::{Result, SidecarError};
use crate::model::{Cover, Grid, NominalTag, Sid};
use crate::product::NamespaceLayout;
use crate::sidecar::{Sidecar, SidecarGroup, SidecarReader, SidecarWriter, COMBINED_COVER_DIM, COMBINED_COVER_VAR};

const GRANULE_ATTR: &str = "granule";
const INDEX_PREFIX: &str = "STARE_index_";

#[derive(Debug, Clone)]
pub struct NetCdfSidecar {
    pub deflate_level: i32,
}

impl Default for NetCdfSidecar {
    fn default() -> Self {
        Self { deflate_level: 4 }
    }
}

impl NetCdfSidecar {
    pub fn new() -> Self {
        Self::default()
    }
}

fn to_f32(grid: &Grid<f64>) -> Vec<f32> {
    grid.values.iter().map(|&v| v as f32).collect()
}

fn to_u64(sids: &[Sid]) -> Vec<u64> {
    sids.iter().map(|sid| sid.0).collect()
}

/// `FileMut` and `GroupMut` share their builder methods but no trait, so
/// the group body is spelled once here for both.
macro_rules! write_group {
    ($target:expr, $group:expr, $level:expr) => {{
        let group: &SidecarGroup = $group;
        let (rows, cols) = group.sids.shape();
        let (row_dim, col_dim, cover_dim) = (group.row_dim(), group.col_dim(), group.cover_dim());
        $target.add_dimension(&row_dim, rows)?;
        $target.add_dimension(&col_dim, cols)?;
        $target.add_dimension(&cover_dim, group.cover.len())?;
        let dims = [row_dim.as_str(), col_dim.as_str()];

        {
            let mut lat = $target.add_variable::<f32>(&group.lat_var(), &dims)?;
            lat.set_compression($level, true)?;
            lat.put_attribute("units", "degrees_north")?;
            lat.put_values(&to_f32(&group.lats), ..)?;
        }
        {
            let mut lon = $target.add_variable::<f32>(&group.lon_var(), &dims)?;
            lon.set_compression($level, true)?;
            lon.put_attribute("units", "degrees_east")?;
            lon.put_values(&to_f32(&group.lons), ..)?;
        }
        {
            let mut index = $target.add_variable::<u64>(&group.index_var(), &dims)?;
            index.set_compression($level, true)?;
            index.put_attribute("long_name", format!("STARE index {}", group.tag))?;
            index.put_values(&to_u64(&group.sids.values), ..)?;
        }
        {
            let mut cover = $target.add_variable::<u64>(&group.cover_var(), &[cover_dim.as_str()])?;
            cover.set_compression($level, true)?;
            cover.put_attribute("long_name", format!("STARE cover {}", group.tag))?;
            if !group.cover.is_empty() {
                cover.put_values(&to_u64(group.cover.as_slice()), ..)?;
            }
        }
    }};
}

/// Reads every tagged group stored directly in `$container`.
macro_rules! read_groups {
    ($container:expr) => {{
        let tags: Vec<String> = $container
            .variables()
            .filter_map(|v| v.name().strip_prefix(INDEX_PREFIX).map(str::to_string))
            .collect();
        let mut groups = Vec::with_capacity(tags.len());
        for tag in tags {
            let var = |name: String| {
                $container
                    .variable(&name)
                    .ok_or_else(|| SidecarError::validation(format!("sidecar has no {}", name)))
            };
            groups.push(SidecarGroup {
                lats: read_coordinates(&var(format!("Latitude_{}", tag))?)?,
                lons: read_coordinates(&var(format!("Longitude_{}", tag))?)?,
                sids: read_index(&var(format!("{}{}", INDEX_PREFIX, tag))?)?,
                cover: Cover::new(read_sids(&var(format!("STARE_cover_{}", tag))?)?),
                tag: NominalTag::new(tag),
            });
        }
        groups
    }};
}

fn grid_shape(var: &netcdf::Variable<'_>) -> Result<(usize, usize)> {
    let dims = var.dimensions();
    if dims.len() != 2 {
        return Err(SidecarError::validation(format!("{} is not 2-D", var.name())));
    }
    Ok((dims[0].len(), dims[1].len()))
}

fn is_empty(var: &netcdf::Variable<'_>) -> bool {
    var.dimensions().iter().any(|d| d.len() == 0)
}

fn read_coordinates(var: &netcdf::Variable<'_>) -> Result<Grid<f64>> {
    let (rows, cols) = grid_shape(var)?;
    let values: Vec<f32> = if is_empty(var) { Vec::new() } else { var.get_values::<f32, _>(..)? };
    Grid::new(rows, cols, values.into_iter().map(f64::from).collect())
}

fn read_index(var: &netcdf::Variable<'_>) -> Result<Grid<Sid>> {
    let (rows, cols) = grid_shape(var)?;
    Grid::new(rows, cols, read_sids(var)?)
}

fn read_sids(var: &netcdf::Variable<'_>) -> Result<Vec<Sid>> {
    if is_empty(var) {
        return Ok(Vec::new());
    }
    let values: Vec<u64> = var.get_values::<u64, _>(..)?;
    Ok(values.into_iter().map(Sid).collect())
}

impl SidecarWriter for NetCdfSidecar {
    fn write(&self, sidecar: &Sidecar, path: &Path) -> Result<()> {
        let mut file = netcdf::create(path)?;
        file.add_attribute(GRANULE_ATTR, sidecar.granule.to_string_lossy().as_ref())?;
        let level = self.deflate_level;

        match sidecar.layout {
            NamespaceLayout::Flat => {
                for group in &sidecar.groups {
                    write_group!(file, group, level);
                }
            }
            NamespaceLayout::Grouped => {
                for group in &sidecar.groups {
                    let mut nc_group = file.add_group(group.tag.as_str())?;
                    write_group!(nc_group, group, level);
                }
            }
        }

        if let Some(combined) = &sidecar.combined_cover {
            file.add_dimension(COMBINED_COVER_DIM, combined.len())?;
            let mut var = file.add_variable::<u64>(COMBINED_COVER_VAR, &[COMBINED_COVER_DIM])?;
            var.set_compression(level, true)?;
            if !combined.is_empty() {
                var.put_values(&to_u64(combined.as_slice()), ..)?;
            }
        }
        debug!("Wrote {} groups to {:?}", sidecar.groups.len(), path);
        Ok(())
    }
}

impl SidecarReader for NetCdfSidecar {
    fn read(&self, path: &Path) -> Result<Sidecar> {
        let file = netcdf::open(path)?;
        let granule = match file.attribute(GRANULE_ATTR).map(|attr| attr.value()).transpose()? {
            Some(AttributeValue::Str(s)) => PathBuf::from(s),
            _ => PathBuf::new(),
        };

        let mut groups = read_groups!(file);
        let mut layout = NamespaceLayout::Flat;
        for nc_group in file.groups()? {
            let nested = read_groups!(nc_group);
            if !nested.is_empty() {
                layout = NamespaceLayout::Grouped;
            }
            groups.extend(nested);
        }

        let combined_cover = match file.variable(COMBINED_COVER_VAR) {
            Some(var) => Some(Cover::new(read_sids(&var)?)),
            None => None,
        };
        info!("Read {} groups from sidecar {:?}", groups.len(), path);
        Ok(Sidecar {
            granule,
            layout,
            groups,
            combined_cover,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sidecar::publish;
    use tempfile::TempDir;

    fn group(tag: &str, rows: usize, cols: usize, cover: &[u64]) -> SidecarGroup {
        SidecarGroup {
            tag: NominalTag::new(tag),
            lats: Grid::from_fn(rows, cols, |i, _| 10.0 + i as f64 * 0.5),
            lons: Grid::from_fn(rows, cols, |_, j| -20.0 + j as f64 * 0.25),
            sids: Grid::from_fn(rows, cols, |i, j| Sid(((i * cols + j) as u64) << 20 | 14)),
            cover: Cover::new(cover.iter().copied().map(Sid)),
        }
    }

    #[test]
    fn test_flat_round_trip() {
        let dir = TempDir::new().unwrap();
        let sidecar = Sidecar {
            granule: PathBuf::from("/data/MOD09.A2002299.0710.hdf"),
            layout: NamespaceLayout::Flat,
            groups: vec![group("1km", 3, 4, &[7, 9])],
            combined_cover: None,
        };
        let dest = dir.path().join("MOD09.A2002299.0710_stare.hdf");
        publish(&NetCdfSidecar::new(), &sidecar, &dest, false).unwrap();

        let back = NetCdfSidecar::new().read(&dest).unwrap();
        assert_eq!(back, sidecar);
    }

    #[test]
    fn test_grouped_round_trip() {
        let dir = TempDir::new().unwrap();
        let sidecar = Sidecar {
            granule: PathBuf::from("SSMIS.HDF5"),
            layout: NamespaceLayout::Grouped,
            groups: vec![group("S1", 2, 3, &[1]), group("S2", 2, 2, &[])],
            combined_cover: Some(Cover::new([Sid(1), Sid(3)])),
        };
        let dest = dir.path().join("SSMIS_stare.HDF5");
        NetCdfSidecar::new().write(&sidecar, &dest).unwrap();

        let back = NetCdfSidecar::new().read(&dest).unwrap();
        assert_eq!(back.layout, NamespaceLayout::Grouped);
        assert_eq!(back.combined_cover, sidecar.combined_cover);
        assert_eq!(back.group("S1"), sidecar.group("S1"));
        assert!(back.group("S2").unwrap().cover.is_empty());
    }
}
