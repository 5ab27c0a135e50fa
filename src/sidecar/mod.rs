//! Sidecar files: the in-memory model, naming, and write-then-publish.
//!
//! A sidecar sits next to its granule and carries, per nominal resolution
//! tag, the pixel coordinates, the index grid and the cover. Writers never
//! touch the final path: the sidecar is written to a temporary file in the
//! destination folder and renamed into place once complete.

#[cfg(feature = "netcdf")]
pub mod netcdf;

#[cfg(feature = "netcdf")]
pub use self::netcdf::NetCdfSidecar;

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::Builder;
use tracing::{debug, info};

use crate::error::{Result, SidecarError};
use crate::model::{Cover, Grid, IndexGrid, NominalTag};
use crate::product::NamespaceLayout;

const SIDECAR_SUFFIX: &str = "_stare";

/// Dimension of the combined cover of a grouped sidecar.
pub const COMBINED_COVER_DIM: &str = "l";
/// Variable holding the combined cover of a grouped sidecar.
pub const COMBINED_COVER_VAR: &str = "STARE_cover";

#[derive(Debug, Clone, PartialEq)]
pub struct SidecarGroup {
    pub tag: NominalTag,
    pub lats: Grid<f64>,
    pub lons: Grid<f64>,
    pub sids: IndexGrid,
    pub cover: Cover,
}

impl SidecarGroup {
    pub fn row_dim(&self) -> String {
        format!("i_{}", self.tag)
    }

    pub fn col_dim(&self) -> String {
        format!("j_{}", self.tag)
    }

    pub fn cover_dim(&self) -> String {
        format!("l_{}", self.tag)
    }

    pub fn lat_var(&self) -> String {
        format!("Latitude_{}", self.tag)
    }

    pub fn lon_var(&self) -> String {
        format!("Longitude_{}", self.tag)
    }

    pub fn index_var(&self) -> String {
        format!("STARE_index_{}", self.tag)
    }

    pub fn cover_var(&self) -> String {
        format!("STARE_cover_{}", self.tag)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sidecar {
    pub granule: PathBuf,
    pub layout: NamespaceLayout,
    pub groups: Vec<SidecarGroup>,
    /// Union cover of all groups, present for grouped sidecars.
    pub combined_cover: Option<Cover>,
}

impl Sidecar {
    pub fn group(&self, tag: &str) -> Option<&SidecarGroup> {
        self.groups.iter().find(|g| g.tag.as_str() == tag)
    }
}

pub trait SidecarWriter: Sync {
    /// Writes `sidecar` to `path`, replacing whatever is there.
    fn write(&self, sidecar: &Sidecar, path: &Path) -> Result<()>;
}

pub trait SidecarReader {
    fn read(&self, path: &Path) -> Result<Sidecar>;
}

/// Sidecar path for `granule`: `<stem>_stare.<ext>` in `out_dir`, or next to
/// the granule when no folder is given.
pub fn sidecar_path(granule: &Path, out_dir: Option<&Path>) -> Result<PathBuf> {
    let stem = granule
        .file_stem()
        .ok_or_else(|| SidecarError::validation(format!("{:?} has no file name", granule)))?;
    let mut name = OsString::from(stem);
    name.push(SIDECAR_SUFFIX);
    if let Some(ext) = granule.extension() {
        name.push(".");
        name.push(ext);
    }
    let dir = match out_dir {
        Some(dir) => dir.to_path_buf(),
        None => granule.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    Ok(dir.join(name))
}

/// Writes `sidecar` to a temporary file beside `dest` and renames it into
/// place. Returns `None` when `dest` exists and `overwrite` is off.
pub fn publish<W>(writer: &W, sidecar: &Sidecar, dest: &Path, overwrite: bool) -> Result<Option<PathBuf>>
where
    W: SidecarWriter + ?Sized,
{
    if dest.exists() && !overwrite {
        info!("Sidecar {:?} already exists, skipping", dest);
        return Ok(None);
    }
    let dir = match dest.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let suffix = dest
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let tmp = Builder::new().prefix(".stare-").suffix(&suffix).tempfile_in(&dir)?;
    debug!("Writing sidecar to staging file {:?}", tmp.path());

    // a failed write drops `tmp`, which removes the staging file
    writer.write(sidecar, tmp.path())?;

    if overwrite {
        tmp.persist(dest)?;
    } else {
        tmp.persist_noclobber(dest)?;
    }
    info!("Published sidecar {:?}", dest);
    Ok(Some(dest.to_path_buf()))
}

/// Granules in `granule_dir` whose names contain `pattern` and whose sidecar
/// is missing from `sidecar_dir`.
pub fn missing_sidecars(granule_dir: &Path, sidecar_dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let mut missing = Vec::new();
    for entry in fs::read_dir(granule_dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        if !name.contains(pattern) || stem.ends_with(SIDECAR_SUFFIX) {
            continue;
        }
        if !sidecar_path(&path, Some(sidecar_dir))?.exists() {
            missing.push(path);
        }
    }
    missing.sort();
    Ok(missing)
}
