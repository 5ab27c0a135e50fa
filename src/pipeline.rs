//! End-to-end sidecar creation for single granules and batches.

use std::path::{Path, PathBuf};
use std::time::Instant;

use rayon::prelude::*;
use tracing::{error, info, warn};

use crate::catalogue::Catalogue;
use crate::convert::{convert, ConvertOptions};
use crate::cover::{cover_from_ring_for_grid, dissolve, DissolveOptions, ResolutionPolicy};
use crate::error::{Result, SidecarError};
use crate::model::{Cover, Sid};
use crate::oracle::SpatialIndex;
use crate::partition::with_worker_pool;
use crate::product::{GeolocationSource, NamespaceLayout};
use crate::sidecar::{publish, sidecar_path, Sidecar, SidecarGroup, SidecarWriter};

#[derive(Debug, Clone)]
pub struct SidecarConfig {
    /// Workers for conversion and dissolve, or files in flight for
    /// [`BatchMode::AcrossFiles`].
    pub workers: usize,
    /// Sequential partitions for single-worker dissolves.
    pub dissolve_chunks: usize,
    /// Explicit cover level; derived from the index grid when unset.
    pub cover_resolution: Option<u8>,
    /// Sidecar folder; next to the granule when unset.
    pub out_dir: Option<PathBuf>,
    pub overwrite: bool,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            dissolve_chunks: 1,
            cover_resolution: None,
            out_dir: None,
            overwrite: false,
        }
    }
}

/// Computes the sidecar of one granule without writing anything.
pub fn build_sidecar<O>(oracle: &O, source: &dyn GeolocationSource, config: &SidecarConfig) -> Result<Sidecar>
where
    O: SpatialIndex + ?Sized,
{
    let geolocations = source.geolocations()?;
    if geolocations.is_empty() {
        return Err(SidecarError::validation(format!(
            "{:?} has no geolocation grids",
            source.granule_path()
        )));
    }
    let ring = source.boundary()?;

    let mut groups = Vec::with_capacity(geolocations.len());
    for geo in geolocations {
        let options = ConvertOptions {
            resolution: source.encode_resolution(),
            workers: config.workers,
            fill_value: geo.fill_value,
            ..ConvertOptions::default()
        };
        let sids = convert(oracle, &geo.lats, &geo.lons, &options)?;

        let cover = match &ring {
            Some(ring) => cover_from_ring_for_grid(oracle, ring, &sids, config.cover_resolution)?,
            None => {
                let level = ResolutionPolicy::DISSOLVE.resolve(oracle, &sids, config.cover_resolution)?;
                let valid: Vec<Sid> = sids.valid_sids().collect();
                let options = DissolveOptions {
                    resolution: level,
                    workers: config.workers,
                    chunks: config.dissolve_chunks,
                };
                dissolve(oracle, &valid, &options)?
            }
        };
        info!("{}: {} pixels, cover of {} cells", geo.tag, sids.len(), cover.len());

        groups.push(SidecarGroup {
            tag: geo.tag,
            lats: geo.lats,
            lons: geo.lons,
            sids,
            cover,
        });
    }

    let layout = source.layout();
    let combined_cover = match layout {
        NamespaceLayout::Grouped => Some(combine_covers(oracle, &groups, config)?),
        NamespaceLayout::Flat => None,
    };

    Ok(Sidecar {
        granule: source.granule_path().to_path_buf(),
        layout,
        groups,
        combined_cover,
    })
}

/// Union of the group covers, dissolved at the finest level among them.
fn combine_covers<O>(oracle: &O, groups: &[SidecarGroup], config: &SidecarConfig) -> Result<Cover>
where
    O: SpatialIndex + ?Sized,
{
    let all: Vec<Sid> = groups
        .iter()
        .flat_map(|g| g.cover.as_slice().iter().copied())
        .collect();
    let Some(level) = oracle.max_resolution(&all)? else {
        return Ok(Cover::default());
    };
    let options = DissolveOptions {
        resolution: level,
        workers: config.workers,
        chunks: config.dissolve_chunks,
    };
    dissolve(oracle, &all, &options)
}

/// Builds and publishes the sidecar of one granule. Returns the sidecar
/// path, or `None` when one already exists and overwriting is off.
pub fn create_sidecar<O, W>(
    oracle: &O,
    writer: &W,
    source: &dyn GeolocationSource,
    config: &SidecarConfig,
) -> Result<Option<PathBuf>>
where
    O: SpatialIndex + ?Sized,
    W: SidecarWriter + ?Sized,
{
    let dest = sidecar_path(source.granule_path(), config.out_dir.as_deref())?;
    if dest.exists() && !config.overwrite {
        info!("Sidecar {:?} already exists, skipping", dest);
        return Ok(None);
    }
    let start = Instant::now();
    let sidecar = build_sidecar(oracle, source, config)?;
    let published = publish(writer, &sidecar, &dest, config.overwrite)?;
    info!("{:?} done in {:?}", source.granule_path(), start.elapsed());
    Ok(published)
}

/// Where the parallelism of a batch goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Granules run concurrently, each converted with a single worker.
    AcrossFiles,
    /// Granules run one after another, each using all workers.
    WithinFile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Written(PathBuf),
    Skipped,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub written: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, SidecarError)>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, granule: PathBuf, result: Result<Outcome>) {
        match result {
            Ok(Outcome::Written(_)) => self.written.push(granule),
            Ok(Outcome::Skipped) => self.skipped.push(granule),
            Err(e) => {
                error!("{}: {}", granule.display(), e);
                self.failed.push((granule, e));
            }
        }
    }
}

fn process_one<O, W, F>(
    oracle: &O,
    writer: &W,
    granule: &Path,
    open: &F,
    config: &SidecarConfig,
    catalogue: Option<&Catalogue>,
) -> Result<Outcome>
where
    O: SpatialIndex + ?Sized,
    W: SidecarWriter + ?Sized,
    F: Fn(&Path) -> Result<Box<dyn GeolocationSource>> + Sync,
{
    if let Some(catalogue) = catalogue {
        if catalogue.contains(granule)? {
            info!("{:?} is already catalogued", granule);
            return Ok(Outcome::Skipped);
        }
    }
    let source = open(granule)?;
    match create_sidecar(oracle, writer, source.as_ref(), config)? {
        Some(dest) => {
            if let Some(catalogue) = catalogue {
                catalogue.append(granule, &dest)?;
            }
            Ok(Outcome::Written(dest))
        }
        None => Ok(Outcome::Skipped),
    }
}

/// Creates sidecars for every granule in `granules`, opening each with
/// `open`. Failures are collected per granule; the batch keeps going.
pub fn process_batch<O, W, F>(
    oracle: &O,
    writer: &W,
    granules: &[PathBuf],
    open: F,
    config: &SidecarConfig,
    catalogue: Option<&Catalogue>,
    mode: BatchMode,
) -> Result<BatchReport>
where
    O: SpatialIndex + ?Sized,
    W: SidecarWriter + ?Sized,
    F: Fn(&Path) -> Result<Box<dyn GeolocationSource>> + Sync,
{
    info!("Processing {} granules ({:?}, {} workers)", granules.len(), mode, config.workers);
    let mut report = BatchReport::default();

    match mode {
        BatchMode::AcrossFiles => {
            let per_file = SidecarConfig {
                workers: 1,
                ..config.clone()
            };
            let results: Vec<Result<Outcome>> = with_worker_pool(config.workers, || {
                granules
                    .par_iter()
                    .map(|granule| process_one(oracle, writer, granule, &open, &per_file, catalogue))
                    .collect()
            })?;
            for (granule, result) in granules.iter().zip(results) {
                report.record(granule.clone(), result);
            }
        }
        BatchMode::WithinFile => {
            for granule in granules {
                let result = process_one(oracle, writer, granule, &open, config, catalogue);
                report.record(granule.clone(), result);
            }
        }
    }

    if !report.failed.is_empty() {
        warn!("{} of {} granules failed", report.failed.len(), granules.len());
    }
    info!(
        "Batch finished: {} written, {} skipped, {} failed",
        report.written.len(),
        report.skipped.len(),
        report.failed.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BoundaryRing, Grid, NominalTag};
    use crate::oracle::{QuadTreeIndex, ResolutionOps};
    use crate::product::{Geolocation, Merra2Grid, ModisTile, ProductKind};

    /// Two scan groups side by side, no ring.
    struct TwoGroups;

    impl GeolocationSource for TwoGroups {
        fn product(&self) -> ProductKind {
            ProductKind::Ssmis
        }

        fn granule_path(&self) -> &Path {
            Path::new("SSMIS.test.HDF5")
        }

        fn geolocations(&self) -> Result<Vec<Geolocation>> {
            let group = |tag: &str, lon0: f64| Geolocation {
                tag: NominalTag::new(tag),
                lats: Grid::from_fn(6, 6, |i, _| 20.0 + i as f64 * 0.1),
                lons: Grid::from_fn(6, 6, |_, j| lon0 + j as f64 * 0.1),
                fill_value: None,
            };
            Ok(vec![group("S1", 30.0), group("S2", 31.0)])
        }

        fn layout(&self) -> NamespaceLayout {
            NamespaceLayout::Grouped
        }
    }

    /// Small swath with a footprint ring.
    struct RingSwath;

    impl GeolocationSource for RingSwath {
        fn product(&self) -> ProductKind {
            ProductKind::Mod09
        }

        fn granule_path(&self) -> &Path {
            Path::new("MOD09.test.hdf")
        }

        fn geolocations(&self) -> Result<Vec<Geolocation>> {
            Ok(vec![Geolocation {
                tag: NominalTag::new("1km"),
                lats: Grid::from_fn(8, 8, |i, _| 45.0 + i as f64 * 0.05),
                lons: Grid::from_fn(8, 8, |_, j| 7.0 + j as f64 * 0.05),
                fill_value: None,
            }])
        }

        fn boundary(&self) -> Result<Option<BoundaryRing>> {
            Ok(Some(BoundaryRing::new(
                vec![45.0, 45.0, 45.35, 45.35],
                vec![7.0, 7.35, 7.35, 7.0],
            )?))
        }
    }

    #[test]
    fn test_ring_product_uses_min_level() {
        let oracle = QuadTreeIndex::new();
        let sidecar = build_sidecar(&oracle, &RingSwath, &SidecarConfig::default()).unwrap();
        let group = sidecar.group("1km").unwrap();
        let min = oracle.min_resolution(&group.sids.values).unwrap().unwrap();
        assert!(!group.cover.is_empty());
        for &sid in group.cover.as_slice() {
            assert_eq!(oracle.level(sid).unwrap(), min);
        }
        assert!(sidecar.combined_cover.is_none());
    }

    #[test]
    fn test_dissolved_cover_is_two_levels_coarser() {
        let oracle = QuadTreeIndex::new();
        let tile = ModisTile::new(18, 4).unwrap().with_size(16);
        let sidecar = build_sidecar(&oracle, &tile, &SidecarConfig::default()).unwrap();
        let group = &sidecar.groups[0];
        let min = oracle.min_resolution(&group.sids.values).unwrap().unwrap();
        for &sid in group.cover.as_slice() {
            assert!(oracle.level(sid).unwrap() <= min.saturating_sub(2));
        }
    }

    #[test]
    fn test_fixed_encode_level() {
        let oracle = QuadTreeIndex::new();
        let grid = Merra2Grid::new(Path::new("MERRA2_400.test.nc4")).truncated(5, 8);
        let sidecar = build_sidecar(&oracle, &grid, &SidecarConfig::default()).unwrap();
        for &sid in &sidecar.groups[0].sids.values {
            assert_eq!(oracle.level(sid).unwrap(), 10);
        }
    }

    #[test]
    fn test_grouped_sidecar_has_combined_cover() {
        let oracle = QuadTreeIndex::new();
        let sidecar = build_sidecar(&oracle, &TwoGroups, &SidecarConfig::default()).unwrap();
        assert_eq!(sidecar.groups.len(), 2);
        let combined = sidecar.combined_cover.as_ref().unwrap();
        // every group cell lies inside some combined cell
        for group in &sidecar.groups {
            for &sid in group.cover.as_slice() {
                let level = oracle.level(sid).unwrap();
                let inside = (0..=level).any(|k| combined.contains(oracle.coerce(&[sid], k).unwrap()[0]));
                assert!(inside);
            }
        }
    }

    #[test]
    fn test_worker_count_does_not_change_sidecar() {
        let oracle = QuadTreeIndex::new();
        let tile = ModisTile::new(20, 6).unwrap().with_size(24);
        let single = build_sidecar(&oracle, &tile, &SidecarConfig::default()).unwrap();
        let config = SidecarConfig {
            workers: 4,
            dissolve_chunks: 3,
            ..SidecarConfig::default()
        };
        assert_eq!(build_sidecar(&oracle, &tile, &config).unwrap(), single);
    }
}
