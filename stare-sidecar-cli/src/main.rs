use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use stare_sidecar::product::GeolocationSource;
use stare_sidecar::sidecar::missing_sidecars;
use stare_sidecar::{
    open_granule, process_batch, BatchMode, Catalogue, NetCdfSidecar, ProductKind, QuadTreeIndex, SidecarConfig,
    SidecarError,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Granule files or folders of granules
    #[arg(value_name = "GRANULE", required = true)]
    inputs: Vec<PathBuf>,

    /// Product of the granules (VNP03DNB, VNP02DNB, CLDMSK_L2_VIIRS, SSMIS, GOES, MODIS_TILE, MERRA2).
    /// Guessed from each file name when omitted. MOD05 and MOD09 swaths are HDF4 and cannot be
    /// read by this tool; build them through the library's HdfEosSwath::from_parts
    #[arg(short, long)]
    product: Option<ProductKind>,

    /// Sidecar folder (default: next to each granule)
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Worker threads (default: number of CPU cores)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Cover resolution level (default: derived from the index grid)
    #[arg(long)]
    cover_res: Option<u8>,

    /// Sequential partitions for single-worker dissolves
    #[arg(long, default_value_t = 1)]
    chunks: usize,

    /// Only take folder entries whose name contains this text
    #[arg(long)]
    pattern: Option<String>,

    /// Catalogue of granules that already have a sidecar
    #[arg(long, value_name = "FILE")]
    catalogue: Option<PathBuf>,

    /// Replace existing sidecars
    #[arg(long)]
    overwrite: bool,

    /// Run granules concurrently instead of parallelising inside each one
    #[arg(long)]
    parallel_files: bool,

    /// List granules without a sidecar and exit
    #[arg(long)]
    list_missing: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let start_time = std::time::Instant::now();

    if args.list_missing {
        return list_missing(&args);
    }

    let granules = collect_granules(&args)?;
    info!("Found {} granules", granules.len());
    if granules.is_empty() {
        anyhow::bail!("No granules to process");
    }

    let workers = args.workers.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    });
    let config = SidecarConfig {
        workers,
        dissolve_chunks: args.chunks,
        cover_resolution: args.cover_res,
        out_dir: args.output.clone(),
        overwrite: args.overwrite,
    };
    if let Some(dir) = &config.out_dir {
        fs::create_dir_all(dir)?;
    }
    let catalogue = args
        .catalogue
        .as_deref()
        .map(Catalogue::open)
        .transpose()
        .context("Failed to open catalogue")?;
    let mode = if args.parallel_files {
        BatchMode::AcrossFiles
    } else {
        BatchMode::WithinFile
    };

    let product = args.product;
    let open = |path: &Path| -> stare_sidecar::Result<Box<dyn GeolocationSource>> {
        let kind = match product {
            Some(kind) => kind,
            None => ProductKind::guess(path).ok_or_else(|| {
                SidecarError::UnsupportedProduct(format!("cannot tell the product of {:?}", path))
            })?,
        };
        open_granule(kind, path)
    };

    let oracle = QuadTreeIndex::new();
    let writer = NetCdfSidecar::new();
    let report = process_batch(&oracle, &writer, &granules, open, &config, catalogue.as_ref(), mode)?;

    info!(
        "Written {} sidecars, skipped {} granules",
        report.written.len(),
        report.skipped.len()
    );
    let elapsed = start_time.elapsed();
    info!("Total processing time: {:?}", elapsed);

    if !report.is_success() {
        error!("Failed to process {} granules:", report.failed.len());
        for (path, err) in &report.failed {
            error!("  {}: {}", path.display(), err);
        }
        anyhow::bail!("{} granules failed to process", report.failed.len());
    }

    Ok(())
}

fn collect_granules(args: &Args) -> Result<Vec<PathBuf>> {
    let mut granules = Vec::new();
    for input in &args.inputs {
        if input.is_file() {
            granules.push(input.clone());
        } else if input.is_dir() {
            for entry in fs::read_dir(input).with_context(|| format!("Failed to read {:?}", input))? {
                let path = entry?.path();
                if path.is_file() && wanted(&path, args.pattern.as_deref()) {
                    granules.push(path);
                }
            }
        } else {
            error!("Invalid input path: {:?}", input);
            anyhow::bail!("Input path must be a file or directory");
        }
    }
    granules.sort();
    granules.dedup();
    Ok(granules)
}

/// Folder entries worth processing: not a sidecar, and matching the pattern.
fn wanted(path: &Path, pattern: Option<&str>) -> bool {
    let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    !stem.ends_with("_stare") && pattern.is_none_or(|p| name.contains(p))
}

fn list_missing(args: &Args) -> Result<()> {
    let pattern = args.pattern.as_deref().unwrap_or("");
    for input in &args.inputs {
        if !input.is_dir() {
            anyhow::bail!("--list-missing expects granule folders, got {:?}", input);
        }
        let sidecar_dir = args.output.as_deref().unwrap_or(input.as_path());
        for path in missing_sidecars(input, sidecar_dir, pattern)? {
            println!("{}", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_help_flags_hdf4_products() {
        let help = Args::command().render_long_help().to_string();
        assert!(help.contains("GOES"));
        assert!(help.contains("MOD09"));
        assert!(help.contains("HDF4"));
    }

    #[test]
    fn test_product_is_parsed() {
        let args = Args::try_parse_from(["stare-sidecar", "--product", "goes", "granules"]).unwrap();
        assert_eq!(args.product, Some(ProductKind::Goes));
        assert!(Args::try_parse_from(["stare-sidecar", "--product", "nope", "granules"]).is_err());
    }

    #[test]
    fn test_sidecars_are_not_granules() {
        assert!(!wanted(Path::new("/d/MERRA2_400.x_stare.nc4"), None));
        assert!(wanted(Path::new("/d/MERRA2_400.x.nc4"), Some("MERRA2")));
        assert!(!wanted(Path::new("/d/other.nc4"), Some("MERRA2")));
    }
}
