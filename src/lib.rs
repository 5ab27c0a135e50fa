pub mod catalogue;
pub mod convert;
pub mod cover;
pub mod error;
pub mod model;
pub mod oracle;
pub mod parser;
pub mod partition;
pub mod pipeline;
pub mod product;
pub mod sidecar;

pub use catalogue::Catalogue;
pub use convert::{convert, ConvertOptions};
pub use cover::{cover_from_ring, dissolve, DissolveOptions, ResolutionPolicy};
pub use error::{Result, SidecarError};
pub use model::{BoundaryRing, Cover, Grid, IndexGrid, NominalTag, Sid, FILL_SID, MAX_LEVEL};
pub use oracle::{QuadTreeIndex, SpatialIndex};
pub use pipeline::{build_sidecar, create_sidecar, process_batch, BatchMode, BatchReport, SidecarConfig};
pub use product::{open_granule, GeolocationSource, ProductKind};
#[cfg(feature = "netcdf")]
pub use sidecar::NetCdfSidecar;
pub use sidecar::{publish, sidecar_path, Sidecar, SidecarWriter};
