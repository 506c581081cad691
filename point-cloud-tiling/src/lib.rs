/// Split / process / merge tiling of large airborne point clouds into
/// terrain and surface elevation mosaics.
pub mod barrier;
pub mod bounds;
pub mod config;
pub mod converter;
pub mod engine;
pub mod error;
pub mod geotiff;
pub mod laz;
pub mod manifest;
pub mod mosaic;
pub mod payload;
pub mod pipeline;
pub mod progress;
pub mod raster;
pub mod router;

pub use bounds::{BoundingBox, split};
pub use config::TilingConfig;
pub use converter::{PointCloudConverter, SourceOutcome};
pub use engine::{PdalEngine, ProcessingEngine};
pub use error::{Result, Stage, TilingError};
pub use mosaic::RasterMosaicMerger;
pub use payload::{Partition, PartitionPayload, SourceId};
pub use pipeline::{PipelineParams, PipelineProfile};
pub use progress::{ProgressReporter, ProgressSink};
pub use raster::{GeoTransform, MosaicRaster, RasterKind, RasterTile};
pub use router::{BoundaryPolicy, StreamingPointRouter};
