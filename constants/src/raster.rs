/// Sentinel written by the rasteriser where a cell received no points.
pub const DEFAULT_NODATA: f64 = -9999.0;

/// Output cell size in spatial reference units.
pub const DEFAULT_RESOLUTION: f64 = 1.0;

/// Block size hint applied to the merged terrain model.
pub const MOSAIC_BLOCK_SIZE: u32 = 256;

/// Relative tolerance when comparing tile resolutions.
pub const RESOLUTION_TOLERANCE: f64 = 1e-9;

/// File suffixes of the merged products.
pub const TERRAIN_SUFFIX: &str = "dtm";
pub const SURFACE_SUFFIX: &str = "dsm";
