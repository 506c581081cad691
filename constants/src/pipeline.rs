/// Spatial reference assigned to sources and requested for outputs.
pub const DEFAULT_SPATIAL_REFERENCE: &str = "EPSG:25830";

/// Radius outlier removal.
pub const OUTLIER_RADIUS: f64 = 1.0;
pub const OUTLIER_MIN_K: u32 = 4;

/// Simple morphological filter (SMRF) ground classification.
pub const SMRF_SLOPE: f64 = 0.2;
pub const SMRF_WINDOW: f64 = 16.0;
pub const SMRF_THRESHOLD: f64 = 0.45;
pub const SMRF_SCALAR: f64 = 1.2;

/// Executable used to run pipeline descriptors.
pub const DEFAULT_PDAL_BINARY: &str = "pdal";
