/// Shared defaults for the lidar tiling workspace.
pub mod class;
pub mod pipeline;
pub mod raster;
pub mod tiling;
