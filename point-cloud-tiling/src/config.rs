/// Configuration loading
use crate::error::{Result, TilingError};
use crate::pipeline::{PipelineParams, PipelineProfile};
use crate::router::BoundaryPolicy;
use constants::pipeline::DEFAULT_PDAL_BINARY;
use constants::raster::MOSAIC_BLOCK_SIZE;
use constants::tiling::{DEFAULT_CHUNK_POINTS, DEFAULT_SQUARE_SPLITS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TilingConfig {
    pub tiling: PartitionConfig,
    pub pipeline: EngineConfig,
    pub merge: MergeConfig,
    pub execution: ExecutionConfig,
}

/// Partitioning and routing settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    /// Grid divisions per axis (default: 2, giving 4 partitions)
    pub square_splits: usize,

    /// Points per routing chunk (default: 1 000 000)
    pub chunk_points: usize,

    /// Edge membership rule (default: inclusive)
    pub boundary_policy: BoundaryPolicy,

    /// Write LAZ rather than LAS partition payloads (default: true)
    pub compress: bool,

    /// Fail when points fall outside every partition (default: false)
    pub strict_coverage: bool,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            square_splits: DEFAULT_SQUARE_SPLITS,
            chunk_points: DEFAULT_CHUNK_POINTS,
            boundary_policy: BoundaryPolicy::default(),
            compress: true,
            strict_coverage: false,
        }
    }
}

/// External engine settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub profile: PipelineProfile,

    /// Executable receiving pipeline documents (default: "pdal")
    pub pdal_binary: String,

    #[serde(flatten)]
    pub params: PipelineParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            profile: PipelineProfile::default(),
            pdal_binary: DEFAULT_PDAL_BINARY.to_string(),
            params: PipelineParams::default(),
        }
    }
}

/// Mosaic settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Block size hint for terrain mosaics (default: 256)
    pub block_size: u32,

    /// Stop waiting for partition results this many seconds after
    /// processing starts; unfinished partitions block the merge
    pub timeout_secs: Option<f64>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            block_size: MOSAIC_BLOCK_SIZE,
            timeout_secs: None,
        }
    }
}

impl MergeConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}

/// Concurrency settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Partitions processed concurrently (default: available parallelism)
    pub max_parallel: Option<usize>,
}

impl TilingConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: TilingConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tiling.square_splits == 0 {
            return Err(TilingError::Config(
                "tiling.square_splits must be at least 1".to_string(),
            ));
        }
        if self.tiling.chunk_points == 0 {
            return Err(TilingError::Config(
                "tiling.chunk_points must be at least 1".to_string(),
            ));
        }
        let resolution = self.pipeline.params.resolution;
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(TilingError::Config(format!(
                "pipeline.resolution must be positive, got {resolution}"
            )));
        }
        if self.merge.block_size == 0 || self.merge.block_size % 16 != 0 {
            return Err(TilingError::Config(format!(
                "merge.block_size must be a positive multiple of 16, got {}",
                self.merge.block_size
            )));
        }
        if let Some(secs) = self.merge.timeout_secs {
            if !(secs.is_finite() && secs >= 0.0) {
                return Err(TilingError::Config(format!(
                    "merge.timeout_secs must be a non-negative number, got {secs}"
                )));
            }
        }
        if self.execution.max_parallel == Some(0) {
            return Err(TilingError::Config(
                "execution.max_parallel must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
