/// Error types for the split / process / merge pipeline
use crate::payload::SourceId;
use crate::raster::RasterKind;
use std::fmt;

/// Result type alias
pub type Result<T> = std::result::Result<T, TilingError>;

/// Pipeline stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Partition,
    Route,
    Process,
    Merge,
    Config,
    Io,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Partition => "partition",
            Stage::Route => "route",
            Stage::Process => "process",
            Stage::Merge => "merge",
            Stage::Config => "config",
            Stage::Io => "io",
        };
        f.write_str(name)
    }
}

/// Tiling error types
#[derive(Debug, thiserror::Error)]
pub enum TilingError {
    /// Rejected input parameter, e.g. a zero split factor
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Corrupt or truncated point cloud source. No partitions are emitted.
    #[error("Failed to read point cloud {source_id}: {message}")]
    SourceRead { source_id: SourceId, message: String },

    /// A partition payload could not be written or sealed
    #[error("Failed to write partition {partition_index} of {source_id}: {message}")]
    PayloadWrite {
        source_id: SourceId,
        partition_index: usize,
        message: String,
    },

    /// Points that matched no partition while coverage was required
    #[error("{count} points of {source_id} fell outside every partition")]
    UnroutedPoints { source_id: SourceId, count: u64 },

    /// The external engine failed for one partition
    #[error("Processing failed for partition {partition_index} of {source_id}: {message}")]
    Processing {
        source_id: SourceId,
        partition_index: usize,
        message: String,
    },

    /// Partition did not report before the merge deadline
    #[error("Partition {partition_index} of {source_id} missed the merge deadline")]
    DeadlineElapsed {
        source_id: SourceId,
        partition_index: usize,
    },

    /// Tile rejected by the merge barrier or merger before compositing
    #[error("Rejected tile for partition {partition_index} of {source_id}: {message}")]
    InvalidTile {
        source_id: SourceId,
        partition_index: usize,
        message: String,
    },

    /// Merge requested with no tiles
    #[error("No {kind} tiles to merge for {source_id}")]
    EmptyPartitionSet { source_id: SourceId, kind: RasterKind },

    /// Tiles of one mosaic disagree on pixel size
    #[error(
        "Resolution mismatch merging {kind} for {source_id}: partition {partition_index} has {found:?}, expected {expected:?}"
    )]
    ResolutionMismatch {
        source_id: SourceId,
        kind: RasterKind,
        partition_index: usize,
        expected: (f64, f64),
        found: (f64, f64),
    },

    /// Tiles of one mosaic disagree on coordinate reference
    #[error(
        "CRS mismatch merging {kind} for {source_id}: partition {partition_index} is {found}, expected {expected}"
    )]
    CrsMismatch {
        source_id: SourceId,
        kind: RasterKind,
        partition_index: usize,
        expected: String,
        found: String,
    },

    /// Rotated or skewed geotransforms cannot be composited
    #[error("Unsupported geotransform for partition {partition_index} of {source_id}: {reason}")]
    UnsupportedTransform {
        source_id: SourceId,
        partition_index: usize,
        reason: String,
    },

    /// The merge barrier refused to release an incomplete tile set
    #[error(
        "Merge of {kind} for {source_id} blocked: failed partitions {failed:?}, missing partitions {missing:?}"
    )]
    MergeBlocked {
        source_id: SourceId,
        kind: RasterKind,
        failed: Vec<usize>,
        missing: Vec<usize>,
    },

    /// Raster payload could not be decoded or encoded
    #[error("Raster codec error: {0}")]
    RasterCodec(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialisation error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TilingError {
    /// Stage that produced this error.
    pub fn stage(&self) -> Stage {
        match self {
            TilingError::InvalidArgument(_) => Stage::Partition,
            TilingError::SourceRead { .. }
            | TilingError::PayloadWrite { .. }
            | TilingError::UnroutedPoints { .. } => Stage::Route,
            TilingError::Processing { .. } | TilingError::DeadlineElapsed { .. } => Stage::Process,
            TilingError::InvalidTile { .. }
            | TilingError::EmptyPartitionSet { .. }
            | TilingError::ResolutionMismatch { .. }
            | TilingError::CrsMismatch { .. }
            | TilingError::UnsupportedTransform { .. }
            | TilingError::MergeBlocked { .. } => Stage::Merge,
            TilingError::Config(_) => Stage::Config,
            TilingError::RasterCodec(_) | TilingError::Io(_) | TilingError::Json(_) => Stage::Io,
        }
    }

    /// Source file the error is attributed to, when known.
    pub fn source_id(&self) -> Option<&SourceId> {
        match self {
            TilingError::SourceRead { source_id, .. }
            | TilingError::PayloadWrite { source_id, .. }
            | TilingError::UnroutedPoints { source_id, .. }
            | TilingError::Processing { source_id, .. }
            | TilingError::DeadlineElapsed { source_id, .. }
            | TilingError::InvalidTile { source_id, .. }
            | TilingError::EmptyPartitionSet { source_id, .. }
            | TilingError::ResolutionMismatch { source_id, .. }
            | TilingError::CrsMismatch { source_id, .. }
            | TilingError::UnsupportedTransform { source_id, .. }
            | TilingError::MergeBlocked { source_id, .. } => Some(source_id),
            _ => None,
        }
    }

    /// Partition the error is attributed to. Retrying that partition alone is sufficient.
    pub fn partition_index(&self) -> Option<usize> {
        match self {
            TilingError::PayloadWrite {
                partition_index, ..
            }
            | TilingError::Processing {
                partition_index, ..
            }
            | TilingError::DeadlineElapsed {
                partition_index, ..
            }
            | TilingError::InvalidTile {
                partition_index, ..
            }
            | TilingError::ResolutionMismatch {
                partition_index, ..
            }
            | TilingError::CrsMismatch {
                partition_index, ..
            }
            | TilingError::UnsupportedTransform {
                partition_index, ..
            } => Some(*partition_index),
            _ => None,
        }
    }

    pub(crate) fn source_read(source_id: &SourceId, err: impl fmt::Display) -> Self {
        TilingError::SourceRead {
            source_id: source_id.clone(),
            message: err.to_string(),
        }
    }

    pub(crate) fn payload_write(
        source_id: &SourceId,
        partition_index: usize,
        err: impl fmt::Display,
    ) -> Self {
        TilingError::PayloadWrite {
            source_id: source_id.clone(),
            partition_index,
            message: err.to_string(),
        }
    }

    pub(crate) fn processing(
        source_id: &SourceId,
        partition_index: usize,
        err: impl fmt::Display,
    ) -> Self {
        TilingError::Processing {
            source_id: source_id.clone(),
            partition_index,
            message: err.to_string(),
        }
    }

    pub(crate) fn invalid_tile(
        source_id: &SourceId,
        partition_index: usize,
        message: impl fmt::Display,
    ) -> Self {
        TilingError::InvalidTile {
            source_id: source_id.clone(),
            partition_index,
            message: message.to_string(),
        }
    }
}

impl From<toml::de::Error> for TilingError {
    fn from(e: toml::de::Error) -> Self {
        TilingError::Config(e.to_string())
    }
}

impl From<tiff::TiffError> for TilingError {
    fn from(e: tiff::TiffError) -> Self {
        TilingError::RasterCodec(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processing_error_identifies_partition() {
        let err = TilingError::processing(&SourceId::new("tile_a.laz"), 2, "pdal exited 1");

        assert_eq!(err.stage(), Stage::Process);
        assert_eq!(err.partition_index(), Some(2));
        assert_eq!(err.source_id().map(SourceId::as_str), Some("tile_a.laz"));
        assert!(err.to_string().contains("partition 2 of tile_a.laz"));
    }

    #[test]
    fn blocked_merge_has_no_single_partition() {
        let err = TilingError::MergeBlocked {
            source_id: SourceId::new("s"),
            kind: RasterKind::Terrain,
            failed: vec![2],
            missing: vec![],
        };

        assert_eq!(err.stage(), Stage::Merge);
        assert_eq!(err.partition_index(), None);
    }

    #[test]
    fn rejected_tile_is_a_merge_error() {
        let err = TilingError::invalid_tile(&SourceId::new("s"), 3, "duplicate terrain tile");

        assert_eq!(err.stage(), Stage::Merge);
        assert_eq!(err.partition_index(), Some(3));
        assert!(matches!(
            TilingError::InvalidArgument("n".into()).stage(),
            Stage::Partition
        ));
    }
}
