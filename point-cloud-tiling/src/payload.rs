/// Messages exchanged between the routing, processing and merge stages.
use crate::bounds::BoundingBox;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Stable identity of one logical input file. Groups partitions for merging.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identity derived from an input path.
    pub fn from_path(path: &Path) -> Self {
        Self(path.to_string_lossy().into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One cell of a source's partition grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub index: usize,
    pub bounds: BoundingBox,
}

impl Partition {
    /// Number partitions in emission order.
    pub fn enumerate(bounds: Vec<BoundingBox>) -> Vec<Partition> {
        bounds
            .into_iter()
            .enumerate()
            .map(|(index, bounds)| Partition { index, bounds })
            .collect()
    }
}

/// A sealed, independently decodable LAS/LAZ payload holding one partition's points.
pub struct PartitionPayload {
    pub source_id: SourceId,
    pub partition: Partition,
    pub point_count: u64,
    pub bytes: Vec<u8>,
}

impl PartitionPayload {
    pub fn partition_index(&self) -> usize {
        self.partition.index
    }
}

impl fmt::Debug for PartitionPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionPayload")
            .field("source_id", &self.source_id)
            .field("partition", &self.partition)
            .field("point_count", &self.point_count)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}
