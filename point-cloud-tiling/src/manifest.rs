/// Run manifest describing how one source was split, processed and merged.
use crate::bounds::BoundingBox;
use crate::error::Result;
use crate::pipeline::PipelineProfile;
use crate::raster::RasterKind;
use crate::router::{BoundaryPolicy, RoutingSummary};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Outcome of one partition in the processing fan-out.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStatus {
    Processed,
    /// No points were routed here; nothing to rasterise.
    Empty,
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PartitionRecord {
    pub index: usize,
    pub bounds: BoundingBox,
    pub point_count: u64,
    pub status: PartitionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Merge outcome for one raster kind.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MosaicRecord {
    pub kind: RasterKind,
    pub merged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<(usize, usize)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything known about one source after a run.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RunManifest {
    pub source: String,
    pub bounds: BoundingBox,
    pub square_splits: usize,
    pub boundary_policy: BoundaryPolicy,
    pub profile: PipelineProfile,
    pub routing: RoutingSummary,
    pub partitions: Vec<PartitionRecord>,
    pub mosaics: Vec<MosaicRecord>,
}

impl RunManifest {
    /// True when every requested mosaic was produced.
    pub fn is_complete(&self) -> bool {
        !self.mosaics.is_empty() && self.mosaics.iter().all(|m| m.merged)
    }

    pub fn failed_partitions(&self) -> Vec<usize> {
        self.partitions
            .iter()
            .filter(|p| p.status == PartitionStatus::Failed)
            .map(|p| p.index)
            .collect()
    }
}

/// Writes run manifests beside the merged outputs.
pub struct ManifestGenerator {
    /// Base output directory for all generated files.
    output_dir: PathBuf,
    /// Output file stem shared with the mosaics.
    output_name: String,
}

impl ManifestGenerator {
    pub fn new(output_dir: &Path, output_name: &str) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            output_name: output_name.to_string(),
        }
    }

    pub fn write(&self, manifest: &RunManifest) -> Result<PathBuf> {
        let manifest_path = self
            .output_dir
            .join(format!("{}_manifest.json", self.output_name));
        let manifest_json = serde_json::to_string_pretty(manifest)?;
        fs::write(&manifest_path, manifest_json)?;

        log::info!("Generated manifest: {}", manifest_path.display());
        self.log_summary(manifest);
        Ok(manifest_path)
    }

    fn log_summary(&self, manifest: &RunManifest) {
        log::info!("Manifest summary for {}:", manifest.source);
        log::info!(
            "  Bounds: ({:.2}, {:.2}) to ({:.2}, {:.2})",
            manifest.bounds.x_min,
            manifest.bounds.y_min,
            manifest.bounds.x_max,
            manifest.bounds.y_max
        );
        log::info!(
            "  Points: {} read, {} duplicated on shared edges",
            manifest.routing.points_read,
            manifest.routing.duplicated_points
        );
        for mosaic in &manifest.mosaics {
            match (&mosaic.file, &mosaic.error) {
                (Some(file), _) => log::info!("  {}: {}", mosaic.kind, file),
                (None, Some(error)) => log::warn!("  {}: not merged ({})", mosaic.kind, error),
                (None, None) => log::info!("  {}: merged in memory", mosaic.kind),
            }
        }
    }
}
