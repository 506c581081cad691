/// External processing engine seam.
///
/// The engine turns one partition payload into elevation rasters. The crate
/// ships an adapter for the PDAL command line; anything honouring
/// [`ProcessingEngine`] can stand in for it.
use crate::error::{Result, TilingError};
use crate::geotiff::decode_tile;
use crate::payload::PartitionPayload;
use crate::pipeline::{PipelineParams, PipelineProfile, descriptor};
use crate::raster::RasterTile;
use constants::pipeline::DEFAULT_PDAL_BINARY;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, Command, Output, Stdio};

/// Rasterises partitions. Must be deterministic for identical input and
/// return one tile per kind in `profile.output_kinds()`.
pub trait ProcessingEngine: Sync {
    fn process(
        &self,
        payload: PartitionPayload,
        profile: PipelineProfile,
        params: &PipelineParams,
    ) -> Result<Vec<RasterTile>>;
}

/// Runs pipeline descriptors through `pdal pipeline --stdin`.
pub struct PdalEngine {
    binary: PathBuf,
}

impl Default for PdalEngine {
    fn default() -> Self {
        Self::new(DEFAULT_PDAL_BINARY)
    }
}

impl PdalEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run(&self, document: &serde_json::Value) -> std::result::Result<(), String> {
        let body = serde_json::to_vec(document).map_err(|e| e.to_string())?;
        let child = Command::new(&self.binary)
            .args(["pipeline", "--stdin"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("failed to launch {}: {}", self.binary.display(), e))?;

        let output = feed_and_wait(child, &body)?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            log::debug!("pdal: {}", stderr.trim());
        }
        if !output.status.success() {
            return Err(format!("pdal exited with {}: {}", output.status, stderr.trim()));
        }
        Ok(())
    }
}

/// Write `body` to the child's stdin, then wait for it. The child is reaped
/// even when the write fails.
fn feed_and_wait(mut child: Child, body: &[u8]) -> std::result::Result<Output, String> {
    let written = match child.stdin.take() {
        // stdin is closed when the handle drops at the end of this arm.
        Some(mut stdin) => stdin.write_all(body),
        None => Ok(()),
    };
    let output = child.wait_with_output().map_err(|e| e.to_string())?;
    if let Err(e) = written {
        return Err(format!(
            "pipeline input rejected (exit {}): {}",
            output.status, e
        ));
    }
    Ok(output)
}

impl ProcessingEngine for PdalEngine {
    fn process(
        &self,
        payload: PartitionPayload,
        profile: PipelineProfile,
        params: &PipelineParams,
    ) -> Result<Vec<RasterTile>> {
        let source_id = payload.source_id.clone();
        let index = payload.partition_index();
        let fail = |e: &dyn std::fmt::Display| TilingError::processing(&source_id, index, e);

        // Removed on every exit path when dropped; removal errors are ignored.
        let staging = tempfile::Builder::new()
            .prefix("point-cloud-tiling-")
            .tempdir()
            .map_err(|e| fail(&e))?;

        let input = staging.path().join(format!("part{index}.laz"));
        fs::write(&input, &payload.bytes).map_err(|e| fail(&e))?;
        drop(payload);

        let mut tiles = Vec::with_capacity(profile.output_kinds().len());
        for &kind in profile.output_kinds() {
            let output = staging
                .path()
                .join(format!("part{}_{}.tif", index, kind.suffix()));
            let document = descriptor(kind, &input, &output, params);

            log::info!("Executing {} pipeline for partition {} of {}", kind, index, source_id);
            self.run(&document).map_err(|e| fail(&e))?;

            let bytes = fs::read(&output).map_err(|e| fail(&e))?;
            log::debug!("{} raster for partition {} is {} bytes", kind, index, bytes.len());
            let tile = decode_tile(&bytes, &source_id, index, kind, params.nodata)
                .map_err(|e| fail(&e))?;
            tiles.push(tile);
        }

        Ok(tiles)
    }
}
