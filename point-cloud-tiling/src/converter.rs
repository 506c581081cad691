/// Main point cloud converter orchestrating split, process and merge.
use crate::barrier::MergeBarrier;
use crate::bounds::{BoundingBox, split};
use crate::config::TilingConfig;
use crate::engine::ProcessingEngine;
use crate::error::{Result, TilingError};
use crate::geotiff::encode_mosaic;
use crate::laz::{PointSource, create_reader, header_bounds};
use crate::manifest::{
    ManifestGenerator, MosaicRecord, PartitionRecord, PartitionStatus, RunManifest,
};
use crate::mosaic::RasterMosaicMerger;
use crate::payload::{Partition, PartitionPayload, SourceId};
use crate::progress::{NoProgress, ProgressReporter};
use crate::raster::{MosaicRaster, RasterKind, RasterTile};
use crate::router::{RoutedSource, StreamingPointRouter};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;

static NO_PROGRESS: NoProgress = NoProgress;

/// Result of processing one partition through the engine.
#[derive(Debug)]
pub struct PartitionResult {
    pub partition: Partition,
    pub point_count: u64,
    /// `None` when the partition held no points and was not processed.
    pub tiles: Option<Result<Vec<RasterTile>>>,
}

impl PartitionResult {
    fn record(&self, status: PartitionStatus, error: Option<String>) -> PartitionRecord {
        PartitionRecord {
            index: self.partition.index,
            bounds: self.partition.bounds,
            point_count: self.point_count,
            status,
            error,
        }
    }
}

/// Everything produced for one source file.
#[derive(Debug)]
pub struct SourceOutcome {
    pub source_id: SourceId,
    pub mosaics: Vec<(RasterKind, Result<MosaicRaster>)>,
    pub manifest: RunManifest,
}

impl SourceOutcome {
    /// Merged rasters that were produced.
    pub fn completed(&self) -> impl Iterator<Item = &MosaicRaster> {
        self.mosaics.iter().filter_map(|(_, r)| r.as_ref().ok())
    }
}

/// Drives sources through partitioning, routing, the processing engine and
/// the merge barrier.
pub struct PointCloudConverter<'a, E: ProcessingEngine> {
    config: TilingConfig,
    engine: E,
    progress: &'a dyn ProgressReporter,
}

impl<'a, E: ProcessingEngine> PointCloudConverter<'a, E> {
    pub fn new(config: TilingConfig, engine: E) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            engine,
            progress: &NO_PROGRESS,
        })
    }

    /// Report routing progress, one sink per source.
    pub fn with_progress(mut self, progress: &'a dyn ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &TilingConfig {
        &self.config
    }

    /// Grid partitions over the planar extent of `bounds`.
    pub fn partitions(&self, bounds: &BoundingBox) -> Result<Vec<Partition>> {
        if !bounds.is_valid() {
            return Err(TilingError::InvalidArgument(format!(
                "source extent ({}, {}, {}, {}) cannot be partitioned",
                bounds.x_min, bounds.y_min, bounds.x_max, bounds.y_max
            )));
        }
        Ok(Partition::enumerate(split(
            bounds,
            self.config.tiling.square_splits,
        )?))
    }

    /// Route a source into partition payloads.
    pub fn route<S: PointSource>(
        &self,
        source_id: &SourceId,
        source: &mut S,
        partitions: &[Partition],
    ) -> Result<RoutedSource> {
        let tiling = &self.config.tiling;
        let progress = self.progress.for_source(source_id);
        StreamingPointRouter::new(tiling.chunk_points)?
            .with_policy(tiling.boundary_policy)
            .with_compression(tiling.compress)
            .with_strict_coverage(tiling.strict_coverage)
            .with_progress(&*progress)
            .route(source_id, source, partitions)
    }

    fn pool(&self) -> Result<rayon::ThreadPool> {
        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(threads) = self.config.execution.max_parallel {
            builder = builder.num_threads(threads);
        }
        builder
            .build()
            .map_err(|e| TilingError::Config(format!("cannot start worker pool: {e}")))
    }

    fn process_one(&self, payload: PartitionPayload) -> PartitionResult {
        let partition = payload.partition;
        let point_count = payload.point_count;
        if point_count == 0 {
            log::info!(
                "Partition {} of {} is empty, skipping",
                partition.index,
                payload.source_id
            );
            return PartitionResult {
                partition,
                point_count,
                tiles: None,
            };
        }
        let tiles = self.engine.process(
            payload,
            self.config.pipeline.profile,
            &self.config.pipeline.params,
        );
        if let Err(e) = &tiles {
            log::error!("{}", e);
        }
        PartitionResult {
            partition,
            point_count,
            tiles: Some(tiles),
        }
    }

    /// Run payloads on the worker pool, bounded by `execution.max_parallel`,
    /// sending each result as it completes. Payloads not yet started once
    /// `cancel` is raised are reported as having missed the deadline.
    fn fan_out(
        &self,
        payloads: Vec<PartitionPayload>,
        cancel: &AtomicBool,
        results: Sender<PartitionResult>,
    ) -> Result<()> {
        let pool = self.pool()?;
        pool.install(|| {
            payloads
                .into_par_iter()
                .for_each_with(results, |results, payload| {
                    let result = if cancel.load(Ordering::Relaxed) {
                        PartitionResult {
                            partition: payload.partition,
                            point_count: payload.point_count,
                            tiles: Some(Err(TilingError::DeadlineElapsed {
                                source_id: payload.source_id.clone(),
                                partition_index: payload.partition_index(),
                            })),
                        }
                    } else {
                        self.process_one(payload)
                    };
                    // Only fails once the receiver has stopped waiting.
                    let _ = results.send(result);
                });
        });
        Ok(())
    }

    fn barrier(&self, source_id: &SourceId, partition_count: usize) -> MergeBarrier {
        MergeBarrier::new(
            source_id.clone(),
            partition_count,
            self.config.pipeline.profile.output_kinds(),
            self.config.merge.timeout(),
        )
    }

    /// Process payloads in parallel, feeding the merge barrier as results arrive.
    ///
    /// With `merge.timeout_secs` set, waiting stops at the deadline. Queued
    /// partitions are then skipped, and partitions finishing late are
    /// reported as `DeadlineElapsed` without reaching the barrier, which
    /// blocks the merge. One partition failure does not affect the rest.
    pub fn process(
        &self,
        source_id: &SourceId,
        partition_count: usize,
        payloads: Vec<PartitionPayload>,
    ) -> Result<(MergeBarrier, Vec<PartitionRecord>)> {
        let mut barrier = self.barrier(source_id, partition_count);
        let expected = payloads.len();
        let mut records = Vec::with_capacity(expected);
        let cancel = AtomicBool::new(false);
        let (sender, receiver) = mpsc::channel();

        let fanned = thread::scope(|scope| {
            let worker = scope.spawn(|| self.fan_out(payloads, &cancel, sender));

            while records.len() < expected {
                let received = match barrier.remaining() {
                    Some(remaining) => receiver.recv_timeout(remaining),
                    None => receiver
                        .recv()
                        .map_err(|_| RecvTimeoutError::Disconnected),
                };
                match received {
                    Ok(result) => records.push(intake(&mut barrier, result)),
                    Err(RecvTimeoutError::Timeout) => {
                        log::warn!(
                            "Merge deadline for {} passed with {} of {} partitions reported",
                            source_id,
                            records.len(),
                            expected
                        );
                        cancel.store(true, Ordering::Relaxed);
                        break;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }

            let fanned = worker
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
            records.extend(receiver.try_iter().map(|late| late_record(source_id, late)));
            fanned
        });
        fanned?;

        records.sort_by_key(|r| r.index);
        Ok((barrier, records))
    }

    /// Release and merge every requested kind from the barrier. Each kind is
    /// reported independently.
    pub fn release(
        &self,
        source_id: &SourceId,
        barrier: &mut MergeBarrier,
    ) -> Vec<(RasterKind, Result<MosaicRaster>)> {
        let merger = RasterMosaicMerger::new(self.config.merge.block_size);
        let kinds = barrier.kinds().to_vec();
        kinds
            .into_iter()
            .map(|kind| {
                let merged = barrier.release(kind).and_then(|tiles| match tiles {
                    Some(tiles) => merger.merge(source_id, kind, tiles),
                    // Every partition reported, but some returned fewer kinds than requested.
                    None => Err(TilingError::MergeBlocked {
                        source_id: source_id.clone(),
                        kind,
                        failed: barrier.failures().keys().copied().collect(),
                        missing: barrier.missing(kind),
                    }),
                });
                if let Err(e) = &merged {
                    log::error!("{}", e);
                }
                (kind, merged)
            })
            .collect()
    }

    /// Run one already opened source end to end.
    ///
    /// Routing failures abort the source; partition and merge failures are
    /// reported per partition and per kind in the outcome.
    pub fn run_source<S: PointSource>(
        &self,
        source_id: SourceId,
        source: &mut S,
        bounds: BoundingBox,
    ) -> Result<SourceOutcome> {
        let partitions = self.partitions(&bounds)?;
        log::info!(
            "Processing {}: {} partitions over ({:.2}, {:.2}) to ({:.2}, {:.2})",
            source_id,
            partitions.len(),
            bounds.x_min,
            bounds.y_min,
            bounds.x_max,
            bounds.y_max
        );

        let routed = self.route(&source_id, source, &partitions)?;
        let (mut barrier, records) =
            self.process(&source_id, partitions.len(), routed.payloads)?;

        let mosaics = self.release(&source_id, &mut barrier);
        let mosaic_records = mosaics
            .iter()
            .map(|(kind, result)| MosaicRecord {
                kind: *kind,
                merged: result.is_ok(),
                file: None,
                size: result.as_ref().ok().map(|m| (m.width(), m.height())),
                error: result.as_ref().err().map(|e| e.to_string()),
            })
            .collect();

        let manifest = RunManifest {
            source: source_id.to_string(),
            bounds,
            square_splits: self.config.tiling.square_splits,
            boundary_policy: self.config.tiling.boundary_policy,
            profile: self.config.pipeline.profile,
            routing: routed.summary,
            partitions: records,
            mosaics: mosaic_records,
        };

        Ok(SourceOutcome {
            source_id,
            mosaics,
            manifest,
        })
    }

    /// Open a LAS/LAZ file and run it; header bounds define the partition grid.
    pub fn run_file(&self, path: &Path) -> Result<SourceOutcome> {
        let mut reader = create_reader(path)?;
        let bounds = header_bounds(reader.header());
        self.run_source(SourceId::from_path(path), &mut reader, bounds)
    }

    /// Run independent files in parallel.
    pub fn run_files(&self, paths: &[PathBuf]) -> Vec<(PathBuf, Result<SourceOutcome>)> {
        paths
            .par_iter()
            .map(|path| (path.clone(), self.run_file(path)))
            .collect()
    }
}

/// Hand one partition result to the barrier. A rejected tile fails the partition.
fn intake(barrier: &mut MergeBarrier, result: PartitionResult) -> PartitionRecord {
    let PartitionResult {
        partition,
        point_count,
        tiles,
    } = result;
    let record = |status, error| PartitionRecord {
        index: partition.index,
        bounds: partition.bounds,
        point_count,
        status,
        error,
    };
    let recorded = match tiles {
        None => barrier
            .record_empty(partition.index)
            .map(|()| record(PartitionStatus::Empty, None)),
        Some(Ok(tiles)) => tiles
            .into_iter()
            .try_for_each(|tile| barrier.record_tile(tile))
            .map(|()| record(PartitionStatus::Processed, None)),
        Some(Err(e)) => barrier
            .record_failure(partition.index, &e)
            .map(|()| record(PartitionStatus::Failed, Some(e.to_string()))),
    };
    recorded.unwrap_or_else(|e| {
        log::error!("{}", e);
        let _ = barrier.record_failure(partition.index, &e);
        record(PartitionStatus::Failed, Some(e.to_string()))
    })
}

/// Record for a result that arrived after the barrier stopped waiting.
fn late_record(source_id: &SourceId, result: PartitionResult) -> PartitionRecord {
    let error = match &result.tiles {
        Some(Err(e)) => e.to_string(),
        _ => TilingError::DeadlineElapsed {
            source_id: source_id.clone(),
            partition_index: result.partition.index,
        }
        .to_string(),
    };
    result.record(PartitionStatus::Failed, Some(error))
}

/// Write merged rasters and the manifest for one outcome into `output_dir`.
///
/// Each raster is staged in a temporary file in the same directory and
/// renamed into place, so a failed write never leaves a partial product.
pub fn write_outputs(
    outcome: &mut SourceOutcome,
    output_dir: &Path,
    output_name: &str,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(output_dir)?;
    let mut written = Vec::new();

    for (kind, result) in &outcome.mosaics {
        let Ok(mosaic) = result else { continue };
        let bytes = encode_mosaic(mosaic)?;
        let target = output_dir.join(format!("{}_{}.tif", output_name, kind.suffix()));

        let mut staged = tempfile::NamedTempFile::new_in(output_dir)?;
        staged.write_all(&bytes)?;
        staged.persist(&target).map_err(|e| TilingError::Io(e.error))?;
        log::info!(
            "Saved {} ({} mosaic {}x{})",
            target.display(),
            kind,
            mosaic.width(),
            mosaic.height()
        );

        if let Some(record) = outcome.manifest.mosaics.iter_mut().find(|m| m.kind == *kind) {
            record.file = Some(target.to_string_lossy().into_owned());
        }
        written.push(target);
    }

    let manifest_path = ManifestGenerator::new(output_dir, output_name).write(&outcome.manifest)?;
    written.push(manifest_path);
    Ok(written)
}

/// Output file stem for a source path: the file name without .las/.laz.
pub fn output_stem(path: &Path) -> String {
    path.file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .trim_end_matches(".copc")
        .to_string()
}

/// Output stems for a batch of inputs. Inputs sharing a stem would write
/// the same output files, so they are rejected together.
pub fn output_stems(paths: &[PathBuf]) -> Result<Vec<String>> {
    let mut by_stem: BTreeMap<String, Vec<&Path>> = BTreeMap::new();
    for path in paths {
        by_stem.entry(output_stem(path)).or_default().push(path);
    }

    let clashes: Vec<String> = by_stem
        .iter()
        .filter(|(_, inputs)| inputs.len() > 1)
        .map(|(stem, inputs)| {
            let names: Vec<String> = inputs.iter().map(|p| p.display().to_string()).collect();
            format!("{} ({})", stem, names.join(", "))
        })
        .collect();
    if !clashes.is_empty() {
        return Err(TilingError::InvalidArgument(format!(
            "inputs would overwrite each other's outputs: {}",
            clashes.join("; ")
        )));
    }

    Ok(paths.iter().map(|p| output_stem(p)).collect())
}
