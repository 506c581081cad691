/// Streaming point router
///
/// Scans a point source chunk by chunk and appends every point to the
/// payload of each partition whose bounds contain it. Only `x` and `y` are
/// inspected; the rest of the point record is copied through untouched.
use crate::bounds::BoundingBox;
use crate::error::{Result, TilingError};
use crate::laz::{PartitionWriter, PointSource, payload_header};
use crate::payload::{Partition, PartitionPayload, SourceId};
use crate::progress::{NoProgress, ProgressSink, percent};
use constants::tiling::DEFAULT_CHUNK_POINTS;
use serde::{Deserialize, Serialize};

static NO_PROGRESS: NoProgress = NoProgress;

/// Membership rule for points lying on a partition edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryPolicy {
    /// Closed intervals on both ends. Points on a shared edge go to every
    /// partition touching it, giving merged rasters overlapping support at seams.
    #[default]
    Inclusive,
    /// `[min, max)` intervals, closed only on the outer edge of the partition
    /// set. Every covered point lands in exactly one partition.
    HalfOpen,
}

impl BoundaryPolicy {
    fn contains(&self, cell: &BoundingBox, extent: &BoundingBox, x: f64, y: f64) -> bool {
        match self {
            BoundaryPolicy::Inclusive => cell.contains(x, y),
            BoundaryPolicy::HalfOpen => {
                let in_x = x >= cell.x_min
                    && (x < cell.x_max || (cell.x_max >= extent.x_max && x <= cell.x_max));
                let in_y = y >= cell.y_min
                    && (y < cell.y_max || (cell.y_max >= extent.y_max && y <= cell.y_max));
                in_x && in_y
            }
        }
    }
}

/// Counters gathered while routing one source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingSummary {
    pub points_read: u64,
    /// Total writes across all partitions, duplicates included.
    pub points_written: u64,
    /// Extra copies written for points matching more than one partition.
    pub duplicated_points: u64,
    /// Points that matched no partition.
    pub unmatched_points: u64,
    pub chunks: u64,
}

/// Routed partitions in input order plus the scan counters.
#[derive(Debug)]
pub struct RoutedSource {
    pub payloads: Vec<PartitionPayload>,
    pub summary: RoutingSummary,
}

pub struct StreamingPointRouter<'a> {
    chunk_points: usize,
    policy: BoundaryPolicy,
    compress: bool,
    strict_coverage: bool,
    progress: &'a dyn ProgressSink,
}

impl Default for StreamingPointRouter<'_> {
    fn default() -> Self {
        Self {
            chunk_points: DEFAULT_CHUNK_POINTS,
            policy: BoundaryPolicy::default(),
            compress: true,
            strict_coverage: false,
            progress: &NO_PROGRESS,
        }
    }
}

impl<'a> StreamingPointRouter<'a> {
    pub fn new(chunk_points: usize) -> Result<Self> {
        if chunk_points == 0 {
            return Err(TilingError::InvalidArgument(
                "chunk size must be positive".to_string(),
            ));
        }
        Ok(Self {
            chunk_points,
            ..Self::default()
        })
    }

    pub fn with_policy(mut self, policy: BoundaryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Emit LAZ (compressed) payloads instead of plain LAS.
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Fail routing when any point matches no partition.
    pub fn with_strict_coverage(mut self, strict: bool) -> Self {
        self.strict_coverage = strict;
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    /// Route every point of `source` into one payload per partition.
    ///
    /// Payloads are returned in the order of `partitions`. On any read or
    /// write failure no payload is returned and all writers are released.
    pub fn route<S: PointSource>(
        &self,
        source_id: &SourceId,
        source: &mut S,
        partitions: &[Partition],
    ) -> Result<RoutedSource> {
        if partitions.is_empty() {
            return Err(TilingError::InvalidArgument(format!(
                "no partitions to route {source_id} into"
            )));
        }

        let header = payload_header(source.header(), self.compress)
            .map_err(|e| TilingError::source_read(source_id, e))?;
        let extent = partitions
            .iter()
            .fold(BoundingBox::empty(), |acc, p| acc.union(&p.bounds));

        let mut writers = partitions
            .iter()
            .map(|p| {
                PartitionWriter::new(*p, header.clone())
                    .map_err(|e| TilingError::payload_write(source_id, p.index, e))
            })
            .collect::<Result<Vec<_>>>()?;

        let total_points = source.total_points();
        let mut summary = RoutingSummary::default();
        let mut chunk = Vec::with_capacity(self.chunk_points.min(total_points as usize));
        let mut matched: Vec<bool> = Vec::with_capacity(chunk.capacity());

        self.progress.start(total_points, "points routed");
        log::info!(
            "Routing {} points of {} into {} partitions",
            total_points,
            source_id,
            partitions.len()
        );

        loop {
            let read = source
                .read_chunk(self.chunk_points as u64, &mut chunk)
                .map_err(|e| TilingError::source_read(source_id, e))?;
            if read == 0 {
                break;
            }

            matched.clear();
            matched.resize(chunk.len(), false);
            let mut routed = 0usize;

            for writer in writers.iter_mut() {
                let cell = writer.partition().bounds;
                let index = writer.partition().index;

                for (point, seen) in chunk.iter().zip(matched.iter_mut()) {
                    if !self.policy.contains(&cell, &extent, point.x, point.y) {
                        continue;
                    }
                    writer
                        .write(point.clone())
                        .map_err(|e| TilingError::payload_write(source_id, index, e))?;
                    summary.points_written += 1;
                    if *seen {
                        summary.duplicated_points += 1;
                    } else {
                        *seen = true;
                        routed += 1;
                    }
                }

                // Exclusive membership: nothing left for later partitions.
                if self.policy == BoundaryPolicy::HalfOpen && routed == chunk.len() {
                    break;
                }
            }

            let unmatched = (chunk.len() - routed) as u64;
            if unmatched > 0 {
                log::warn!(
                    "{} points in chunk {} of {} matched no partition",
                    unmatched,
                    summary.chunks,
                    source_id
                );
                summary.unmatched_points += unmatched;
            }

            summary.points_read += read;
            summary.chunks += 1;
            self.progress.advance(summary.points_read);
            log::debug!(
                "{}: {:.1}%",
                source_id,
                percent(summary.points_read, total_points)
            );
        }

        if summary.points_read < total_points {
            return Err(TilingError::source_read(
                source_id,
                format!(
                    "truncated stream: header declares {} points, read {}",
                    total_points, summary.points_read
                ),
            ));
        }

        if self.strict_coverage && summary.unmatched_points > 0 {
            return Err(TilingError::UnroutedPoints {
                source_id: source_id.clone(),
                count: summary.unmatched_points,
            });
        }

        let payloads = writers
            .into_iter()
            .map(|writer| {
                let index = writer.partition().index;
                let (partition, point_count, bytes) = writer
                    .seal()
                    .map_err(|e| TilingError::payload_write(source_id, index, e))?;
                Ok(PartitionPayload {
                    source_id: source_id.clone(),
                    partition,
                    point_count,
                    bytes,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.progress.finish("Points routed");
        log::info!(
            "Routed {} points of {} ({} duplicated on shared edges, {} unmatched)",
            summary.points_read,
            source_id,
            summary.duplicated_points,
            summary.unmatched_points
        );

        Ok(RoutedSource { payloads, summary })
    }
}
