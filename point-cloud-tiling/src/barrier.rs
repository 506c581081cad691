/// Per-source merge barrier.
///
/// Holds arriving tiles until every partition of the source has reported for
/// a kind. A mosaic is only released for a complete set; any partition
/// failure, or an elapsed deadline, blocks the merge for that kind.
use crate::error::{Result, TilingError};
use crate::payload::SourceId;
use crate::raster::{RasterKind, RasterTile};
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BarrierStatus {
    /// Still waiting for tiles.
    Pending { received: usize, expected: usize },
    /// Every partition reported.
    Ready,
    /// A partition failed or the deadline passed.
    Blocked,
}

pub struct MergeBarrier {
    source_id: SourceId,
    expected: usize,
    kinds: Vec<RasterKind>,
    tiles: BTreeMap<RasterKind, BTreeMap<usize, RasterTile>>,
    /// Partitions with no points; they report without tiles.
    empty: BTreeSet<usize>,
    failed: BTreeMap<usize, String>,
    deadline: Option<Instant>,
}

impl MergeBarrier {
    pub fn new(
        source_id: SourceId,
        expected: usize,
        kinds: &[RasterKind],
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            source_id,
            expected,
            kinds: kinds.to_vec(),
            tiles: kinds.iter().map(|&k| (k, BTreeMap::new())).collect(),
            empty: BTreeSet::new(),
            failed: BTreeMap::new(),
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    pub fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.expected {
            return Err(TilingError::invalid_tile(
                &self.source_id,
                index,
                format!("index out of range ({} partitions)", self.expected),
            ));
        }
        Ok(())
    }

    pub fn record_tile(&mut self, tile: RasterTile) -> Result<()> {
        let index = tile.partition_index;
        if tile.source_id != self.source_id {
            return Err(TilingError::invalid_tile(
                &self.source_id,
                index,
                format!("tile belongs to {}", tile.source_id),
            ));
        }
        self.check_index(index)?;
        let Some(slot) = self.tiles.get_mut(&tile.kind) else {
            return Err(TilingError::invalid_tile(
                &self.source_id,
                index,
                format!("{} was not requested", tile.kind),
            ));
        };
        if slot.contains_key(&index) {
            return Err(TilingError::invalid_tile(
                &self.source_id,
                index,
                format!("duplicate {} tile", tile.kind),
            ));
        }
        slot.insert(tile.partition_index, tile);
        Ok(())
    }

    /// Partition routed no points and produces no rasters.
    pub fn record_empty(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;
        self.empty.insert(index);
        Ok(())
    }

    pub fn record_failure(&mut self, index: usize, error: &TilingError) -> Result<()> {
        self.check_index(index)?;
        log::warn!(
            "Partition {} of {} failed, merge will be blocked: {}",
            index,
            self.source_id,
            error
        );
        self.failed.insert(index, error.to_string());
        Ok(())
    }

    /// Failed partitions with their error messages.
    pub fn failures(&self) -> &BTreeMap<usize, String> {
        &self.failed
    }

    /// Partitions that have not reported for `kind`.
    pub fn missing(&self, kind: RasterKind) -> Vec<usize> {
        let received = self.tiles.get(&kind);
        (0..self.expected)
            .filter(|i| !self.empty.contains(i) && !self.failed.contains_key(i))
            .filter(|i| received.is_none_or(|tiles| !tiles.contains_key(i)))
            .collect()
    }

    /// Time left before the deadline; `None` when waiting is unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining() == Some(Duration::ZERO)
    }

    pub fn status(&self, kind: RasterKind) -> BarrierStatus {
        if !self.failed.is_empty() {
            return BarrierStatus::Blocked;
        }
        let missing = self.missing(kind).len();
        if missing == 0 {
            return BarrierStatus::Ready;
        }
        if self.is_expired() {
            return BarrierStatus::Blocked;
        }
        BarrierStatus::Pending {
            received: self.expected - missing,
            expected: self.expected,
        }
    }

    /// Take the complete tile set for `kind`.
    ///
    /// `Ok(None)` while tiles are still outstanding; `MergeBlocked` once the
    /// set can no longer complete.
    pub fn release(&mut self, kind: RasterKind) -> Result<Option<Vec<RasterTile>>> {
        match self.status(kind) {
            BarrierStatus::Pending { .. } => Ok(None),
            BarrierStatus::Blocked => Err(TilingError::MergeBlocked {
                source_id: self.source_id.clone(),
                kind,
                failed: self.failed.keys().copied().collect(),
                missing: self.missing(kind),
            }),
            BarrierStatus::Ready => {
                let tiles = self.tiles.remove(&kind).unwrap_or_default();
                Ok(Some(tiles.into_values().collect()))
            }
        }
    }

    pub fn kinds(&self) -> &[RasterKind] {
        &self.kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;
    use crate::raster::GeoTransform;

    fn tile(index: usize, kind: RasterKind) -> RasterTile {
        RasterTile {
            source_id: SourceId::new("src"),
            partition_index: index,
            kind,
            width: 1,
            height: 1,
            pixels: vec![index as f32],
            transform: GeoTransform::north_up(index as f64, 1.0, 1.0, 1.0),
            nodata: -9999.0,
            crs: String::new(),
        }
    }

    fn barrier(expected: usize) -> MergeBarrier {
        MergeBarrier::new(SourceId::new("src"), expected, &[RasterKind::Terrain], None)
    }

    #[test]
    fn releases_only_complete_sets() {
        let mut b = barrier(3);
        b.record_tile(tile(2, RasterKind::Terrain)).unwrap();
        b.record_tile(tile(0, RasterKind::Terrain)).unwrap();

        assert_eq!(
            b.status(RasterKind::Terrain),
            BarrierStatus::Pending {
                received: 2,
                expected: 3
            }
        );
        assert!(b.release(RasterKind::Terrain).unwrap().is_none());

        b.record_tile(tile(1, RasterKind::Terrain)).unwrap();
        let tiles = b.release(RasterKind::Terrain).unwrap().unwrap();
        let order: Vec<usize> = tiles.iter().map(|t| t.partition_index).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn failure_blocks_merge() {
        let mut b = barrier(4);
        for i in [0, 1, 3] {
            b.record_tile(tile(i, RasterKind::Terrain)).unwrap();
        }
        let err = TilingError::processing(&SourceId::new("src"), 2, "boom");
        b.record_failure(2, &err).unwrap();

        match b.release(RasterKind::Terrain).unwrap_err() {
            TilingError::MergeBlocked {
                failed, missing, ..
            } => {
                assert_eq!(failed, vec![2]);
                assert!(missing.is_empty());
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn empty_partitions_count_as_reported() {
        let mut b = barrier(2);
        b.record_empty(1).unwrap();
        b.record_tile(tile(0, RasterKind::Terrain)).unwrap();
        assert_eq!(b.status(RasterKind::Terrain), BarrierStatus::Ready);
    }

    #[test]
    fn elapsed_deadline_blocks() {
        let mut b = MergeBarrier::new(
            SourceId::new("src"),
            2,
            &[RasterKind::Terrain],
            Some(Duration::ZERO),
        );
        b.record_tile(tile(0, RasterKind::Terrain)).unwrap();
        match b.release(RasterKind::Terrain).unwrap_err() {
            TilingError::MergeBlocked { missing, .. } => assert_eq!(missing, vec![1]),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn rejects_foreign_and_duplicate_tiles() {
        let mut b = barrier(2);
        let mut foreign = tile(0, RasterKind::Terrain);
        foreign.source_id = SourceId::new("other");
        assert!(b.record_tile(foreign).is_err());
        assert!(b.record_tile(tile(5, RasterKind::Terrain)).is_err());
        assert!(b.record_tile(tile(0, RasterKind::Surface)).is_err());

        b.record_tile(tile(0, RasterKind::Terrain)).unwrap();
        let err = b.record_tile(tile(0, RasterKind::Terrain)).unwrap_err();
        assert_eq!(err.stage(), Stage::Merge);
        assert_eq!(err.partition_index(), Some(0));
    }

    #[test]
    fn deadline_reports_remaining_time() {
        assert_eq!(barrier(1).remaining(), None);

        let b = MergeBarrier::new(
            SourceId::new("src"),
            1,
            &[RasterKind::Terrain],
            Some(Duration::from_secs(600)),
        );
        assert!(b.remaining().unwrap() > Duration::from_secs(590));
        assert!(!b.is_expired());
    }
}
