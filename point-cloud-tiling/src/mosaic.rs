/// Raster mosaic merging
///
/// Composites the per-partition tiles of one source and kind onto a grid
/// covering their union footprint. Tiles are applied in ascending partition
/// order and later tiles win, except that nodata never overwrites a valid
/// pixel.
use crate::bounds::BoundingBox;
use crate::error::{Result, TilingError};
use crate::payload::SourceId;
use crate::raster::{
    GeoTransform, MosaicMetadata, MosaicRaster, RasterKind, RasterTile, is_nodata,
};
use constants::raster::{MOSAIC_BLOCK_SIZE, RESOLUTION_TOLERANCE};

fn same_resolution(a: (f64, f64), b: (f64, f64)) -> bool {
    let close = |p: f64, q: f64| (p - q).abs() <= RESOLUTION_TOLERANCE * p.abs().max(q.abs());
    close(a.0, b.0) && close(a.1, b.1)
}

pub struct RasterMosaicMerger {
    block_size: u32,
}

impl Default for RasterMosaicMerger {
    fn default() -> Self {
        Self::new(MOSAIC_BLOCK_SIZE)
    }
}

impl RasterMosaicMerger {
    /// `block_size` is the storage hint recorded on terrain mosaics.
    pub fn new(block_size: u32) -> Self {
        Self { block_size }
    }

    /// Merge every tile of one kind for one source.
    pub fn merge(
        &self,
        source_id: &SourceId,
        kind: RasterKind,
        mut tiles: Vec<RasterTile>,
    ) -> Result<MosaicRaster> {
        if tiles.is_empty() {
            return Err(TilingError::EmptyPartitionSet {
                source_id: source_id.clone(),
                kind,
            });
        }
        tiles.sort_by_key(|t| t.partition_index);

        let first = &tiles[0];
        let resolution = first.transform.resolution();
        let nodata = first.nodata;
        let crs = first.crs.clone();

        for tile in &tiles {
            self.check_tile(source_id, kind, tile, resolution, &crs)?;
        }

        let footprint = tiles
            .iter()
            .fold(BoundingBox::empty(), |acc, t| acc.union(&t.footprint()));
        let (res_x, res_y) = resolution;
        let width = (footprint.width() / res_x).round() as usize;
        let height = (footprint.height() / res_y).round() as usize;
        let transform = GeoTransform::north_up(footprint.x_min, footprint.y_max, res_x, res_y);

        log::info!(
            "Merging {} {} tiles of {} into {}x{} mosaic",
            tiles.len(),
            kind,
            source_id,
            width,
            height
        );

        let mut pixels = vec![nodata as f32; width * height];
        for tile in &tiles {
            let col0 = ((tile.transform.origin_x - footprint.x_min) / res_x).round() as usize;
            let row0 = ((footprint.y_max - tile.transform.origin_y) / res_y).round() as usize;

            for (r, row) in tile.pixels.chunks_exact(tile.width).enumerate() {
                let dst_row = row0 + r;
                if dst_row >= height {
                    break;
                }
                for (c, &value) in row.iter().enumerate() {
                    let dst_col = col0 + c;
                    if dst_col >= width {
                        break;
                    }
                    if !is_nodata(value, tile.nodata) {
                        pixels[dst_row * width + dst_col] = value;
                    }
                }
            }
        }

        let block_size = match kind {
            RasterKind::Terrain => Some(self.block_size),
            RasterKind::Surface => None,
        };

        Ok(MosaicRaster {
            source_id: source_id.clone(),
            kind,
            pixels,
            transform,
            metadata: MosaicMetadata {
                width,
                height,
                nodata,
                crs,
                block_size,
                tile_count: tiles.len(),
            },
        })
    }

    /// Merge each requested kind independently. A failure for one kind does
    /// not prevent the others; callers needing all kinds must check each result.
    pub fn merge_kinds(
        &self,
        source_id: &SourceId,
        kinds: &[RasterKind],
        tiles: Vec<RasterTile>,
    ) -> Vec<(RasterKind, Result<MosaicRaster>)> {
        let mut tiles = tiles;
        kinds
            .iter()
            .map(|&kind| {
                let (own, rest): (Vec<_>, Vec<_>) = tiles.drain(..).partition(|t| t.kind == kind);
                tiles = rest;
                (kind, self.merge(source_id, kind, own))
            })
            .collect()
    }

    fn check_tile(
        &self,
        source_id: &SourceId,
        kind: RasterKind,
        tile: &RasterTile,
        resolution: (f64, f64),
        crs: &str,
    ) -> Result<()> {
        if tile.kind != kind {
            return Err(TilingError::invalid_tile(
                source_id,
                tile.partition_index,
                format!("{} tile in a {} merge", tile.kind, kind),
            ));
        }
        if !tile.transform.is_north_up() {
            return Err(TilingError::UnsupportedTransform {
                source_id: source_id.clone(),
                partition_index: tile.partition_index,
                reason: format!("{:?} is not north-up", tile.transform.to_gdal()),
            });
        }
        if tile.width == 0 || tile.pixels.len() != tile.width * tile.height {
            return Err(TilingError::invalid_tile(
                source_id,
                tile.partition_index,
                format!(
                    "{} samples for a {}x{} grid",
                    tile.pixels.len(),
                    tile.width,
                    tile.height
                ),
            ));
        }
        let found = tile.transform.resolution();
        if !same_resolution(resolution, found) {
            return Err(TilingError::ResolutionMismatch {
                source_id: source_id.clone(),
                kind,
                partition_index: tile.partition_index,
                expected: resolution,
                found,
            });
        }
        if !crs.is_empty() && !tile.crs.is_empty() && tile.crs != crs {
            return Err(TilingError::CrsMismatch {
                source_id: source_id.clone(),
                kind,
                partition_index: tile.partition_index,
                expected: crs.to_string(),
                found: tile.crs.clone(),
            });
        }
        Ok(())
    }
}
