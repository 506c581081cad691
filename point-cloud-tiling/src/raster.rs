/// Elevation raster tiles, georeferencing and merged mosaics
use crate::bounds::BoundingBox;
use crate::payload::SourceId;
use constants::raster::{SURFACE_SUFFIX, TERRAIN_SUFFIX};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Elevation model produced from a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RasterKind {
    /// Ground-classified points only (DTM).
    Terrain,
    /// First returns, no ground filtering (DSM).
    Surface,
}

impl RasterKind {
    /// Suffix used for output file names.
    pub fn suffix(&self) -> &'static str {
        match self {
            RasterKind::Terrain => TERRAIN_SUFFIX,
            RasterKind::Surface => SURFACE_SUFFIX,
        }
    }
}

impl fmt::Display for RasterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RasterKind::Terrain => f.write_str("terrain"),
            RasterKind::Surface => f.write_str("surface"),
        }
    }
}

/// Affine pixel-to-world transform in GDAL coefficient order.
///
/// `x = origin_x + col * pixel_width + row * row_rotation`
/// `y = origin_y + col * col_rotation + row * pixel_height`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub pixel_width: f64,
    pub row_rotation: f64,
    pub origin_y: f64,
    pub col_rotation: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform anchored at the top-left corner.
    pub fn north_up(origin_x: f64, origin_y: f64, res_x: f64, res_y: f64) -> Self {
        Self {
            origin_x,
            pixel_width: res_x,
            row_rotation: 0.0,
            origin_y,
            col_rotation: 0.0,
            pixel_height: -res_y,
        }
    }

    pub fn is_north_up(&self) -> bool {
        self.row_rotation == 0.0
            && self.col_rotation == 0.0
            && self.pixel_width > 0.0
            && self.pixel_height < 0.0
    }

    /// Absolute pixel size `(x, y)`.
    pub fn resolution(&self) -> (f64, f64) {
        (self.pixel_width.abs(), self.pixel_height.abs())
    }

    /// World extent covered by a `width` x `height` grid. North-up only.
    pub fn footprint(&self, width: usize, height: usize) -> BoundingBox {
        let x_max = self.origin_x + width as f64 * self.pixel_width;
        let y_min = self.origin_y + height as f64 * self.pixel_height;
        BoundingBox {
            x_min: self.origin_x,
            y_min,
            x_max,
            y_max: self.origin_y,
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.origin_x,
            self.pixel_width,
            self.row_rotation,
            self.origin_y,
            self.col_rotation,
            self.pixel_height,
        ]
    }
}

/// True when `value` marks an empty cell under `nodata`.
pub fn is_nodata(value: f32, nodata: f64) -> bool {
    if nodata.is_nan() {
        value.is_nan()
    } else {
        value as f64 == nodata || value.is_nan()
    }
}

/// One rasterised partition of one kind, as returned by the processing engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterTile {
    pub source_id: SourceId,
    pub partition_index: usize,
    pub kind: RasterKind,
    pub width: usize,
    pub height: usize,
    /// Row-major, top row first.
    pub pixels: Vec<f32>,
    pub transform: GeoTransform,
    pub nodata: f64,
    pub crs: String,
}

impl RasterTile {
    pub fn footprint(&self) -> BoundingBox {
        self.transform.footprint(self.width, self.height)
    }

    pub fn valid_pixel_count(&self) -> usize {
        self.pixels
            .iter()
            .filter(|&&v| !is_nodata(v, self.nodata))
            .count()
    }
}

/// Storage and georeferencing metadata of a merged raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MosaicMetadata {
    pub width: usize,
    pub height: usize,
    pub nodata: f64,
    pub crs: String,
    /// Block size hint for on-disk layout, terrain models only.
    pub block_size: Option<u32>,
    /// Number of tiles composited.
    pub tile_count: usize,
}

/// Final merged raster for one source file and kind.
#[derive(Debug, Clone, PartialEq)]
pub struct MosaicRaster {
    pub source_id: SourceId,
    pub kind: RasterKind,
    pub pixels: Vec<f32>,
    pub transform: GeoTransform,
    pub metadata: MosaicMetadata,
}

impl MosaicRaster {
    pub fn width(&self) -> usize {
        self.metadata.width
    }

    pub fn height(&self) -> usize {
        self.metadata.height
    }

    pub fn footprint(&self) -> BoundingBox {
        self.transform
            .footprint(self.metadata.width, self.metadata.height)
    }

    /// Pixel at `(col, row)`, or `None` outside the grid.
    pub fn pixel(&self, col: usize, row: usize) -> Option<f32> {
        if col >= self.metadata.width || row >= self.metadata.height {
            return None;
        }
        self.pixels.get(row * self.metadata.width + col).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footprint_of_north_up_grid() {
        let t = GeoTransform::north_up(100.0, 200.0, 0.5, 2.0);
        let fp = t.footprint(10, 4);
        assert_eq!(fp.x_min, 100.0);
        assert_eq!(fp.x_max, 105.0);
        assert_eq!(fp.y_max, 200.0);
        assert_eq!(fp.y_min, 192.0);
        assert_eq!(t.resolution(), (0.5, 2.0));
        assert!(t.is_north_up());
    }

    #[test]
    fn nodata_matching_handles_nan() {
        assert!(is_nodata(-9999.0, -9999.0));
        assert!(!is_nodata(12.5, -9999.0));
        assert!(is_nodata(f32::NAN, f64::NAN));
        assert!(!is_nodata(0.0, f64::NAN));
    }
}
