/// Shared fixtures: synthetic LAS sources and an in-process engine.
use las::{Builder, Point, Reader, Writer};
use point_cloud_tiling::laz::payload_reader;
use point_cloud_tiling::{
    GeoTransform, PartitionPayload, PipelineParams, PipelineProfile, ProcessingEngine, RasterKind,
    RasterTile, Result, TilingError,
};
use std::collections::BTreeSet;
use std::io::Cursor;
use std::time::Duration;

/// Elevation of the point at the centre of cell `(col, row)` of the
/// synthetic 4x4 m source; row 0 is the northern edge.
pub fn cell_z(col: usize, row: usize) -> f64 {
    10.0 + col as f64 + 4.0 * row as f64
}

/// Uncompressed LAS holding one point per square metre cell of a
/// 4x4 m extent, plus two low corner points pinning the header bounds
/// to exactly (0, 0)..(4, 4).
pub fn grid_source() -> Reader {
    let mut points = vec![(0.0, 0.0, 0.0), (4.0, 4.0, 0.0)];
    for row in 0..4 {
        for col in 0..4 {
            let x = col as f64 + 0.5;
            let y = 4.0 - row as f64 - 0.5;
            points.push((x, y, cell_z(col, row)));
        }
    }
    payload_reader(las_bytes(&points)).unwrap()
}

pub fn las_bytes(points: &[(f64, f64, f64)]) -> Vec<u8> {
    let mut builder = Builder::from((1, 4));
    builder.transforms.x.scale = 0.001;
    builder.transforms.y.scale = 0.001;
    builder.transforms.z.scale = 0.001;
    let header = builder.into_header().unwrap();
    let mut writer = Writer::new(Cursor::new(Vec::new()), header).unwrap();
    for &(x, y, z) in points {
        writer
            .write_point(Point {
                x,
                y,
                z,
                return_number: 1,
                number_of_returns: 1,
                ..Default::default()
            })
            .unwrap();
    }
    writer.into_inner().unwrap().into_inner()
}

/// Rasterises the highest point per cell on a grid anchored at the
/// partition's north-west corner. Surface tiles are offset by one metre so
/// the two kinds can be told apart.
#[derive(Default)]
pub struct GridEngine {
    /// Partitions that report a processing failure.
    pub failing: BTreeSet<usize>,
    /// Partitions that take `delay` before producing tiles.
    pub slow: BTreeSet<usize>,
    pub delay: Duration,
}

impl GridEngine {
    pub fn failing(indices: &[usize]) -> Self {
        Self {
            failing: indices.iter().copied().collect(),
            ..Default::default()
        }
    }

    pub fn slow(indices: &[usize], delay: Duration) -> Self {
        Self {
            slow: indices.iter().copied().collect(),
            delay,
            ..Default::default()
        }
    }
}

impl ProcessingEngine for GridEngine {
    fn process(
        &self,
        payload: PartitionPayload,
        profile: PipelineProfile,
        params: &PipelineParams,
    ) -> Result<Vec<RasterTile>> {
        let index = payload.partition_index();
        if self.failing.contains(&index) {
            return Err(TilingError::Processing {
                source_id: payload.source_id.clone(),
                partition_index: index,
                message: "engine exited with status 1".to_string(),
            });
        }

        if self.slow.contains(&index) {
            std::thread::sleep(self.delay);
        }

        let bounds = payload.partition.bounds;
        let res = params.resolution;
        let width = ((bounds.width() / res).ceil() as usize).max(1);
        let height = ((bounds.height() / res).ceil() as usize).max(1);
        let mut grid = vec![params.nodata as f32; width * height];

        let mut reader = payload_reader(payload.bytes).unwrap();
        for point in reader.points() {
            let point = point.unwrap();
            let col = (((point.x - bounds.x_min) / res).floor() as usize).min(width - 1);
            let row = (((bounds.y_max - point.y) / res).floor() as usize).min(height - 1);
            let cell = &mut grid[row * width + col];
            if *cell == params.nodata as f32 || point.z as f32 > *cell {
                *cell = point.z as f32;
            }
        }

        Ok(profile
            .output_kinds()
            .iter()
            .map(|&kind| {
                let offset = if kind == RasterKind::Surface { 1.0 } else { 0.0 };
                RasterTile {
                    source_id: payload.source_id.clone(),
                    partition_index: index,
                    kind,
                    width,
                    height,
                    pixels: grid
                        .iter()
                        .map(|&v| if v == params.nodata as f32 { v } else { v + offset })
                        .collect(),
                    transform: GeoTransform::north_up(bounds.x_min, bounds.y_max, res, res),
                    nodata: params.nodata,
                    crs: params.spatial_reference.clone(),
                }
            })
            .collect())
    }
}
