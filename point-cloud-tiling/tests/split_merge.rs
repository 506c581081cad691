mod common;

use common::{GridEngine, cell_z, grid_source};
use std::time::Duration;
use point_cloud_tiling::converter::write_outputs;
use point_cloud_tiling::geotiff::decode;
use point_cloud_tiling::laz::header_bounds;
use point_cloud_tiling::manifest::PartitionStatus;
use point_cloud_tiling::{
    BoundingBox, GeoTransform, PipelineProfile, PointCloudConverter, RasterKind, SourceId,
    TilingConfig, TilingError,
};

fn config(profile: PipelineProfile) -> TilingConfig {
    let mut config = TilingConfig::default();
    config.pipeline.profile = profile;
    config.execution.max_parallel = Some(2);
    config
}

fn converter(
    engine: GridEngine,
    profile: PipelineProfile,
) -> PointCloudConverter<'static, GridEngine> {
    PointCloudConverter::new(config(profile), engine).unwrap()
}

fn assert_close(actual: f32, expected: f64) {
    assert!(
        (actual as f64 - expected).abs() < 1e-3,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn four_partitions_merge_without_seams() {
    let converter = converter(GridEngine::default(), PipelineProfile::Terrain);
    let mut source = grid_source();
    let bounds = header_bounds(source.header());
    assert_eq!(bounds, BoundingBox::new(0.0, 0.0, 4.0, 4.0).unwrap());

    let outcome = converter
        .run_source(SourceId::new("grid.laz"), &mut source, bounds)
        .unwrap();

    assert_eq!(outcome.mosaics.len(), 1);
    let (kind, mosaic) = &outcome.mosaics[0];
    assert_eq!(*kind, RasterKind::Terrain);
    let mosaic = mosaic.as_ref().unwrap();

    assert_eq!((mosaic.width(), mosaic.height()), (4, 4));
    assert_eq!(mosaic.footprint(), bounds);
    assert_eq!(mosaic.transform, GeoTransform::north_up(0.0, 4.0, 1.0, 1.0));
    assert_eq!(mosaic.metadata.tile_count, 4);
    assert_eq!(mosaic.metadata.block_size, Some(256));
    assert_eq!(mosaic.metadata.crs, "EPSG:25830");
    for row in 0..4 {
        for col in 0..4 {
            assert_close(mosaic.pixel(col, row).unwrap(), cell_z(col, row));
        }
    }

    let routing = &outcome.manifest.routing;
    assert_eq!(routing.points_read, 18);
    assert_eq!(routing.points_written, 18);
    assert_eq!(routing.unmatched_points, 0);
    assert!(outcome.manifest.is_complete());
    assert!(
        outcome
            .manifest
            .partitions
            .iter()
            .all(|p| p.status == PartitionStatus::Processed)
    );
}

#[test]
fn failed_partition_blocks_merge_but_others_run() {
    let converter = converter(GridEngine::failing(&[2]), PipelineProfile::Terrain);
    let mut source = grid_source();
    let bounds = header_bounds(source.header());

    let outcome = converter
        .run_source(SourceId::new("grid.laz"), &mut source, bounds)
        .unwrap();

    let statuses: Vec<PartitionStatus> = outcome
        .manifest
        .partitions
        .iter()
        .map(|p| p.status.clone())
        .collect();
    assert_eq!(
        statuses,
        vec![
            PartitionStatus::Processed,
            PartitionStatus::Processed,
            PartitionStatus::Failed,
            PartitionStatus::Processed,
        ]
    );

    match &outcome.mosaics[0].1 {
        Err(TilingError::MergeBlocked { failed, .. }) => assert_eq!(failed, &vec![2]),
        other => panic!("expected a blocked merge, got {other:?}"),
    }
    assert_eq!(outcome.completed().count(), 0);
    assert!(!outcome.manifest.is_complete());
    assert_eq!(outcome.manifest.failed_partitions(), vec![2]);
}

#[test]
fn merge_deadline_stops_waiting_for_slow_partition() {
    let mut config = config(PipelineProfile::Terrain);
    config.merge.timeout_secs = Some(0.3);
    let engine = GridEngine::slow(&[3], Duration::from_secs(3));
    let converter = PointCloudConverter::new(config, engine).unwrap();
    let mut source = grid_source();
    let bounds = header_bounds(source.header());

    let outcome = converter
        .run_source(SourceId::new("grid.laz"), &mut source, bounds)
        .unwrap();

    match &outcome.mosaics[0].1 {
        Err(TilingError::MergeBlocked {
            failed, missing, ..
        }) => {
            assert!(failed.is_empty(), "{failed:?}");
            assert_eq!(missing, &vec![3]);
        }
        other => panic!("expected a blocked merge, got {other:?}"),
    }

    let late = &outcome.manifest.partitions[3];
    assert_eq!(late.index, 3);
    assert_eq!(late.status, PartitionStatus::Failed);
    assert!(
        late.error
            .as_deref()
            .unwrap()
            .contains("missed the merge deadline")
    );
    assert_eq!(outcome.manifest.failed_partitions(), vec![3]);
}

#[test]
fn slow_partition_within_deadline_still_merges() {
    let mut config = config(PipelineProfile::Terrain);
    config.merge.timeout_secs = Some(30.0);
    let engine = GridEngine::slow(&[3], Duration::from_millis(200));
    let converter = PointCloudConverter::new(config, engine).unwrap();
    let mut source = grid_source();
    let bounds = header_bounds(source.header());

    let outcome = converter
        .run_source(SourceId::new("grid.laz"), &mut source, bounds)
        .unwrap();

    assert_eq!(outcome.completed().count(), 1);
    assert!(outcome.manifest.is_complete());
}

#[test]
fn terrain_and_surface_produce_two_mosaics() {
    let converter = converter(GridEngine::default(), PipelineProfile::TerrainAndSurface);
    let mut source = grid_source();
    let bounds = header_bounds(source.header());

    let outcome = converter
        .run_source(SourceId::new("grid.laz"), &mut source, bounds)
        .unwrap();

    let kinds: Vec<RasterKind> = outcome.mosaics.iter().map(|(k, _)| *k).collect();
    assert_eq!(kinds, vec![RasterKind::Surface, RasterKind::Terrain]);

    let surface = outcome.mosaics[0].1.as_ref().unwrap();
    let terrain = outcome.mosaics[1].1.as_ref().unwrap();
    assert_eq!(surface.footprint(), terrain.footprint());
    assert_eq!(surface.metadata.block_size, None);
    assert_close(surface.pixel(1, 2).unwrap(), cell_z(1, 2) + 1.0);
    assert_close(terrain.pixel(1, 2).unwrap(), cell_z(1, 2));
}

#[test]
fn outputs_and_manifest_are_written() {
    let converter = converter(GridEngine::default(), PipelineProfile::TerrainAndSurface);
    let mut source = grid_source();
    let bounds = header_bounds(source.header());
    let mut outcome = converter
        .run_source(SourceId::new("grid.laz"), &mut source, bounds)
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let written = write_outputs(&mut outcome, dir.path(), "grid").unwrap();

    assert_eq!(
        written,
        vec![
            dir.path().join("grid_dsm.tif"),
            dir.path().join("grid_dtm.tif"),
            dir.path().join("grid_manifest.json"),
        ]
    );

    let dtm = decode(&std::fs::read(dir.path().join("grid_dtm.tif")).unwrap()).unwrap();
    assert_eq!((dtm.width, dtm.height), (4, 4));
    assert_eq!(dtm.transform, GeoTransform::north_up(0.0, 4.0, 1.0, 1.0));
    assert_eq!(dtm.nodata, Some(-9999.0));
    assert_eq!(dtm.crs.as_deref(), Some("EPSG:25830"));
    assert_close(dtm.pixels[0], cell_z(0, 0));

    let manifest: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("grid_manifest.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(manifest["source"], "grid.laz");
    assert_eq!(manifest["partitions"].as_array().unwrap().len(), 4);
    assert_eq!(manifest["mosaics"][1]["kind"], "terrain");
    assert!(
        manifest["mosaics"][1]["file"]
            .as_str()
            .unwrap()
            .ends_with("grid_dtm.tif")
    );
}

#[test]
fn degenerate_extent_is_rejected() {
    let converter = converter(GridEngine::default(), PipelineProfile::Terrain);
    let mut source = grid_source();
    let bounds = BoundingBox {
        x_min: 5.0,
        y_min: 0.0,
        x_max: 1.0,
        y_max: 4.0,
    };

    let err = converter
        .run_source(SourceId::new("grid.laz"), &mut source, bounds)
        .unwrap_err();
    assert!(matches!(err, TilingError::InvalidArgument(_)));
}
