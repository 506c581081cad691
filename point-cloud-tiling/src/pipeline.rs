/// Declarative processing pipelines submitted to the external engine.
use crate::raster::RasterKind;
use constants::class::{FIRST_RETURN, GROUND_CLASSIFICATION, NOISE_CLASSIFICATION};
use constants::pipeline::{
    DEFAULT_SPATIAL_REFERENCE, OUTLIER_MIN_K, OUTLIER_RADIUS, SMRF_SCALAR, SMRF_SLOPE,
    SMRF_THRESHOLD, SMRF_WINDOW,
};
use constants::raster::{DEFAULT_NODATA, DEFAULT_RESOLUTION};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::Path;

/// Which elevation models a run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineProfile {
    /// Ground classification and terrain rasterisation only.
    #[default]
    Terrain,
    /// Terrain plus a first-return surface model.
    TerrainAndSurface,
}

impl PipelineProfile {
    /// Raster kinds produced, in execution order.
    pub fn output_kinds(&self) -> &'static [RasterKind] {
        match self {
            PipelineProfile::Terrain => &[RasterKind::Terrain],
            PipelineProfile::TerrainAndSurface => &[RasterKind::Surface, RasterKind::Terrain],
        }
    }
}

/// Stage parameters shared by every descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineParams {
    pub spatial_reference: String,
    pub resolution: f64,
    pub nodata: f64,
    pub outlier_radius: f64,
    pub outlier_min_k: u32,
    pub smrf_slope: f64,
    pub smrf_window: f64,
    pub smrf_threshold: f64,
    pub smrf_scalar: f64,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            spatial_reference: DEFAULT_SPATIAL_REFERENCE.to_string(),
            resolution: DEFAULT_RESOLUTION,
            nodata: DEFAULT_NODATA,
            outlier_radius: OUTLIER_RADIUS,
            outlier_min_k: OUTLIER_MIN_K,
            smrf_slope: SMRF_SLOPE,
            smrf_window: SMRF_WINDOW,
            smrf_threshold: SMRF_THRESHOLD,
            smrf_scalar: SMRF_SCALAR,
        }
    }
}

fn reader_stages(input: &Path, params: &PipelineParams) -> Vec<Value> {
    vec![
        json!({
            "type": "readers.las",
            "filename": input.to_string_lossy(),
            "spatialreference": params.spatial_reference,
        }),
        json!({
            "type": "filters.reprojection",
            "in_srs": params.spatial_reference,
            "out_srs": params.spatial_reference,
        }),
    ]
}

fn outlier_stage(params: &PipelineParams) -> Value {
    json!({
        "type": "filters.outlier",
        "method": "radius",
        "radius": params.outlier_radius,
        "min_k": params.outlier_min_k,
    })
}

fn writer_stage(output: &Path, params: &PipelineParams) -> Value {
    json!({
        "type": "writers.gdal",
        "gdaldriver": "GTiff",
        "nodata": params.nodata.to_string(),
        "output_type": "max",
        "resolution": params.resolution,
        "data_type": "float32",
        "filename": output.to_string_lossy(),
    })
}

/// Build the pipeline document rasterising `input` into `output` for one raster kind.
pub fn descriptor(kind: RasterKind, input: &Path, output: &Path, params: &PipelineParams) -> Value {
    let mut stages = reader_stages(input, params);

    match kind {
        RasterKind::Terrain => {
            stages.push(json!({
                "type": "filters.assign",
                "assignment": "Classification[:]=0",
            }));
            stages.push(json!({ "type": "filters.elm" }));
            stages.push(outlier_stage(params));
            stages.push(json!({
                "type": "filters.smrf",
                "ignore": format!("Classification[{0}:{0}]", NOISE_CLASSIFICATION),
                "slope": params.smrf_slope,
                "window": params.smrf_window,
                "threshold": params.smrf_threshold,
                "scalar": params.smrf_scalar,
            }));
            stages.push(json!({
                "type": "filters.range",
                "limits": format!("Classification[{0}:{0}]", GROUND_CLASSIFICATION),
            }));
        }
        RasterKind::Surface => {
            stages.push(outlier_stage(params));
            stages.push(json!({
                "type": "filters.range",
                "limits": format!("Classification![{0}:{0}]", NOISE_CLASSIFICATION),
            }));
            stages.push(json!({
                "type": "filters.range",
                "limits": format!("returnnumber[{0}:{0}]", FIRST_RETURN),
            }));
        }
    }

    stages.push(writer_stage(output, params));
    json!({ "pipeline": stages })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage_types(doc: &Value) -> Vec<String> {
        doc["pipeline"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["type"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn terrain_descriptor_filters_ground() {
        let doc = descriptor(
            RasterKind::Terrain,
            Path::new("/tmp/p0.laz"),
            Path::new("/tmp/p0_dtm.tif"),
            &PipelineParams::default(),
        );

        assert_eq!(
            stage_types(&doc),
            vec![
                "readers.las",
                "filters.reprojection",
                "filters.assign",
                "filters.elm",
                "filters.outlier",
                "filters.smrf",
                "filters.range",
                "writers.gdal",
            ]
        );
        let stages = doc["pipeline"].as_array().unwrap();
        assert_eq!(stages[0]["spatialreference"], "EPSG:25830");
        assert_eq!(stages[5]["window"], 16.0);
        assert_eq!(stages[6]["limits"], "Classification[2:2]");
        assert_eq!(stages[7]["nodata"], "-9999");
        assert_eq!(stages[7]["filename"], "/tmp/p0_dtm.tif");
    }

    #[test]
    fn surface_descriptor_keeps_first_returns() {
        let doc = descriptor(
            RasterKind::Surface,
            Path::new("in.laz"),
            Path::new("out.tif"),
            &PipelineParams::default(),
        );

        let stages = doc["pipeline"].as_array().unwrap();
        assert_eq!(stages.len(), 6);
        assert_eq!(stages[3]["limits"], "Classification![7:7]");
        assert_eq!(stages[4]["limits"], "returnnumber[1:1]");
    }

    #[test]
    fn profiles_declare_their_outputs() {
        assert_eq!(PipelineProfile::Terrain.output_kinds(), &[RasterKind::Terrain]);
        assert_eq!(
            PipelineProfile::TerrainAndSurface.output_kinds(),
            &[RasterKind::Surface, RasterKind::Terrain]
        );
    }
}
