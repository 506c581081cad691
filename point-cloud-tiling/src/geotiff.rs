/// Single band f32 GeoTIFF codec for raster payloads.
///
/// Only the georeferencing tags the merge needs are interpreted: pixel scale,
/// tiepoint (or a full model transformation), the EPSG code from the GeoKey
/// directory and the GDAL nodata string.
use crate::error::{Result, TilingError};
use crate::payload::SourceId;
use crate::raster::{GeoTransform, MosaicRaster, RasterKind, RasterTile};
use std::io::Cursor;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{TiffEncoder, colortype};
use tiff::tags::Tag;

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

const GT_MODEL_TYPE_KEY: u16 = 1024;
const GT_RASTER_TYPE_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;
const RASTER_PIXEL_IS_POINT: u16 = 2;

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// Decoded grid with its georeferencing.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRaster {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<f32>,
    pub transform: GeoTransform,
    pub nodata: Option<f64>,
    pub crs: Option<String>,
    pub rows_per_strip: Option<u32>,
}

/// Decode a raster payload produced by the processing engine into a tile.
pub fn decode_tile(
    bytes: &[u8],
    source_id: &SourceId,
    partition_index: usize,
    kind: RasterKind,
    default_nodata: f64,
) -> Result<RasterTile> {
    let raster = decode(bytes)?;
    Ok(RasterTile {
        source_id: source_id.clone(),
        partition_index,
        kind,
        width: raster.width,
        height: raster.height,
        pixels: raster.pixels,
        transform: raster.transform,
        nodata: raster.nodata.unwrap_or(default_nodata),
        crs: raster.crs.unwrap_or_default(),
    })
}

pub fn decode(bytes: &[u8]) -> Result<DecodedRaster> {
    let mut decoder = Decoder::new(Cursor::new(bytes))?.with_limits(Limits::unlimited());
    let (width, height) = decoder.dimensions()?;

    let transform = read_transform(&mut decoder)?;
    let nodata = match decoder.find_tag(tag(GDAL_NODATA))? {
        Some(value) => {
            let text = value.into_string()?;
            let text = text.trim_end_matches('\0').trim();
            Some(text.parse::<f64>().map_err(|e| {
                TilingError::RasterCodec(format!("invalid nodata value '{text}': {e}"))
            })?)
        }
        None => None,
    };
    let keys = decoder
        .find_tag(tag(GEO_KEY_DIRECTORY))?
        .map(|v| v.into_u16_vec())
        .transpose()?;
    let rows_per_strip = decoder
        .find_tag(Tag::RowsPerStrip)?
        .map(|v| v.into_u32())
        .transpose()?;

    let mut transform = transform;
    if let Some(keys) = &keys {
        if geo_key(keys, GT_RASTER_TYPE_KEY) == Some(RASTER_PIXEL_IS_POINT) {
            // Tiepoint refers to the pixel centre; shift to the corner.
            transform.origin_x -= transform.pixel_width / 2.0;
            transform.origin_y -= transform.pixel_height / 2.0;
        }
    }
    let crs = keys.as_deref().and_then(|keys| {
        geo_key(keys, PROJECTED_CS_TYPE_KEY)
            .or_else(|| geo_key(keys, GEOGRAPHIC_TYPE_KEY))
            .map(|code| format!("EPSG:{code}"))
    });

    let pixels = match decoder.read_image()? {
        DecodingResult::F32(data) => data,
        DecodingResult::F64(data) => data.iter().map(|&v| v as f32).collect(),
        DecodingResult::I16(data) => data.iter().map(|&v| v as f32).collect(),
        DecodingResult::U16(data) => data.iter().map(|&v| v as f32).collect(),
        DecodingResult::I32(data) => data.iter().map(|&v| v as f32).collect(),
        DecodingResult::U32(data) => data.iter().map(|&v| v as f32).collect(),
        DecodingResult::U8(data) => data.iter().map(|&v| v as f32).collect(),
        DecodingResult::I8(data) => data.iter().map(|&v| v as f32).collect(),
        _ => {
            return Err(TilingError::RasterCodec(
                "unsupported raster sample type".to_string(),
            ));
        }
    };

    let (width, height) = (width as usize, height as usize);
    if pixels.len() != width * height {
        return Err(TilingError::RasterCodec(format!(
            "expected a single band of {}x{} samples, found {}",
            width,
            height,
            pixels.len()
        )));
    }

    Ok(DecodedRaster {
        width,
        height,
        pixels,
        transform,
        nodata,
        crs,
        rows_per_strip,
    })
}

fn read_transform<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
) -> Result<GeoTransform> {
    let scale = decoder
        .find_tag(tag(MODEL_PIXEL_SCALE))?
        .map(|v| v.into_f64_vec())
        .transpose()?;
    let tiepoint = decoder
        .find_tag(tag(MODEL_TIEPOINT))?
        .map(|v| v.into_f64_vec())
        .transpose()?;

    if let (Some(scale), Some(tiepoint)) = (&scale, &tiepoint) {
        if scale.len() >= 2 && tiepoint.len() >= 6 {
            let (i, j, x, y) = (tiepoint[0], tiepoint[1], tiepoint[3], tiepoint[4]);
            return Ok(GeoTransform::north_up(
                x - i * scale[0],
                y + j * scale[1],
                scale[0],
                scale[1],
            ));
        }
    }

    if let Some(matrix) = decoder
        .find_tag(tag(MODEL_TRANSFORMATION))?
        .map(|v| v.into_f64_vec())
        .transpose()?
    {
        if matrix.len() >= 8 {
            return Ok(GeoTransform {
                origin_x: matrix[3],
                pixel_width: matrix[0],
                row_rotation: matrix[1],
                origin_y: matrix[7],
                col_rotation: matrix[4],
                pixel_height: matrix[5],
            });
        }
    }

    Err(TilingError::RasterCodec(
        "raster carries no georeferencing".to_string(),
    ))
}

fn geo_key(keys: &[u16], id: u16) -> Option<u16> {
    // Header is four shorts, then four shorts per key. Only inline values are read.
    keys.get(4..)?
        .chunks_exact(4)
        .find(|entry| entry[0] == id && entry[1] == 0)
        .map(|entry| entry[3])
}

fn epsg_code(crs: &str) -> Option<u16> {
    crs.trim()
        .strip_prefix("EPSG:")
        .or_else(|| crs.trim().strip_prefix("epsg:"))
        .and_then(|code| code.parse().ok())
}

fn geo_key_directory(crs: &str) -> Vec<u16> {
    let mut entries: Vec<[u16; 4]> = Vec::new();
    match epsg_code(crs) {
        Some(code) if (4000..5000).contains(&code) => {
            entries.push([GT_MODEL_TYPE_KEY, 0, 1, MODEL_TYPE_GEOGRAPHIC]);
            entries.push([GT_RASTER_TYPE_KEY, 0, 1, RASTER_PIXEL_IS_AREA]);
            entries.push([GEOGRAPHIC_TYPE_KEY, 0, 1, code]);
        }
        Some(code) => {
            entries.push([GT_MODEL_TYPE_KEY, 0, 1, MODEL_TYPE_PROJECTED]);
            entries.push([GT_RASTER_TYPE_KEY, 0, 1, RASTER_PIXEL_IS_AREA]);
            entries.push([PROJECTED_CS_TYPE_KEY, 0, 1, code]);
        }
        None => {
            if !crs.is_empty() {
                log::warn!("CRS '{}' is not an EPSG code, written without GeoKeys", crs);
            }
            entries.push([GT_RASTER_TYPE_KEY, 0, 1, RASTER_PIXEL_IS_AREA]);
        }
    }

    let mut keys = vec![1, 1, 0, entries.len() as u16];
    keys.extend(entries.into_iter().flatten());
    keys
}

/// Encode a grid with its georeferencing. `rows_per_strip` carries the block hint.
pub fn encode(
    width: usize,
    height: usize,
    pixels: &[f32],
    transform: &GeoTransform,
    nodata: f64,
    crs: &str,
    rows_per_strip: Option<u32>,
) -> Result<Vec<u8>> {
    if pixels.len() != width * height {
        return Err(TilingError::RasterCodec(format!(
            "{} samples do not fill a {}x{} grid",
            pixels.len(),
            width,
            height
        )));
    }

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut cursor)?;
        let mut image =
            encoder.new_image::<colortype::Gray32Float>(width as u32, height as u32)?;
        if let Some(rows) = rows_per_strip {
            image.rows_per_strip(rows)?;
        }

        let directory = image.encoder();
        if transform.is_north_up() {
            let (res_x, res_y) = transform.resolution();
            directory.write_tag(tag(MODEL_PIXEL_SCALE), &[res_x, res_y, 0.0][..])?;
            directory.write_tag(
                tag(MODEL_TIEPOINT),
                &[0.0, 0.0, 0.0, transform.origin_x, transform.origin_y, 0.0][..],
            )?;
        } else {
            let matrix = [
                transform.pixel_width,
                transform.row_rotation,
                0.0,
                transform.origin_x,
                transform.col_rotation,
                transform.pixel_height,
                0.0,
                transform.origin_y,
                0.0,
                0.0,
                0.0,
                0.0,
                0.0,
                0.0,
                0.0,
                1.0,
            ];
            directory.write_tag(tag(MODEL_TRANSFORMATION), &matrix[..])?;
        }
        directory.write_tag(tag(GEO_KEY_DIRECTORY), &geo_key_directory(crs)[..])?;
        directory.write_tag(tag(GDAL_NODATA), nodata.to_string().as_str())?;

        image.write_data(pixels)?;
    }
    Ok(cursor.into_inner())
}

pub fn encode_tile(tile: &RasterTile) -> Result<Vec<u8>> {
    encode(
        tile.width,
        tile.height,
        &tile.pixels,
        &tile.transform,
        tile.nodata,
        &tile.crs,
        None,
    )
}

pub fn encode_mosaic(mosaic: &MosaicRaster) -> Result<Vec<u8>> {
    encode(
        mosaic.metadata.width,
        mosaic.metadata.height,
        &mosaic.pixels,
        &mosaic.transform,
        mosaic.metadata.nodata,
        &mosaic.metadata.crs,
        mosaic.metadata.block_size,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn georeferencing_survives_encoding() {
        let transform = GeoTransform::north_up(432_000.0, 4_481_000.0, 1.0, 1.0);
        let pixels = vec![1.0, 2.0, -9999.0, 4.0, 5.0, 6.0];
        let bytes = encode(3, 2, &pixels, &transform, -9999.0, "EPSG:25830", None).unwrap();

        let raster = decode(&bytes).unwrap();
        assert_eq!((raster.width, raster.height), (3, 2));
        assert_eq!(raster.pixels, pixels);
        assert_eq!(raster.transform, transform);
        assert_eq!(raster.nodata, Some(-9999.0));
        assert_eq!(raster.crs.as_deref(), Some("EPSG:25830"));
    }

    #[test]
    fn engine_tile_decodes_with_partition_identity() {
        let tile = RasterTile {
            source_id: SourceId::new("a.laz"),
            partition_index: 3,
            kind: RasterKind::Surface,
            width: 2,
            height: 1,
            pixels: vec![7.5, -9999.0],
            transform: GeoTransform::north_up(10.0, 20.0, 0.5, 0.5),
            nodata: -9999.0,
            crs: "EPSG:25830".to_string(),
        };

        let bytes = encode_tile(&tile).unwrap();
        let decoded = decode_tile(&bytes, &tile.source_id, 3, RasterKind::Surface, 0.0).unwrap();
        assert_eq!(decoded, tile);
    }

    #[test]
    fn block_hint_is_stored_as_strip_height() {
        let transform = GeoTransform::north_up(0.0, 32.0, 1.0, 1.0);
        let pixels = vec![0.5; 32 * 32];
        let bytes = encode(32, 32, &pixels, &transform, -9999.0, "EPSG:4326", Some(16)).unwrap();

        let raster = decode(&bytes).unwrap();
        assert_eq!(raster.rows_per_strip, Some(16));
        assert_eq!(raster.crs.as_deref(), Some("EPSG:4326"));
    }

    #[test]
    fn garbage_is_a_codec_error() {
        let err = decode(b"definitely not a tiff").unwrap_err();
        assert!(matches!(err, TilingError::RasterCodec(_)));
    }

    #[test]
    fn sample_count_must_fill_grid() {
        let transform = GeoTransform::north_up(0.0, 1.0, 1.0, 1.0);
        assert!(encode(2, 2, &[1.0], &transform, -9999.0, "", None).is_err());
    }
}
