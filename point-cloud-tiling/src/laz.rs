use crate::bounds::BoundingBox;
use crate::error::{Result, TilingError};
use crate::payload::{Partition, SourceId};
use las::{Builder, Header, Point, Reader, Vlr, Writer};
use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::Path;

/// Incremental point cloud reader consumed by the router.
pub trait PointSource {
    fn header(&self) -> &Header;

    /// Point count declared by the source header.
    fn total_points(&self) -> u64 {
        self.header().number_of_points()
    }

    /// Replace `points` with up to `max` further points. Returns how many were read;
    /// zero means the stream is exhausted.
    fn read_chunk(&mut self, max: u64, points: &mut Vec<Point>) -> las::Result<u64>;
}

impl PointSource for Reader {
    fn header(&self) -> &Header {
        Reader::header(self)
    }

    fn read_chunk(&mut self, max: u64, points: &mut Vec<Point>) -> las::Result<u64> {
        points.clear();
        self.read_points_into(max, points)
    }
}

/// Create LAS file reader for point cloud access.
/// Handles both .las and .laz compressed formats.
pub fn create_reader(file_path: &Path) -> Result<Reader> {
    let source_id = SourceId::from_path(file_path);
    let file = File::open(file_path)?;
    let buf_reader = BufReader::new(file);
    Reader::new(buf_reader).map_err(|e| TilingError::source_read(&source_id, e))
}

/// Reader over an in-memory payload.
pub fn payload_reader(bytes: Vec<u8>) -> las::Result<Reader> {
    Reader::new(Cursor::new(bytes))
}

/// Planar extent recorded in a LAS header.
pub fn header_bounds(header: &Header) -> BoundingBox {
    let bounds = header.bounds();
    BoundingBox {
        x_min: bounds.min.x,
        y_min: bounds.min.y,
        x_max: bounds.max.x,
        y_max: bounds.max.y,
    }
}

const LASZIP_USER_ID: &str = "laszip encoded";
const LASZIP_RECORD_ID: u16 = 22204;

/// True for the LASzip record describing how a file's points are compressed.
pub fn is_laszip_vlr(vlr: &Vlr) -> bool {
    vlr.user_id == LASZIP_USER_ID && vlr.record_id == LASZIP_RECORD_ID
}

/// Header for partition payloads: the source header with compression toggled.
/// Scale, offset and point format carry over so point records are written unchanged.
/// The source's LASzip record is dropped; the payload writer adds its own when compressing.
pub fn payload_header(source: &Header, compress: bool) -> las::Result<Header> {
    let mut builder = Builder::from(source.clone());
    builder.point_format.is_compressed = compress;
    builder.vlrs.retain(|vlr| !is_laszip_vlr(vlr));
    builder.into_header()
}

/// Growing in-memory payload for one partition.
///
/// Dropping an unsealed writer releases it; `las` closes the stream on drop.
pub struct PartitionWriter {
    partition: Partition,
    writer: Writer<Cursor<Vec<u8>>>,
    point_count: u64,
}

impl PartitionWriter {
    pub fn new(partition: Partition, header: Header) -> las::Result<Self> {
        let writer = Writer::new(Cursor::new(Vec::new()), header)?;
        Ok(Self {
            partition,
            writer,
            point_count: 0,
        })
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn point_count(&self) -> u64 {
        self.point_count
    }

    pub fn write(&mut self, point: Point) -> las::Result<()> {
        self.writer.write_point(point)?;
        self.point_count += 1;
        Ok(())
    }

    /// Finalise the header and hand back the encoded bytes.
    pub fn seal(self) -> las::Result<(Partition, u64, Vec<u8>)> {
        let cursor = self.writer.into_inner()?;
        Ok((self.partition, self.point_count, cursor.into_inner()))
    }
}
