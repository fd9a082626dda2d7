use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::constants::TELESCOPE_HIT_RECORD_SIZE;
use super::error::SinkError;
use super::telescope::TelescopeHit;

/// Destination of telescope hit batches
pub trait HitSink {
    fn write_batch(&mut self, hits: &[TelescopeHit]) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// In-memory sink, mostly for tests and small tools
impl HitSink for Vec<TelescopeHit> {
    fn write_batch(&mut self, hits: &[TelescopeHit]) -> Result<(), SinkError> {
        self.extend_from_slice(hits);
        Ok(())
    }
}

/// Append-mode binary hit file.
///
/// Each hit is a fixed 11 byte little-endian record: plane (u8), frame (u32),
/// x (u16), y (u16), tlu (u16). Opening an existing file appends to it.
#[derive(Debug)]
pub struct BinaryHitSink {
    writer: BufWriter<File>,
    path: PathBuf,
    n_written: u64,
}

impl BinaryHitSink {
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            n_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of hits written through this handle
    pub fn n_written(&self) -> u64 {
        self.n_written
    }

    /// Number of bytes written through this handle
    pub fn n_bytes(&self) -> u64 {
        self.n_written * TELESCOPE_HIT_RECORD_SIZE as u64
    }
}

impl HitSink for BinaryHitSink {
    fn write_batch(&mut self, hits: &[TelescopeHit]) -> Result<(), SinkError> {
        for hit in hits {
            self.writer.write_u8(hit.plane)?;
            self.writer.write_u32::<LittleEndian>(hit.frame)?;
            self.writer.write_u16::<LittleEndian>(hit.x)?;
            self.writer.write_u16::<LittleEndian>(hit.y)?;
            self.writer.write_u16::<LittleEndian>(hit.tlu)?;
        }
        self.n_written += hits.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Read back a binary hit file. A trailing partial record is ignored.
pub fn read_hit_file(path: &Path) -> Result<Vec<TelescopeHit>, SinkError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hits = Vec::new();
    loop {
        let plane = match reader.read_u8() {
            Ok(plane) => plane,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        match read_record_body(&mut reader, plane) {
            Ok(hit) => hits.push(hit),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                spdlog::warn!("Hit file {path:?} ends with a partial record");
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(hits)
}

fn read_record_body<R: ReadBytesExt>(reader: &mut R, plane: u8) -> std::io::Result<TelescopeHit> {
    Ok(TelescopeHit {
        plane,
        frame: reader.read_u32::<LittleEndian>()?,
        x: reader.read_u16::<LittleEndian>()?,
        y: reader.read_u16::<LittleEndian>()?,
        tlu: reader.read_u16::<LittleEndian>()?,
    })
}
