use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::constants::{FIFO_SIZE_OFFSET, WORD_SIZE};
use super::error::{RawFileError, TransportError};
use super::fifo::Transport;
use super::readout::RawChunk;

/// Where one recorded chunk lives in the raw word stream
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub index_start: u64,
    pub index_stop: u64,
    pub timestamp: f64,
    pub error_flag: bool,
}

/// Path of the chunk table belonging to a raw data file
pub fn chunk_table_path(raw_path: &Path) -> PathBuf {
    raw_path.with_extension("chunks.yml")
}

/// Records raw chunks to disk.
///
/// Words are appended as big-endian u32, the same byte order the FIFO delivers, so a recorded
/// file can be replayed through [`FileTransport`]. The chunk table is written next to the data
/// when the writer is closed.
#[derive(Debug)]
pub struct RawDataWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    table: Vec<ChunkMeta>,
    n_words: u64,
}

impl RawDataWriter {
    pub fn create(path: &Path) -> Result<Self, RawFileError> {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
                return Err(RawFileError::BadFilePath(parent.to_path_buf()))
            }
            _ => (),
        }
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
            path: path.to_path_buf(),
            table: Vec::new(),
            n_words: 0,
        })
    }

    pub fn write_chunk(&mut self, chunk: &RawChunk) -> Result<(), RawFileError> {
        for word in chunk.words.iter() {
            self.writer.write_u32::<BigEndian>(*word)?;
        }
        let index_start = self.n_words;
        self.n_words += chunk.words.len() as u64;
        self.table.push(ChunkMeta {
            index_start,
            index_stop: self.n_words,
            timestamp: chunk.timestamp,
            error_flag: chunk.error_flag,
        });
        Ok(())
    }

    pub fn n_words(&self) -> u64 {
        self.n_words
    }

    pub fn n_chunks(&self) -> usize {
        self.table.len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush the data and write the chunk table. Returns the path of the raw data file.
    pub fn close(mut self) -> Result<PathBuf, RawFileError> {
        self.writer.flush()?;
        let yaml_str = serde_yaml::to_string(&self.table)?;
        std::fs::write(chunk_table_path(&self.path), yaml_str)?;
        spdlog::info!(
            "Closed raw data file {:?}: {} chunks, {}",
            self.path,
            self.table.len(),
            human_bytes::human_bytes((self.n_words as usize * WORD_SIZE) as f64)
        );
        Ok(self.path)
    }
}

/// The words of a raw data file. Bytes after the last whole word are counted, not decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawWords {
    pub words: Vec<u32>,
    pub trailing_bytes: usize,
}

impl RawWords {
    pub fn is_truncated(&self) -> bool {
        self.trailing_bytes != 0
    }
}

pub fn read_raw_words(path: &Path) -> Result<RawWords, RawFileError> {
    if !path.exists() {
        return Err(RawFileError::BadFilePath(path.to_path_buf()));
    }
    let bytes = std::fs::read(path)?;
    let chunks = bytes.chunks_exact(WORD_SIZE);
    let trailing_bytes = chunks.remainder().len();
    let words = chunks.map(BigEndian::read_u32).collect();
    Ok(RawWords {
        words,
        trailing_bytes,
    })
}

pub fn read_chunk_table(raw_path: &Path) -> Result<Vec<ChunkMeta>, RawFileError> {
    let table_path = chunk_table_path(raw_path);
    if !table_path.exists() {
        return Err(RawFileError::BadFilePath(table_path));
    }
    let yaml_str = std::fs::read_to_string(&table_path)?;
    Ok(serde_yaml::from_str(&yaml_str)?)
}

/// Serves a recorded raw data file the way the readout board serves its FIFO.
///
/// Reading the occupancy register reports what is left of the file (capped at
/// `max_transfer_bytes`, as a real FIFO only holds so much), bulk reads consume it.
/// All other registers are plain storage.
#[derive(Debug)]
pub struct FileTransport {
    bytes: Vec<u8>,
    position: usize,
    fifo_base_address: u32,
    max_transfer_bytes: usize,
    registers: FxHashMap<u32, u32>,
    closed: bool,
}

impl FileTransport {
    pub fn open(path: &Path, fifo_base_address: u32) -> Result<Self, RawFileError> {
        if !path.exists() {
            return Err(RawFileError::BadFilePath(path.to_path_buf()));
        }
        Ok(Self::from_bytes(std::fs::read(path)?, fifo_base_address))
    }

    pub fn from_words(words: &[u32], fifo_base_address: u32) -> Self {
        let mut bytes = vec![0; words.len() * WORD_SIZE];
        BigEndian::write_u32_into(words, &mut bytes);
        Self::from_bytes(bytes, fifo_base_address)
    }

    fn from_bytes(bytes: Vec<u8>, fifo_base_address: u32) -> Self {
        Self {
            max_transfer_bytes: bytes.len().max(WORD_SIZE),
            bytes,
            position: 0,
            fifo_base_address,
            registers: FxHashMap::default(),
            closed: false,
        }
    }

    /// Limit how much a single poll can return, rounded down to whole words
    pub fn with_max_transfer(mut self, n_bytes: usize) -> Self {
        self.max_transfer_bytes = (n_bytes - n_bytes % WORD_SIZE).max(WORD_SIZE);
        self
    }

    pub fn total_bytes(&self) -> usize {
        self.bytes.len()
    }

    pub fn remaining_bytes(&self) -> usize {
        self.bytes.len() - self.position
    }

    /// True once no whole word is left to serve
    pub fn is_drained(&self) -> bool {
        self.remaining_bytes() < WORD_SIZE
    }

    pub fn close(&mut self) {
        self.closed = true;
    }
}

impl Transport for FileTransport {
    fn read_register(&mut self, address: u32) -> Result<u32, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if address == self.fifo_base_address + FIFO_SIZE_OFFSET {
            let available = self.remaining_bytes().min(self.max_transfer_bytes);
            return Ok((available / 2) as u32);
        }
        Ok(self.registers.get(&address).copied().unwrap_or_default())
    }

    fn write_register(&mut self, address: u32, value: u32) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.registers.insert(address, value);
        Ok(())
    }

    fn read_bulk(&mut self, n_bytes: usize) -> Result<Vec<u8>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let stop = (self.position + n_bytes).min(self.bytes.len());
        let data = self.bytes[self.position..stop].to_vec();
        self.position = stop;
        Ok(data)
    }
}
