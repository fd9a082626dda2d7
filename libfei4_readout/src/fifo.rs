use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

use super::constants::{
    FIFO_SIZE_OFFSET, TDC_WORD_KIND, TRIGGER_WORD_FLAG, WORD_KIND_MASK, WORD_SIZE,
};
use super::error::TransportError;

/// The vendor bulk-transfer endpoint of the readout board.
///
/// Implementations talk to the firmware (or emulate it); the readout code only ever
/// sees register values and opaque byte buffers.
pub trait Transport: Send {
    fn read_register(&mut self, address: u32) -> Result<u32, TransportError>;
    fn write_register(&mut self, address: u32, value: u32) -> Result<(), TransportError>;
    fn read_bulk(&mut self, n_bytes: usize) -> Result<Vec<u8>, TransportError>;
}

/// Which words survive a FIFO read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WordFilter {
    #[default]
    All,
    /// Only front-end (structural) words; trigger and TDC words are dropped
    FrontEnd,
    /// Only trigger words
    Trigger,
}

impl WordFilter {
    pub fn accepts(&self, word: u32) -> bool {
        match self {
            Self::All => true,
            Self::FrontEnd => {
                word & TRIGGER_WORD_FLAG == 0 && word & WORD_KIND_MASK != TDC_WORD_KIND
            }
            Self::Trigger => word & TRIGGER_WORD_FLAG != 0,
        }
    }
}

/// Lazily unpacked words from a single bulk transfer
#[derive(Debug, Clone, Default)]
pub struct FifoWords {
    bytes: Vec<u8>,
    position: usize,
    filter: WordFilter,
}

impl FifoWords {
    pub fn new(bytes: Vec<u8>, filter: WordFilter) -> Self {
        Self {
            bytes,
            position: 0,
            filter,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of raw bytes carried by the transfer, before filtering
    pub fn n_bytes(&self) -> usize {
        self.bytes.len()
    }
}

impl Iterator for FifoWords {
    type Item = u32;

    fn next(&mut self) -> Option<Self::Item> {
        while self.position + WORD_SIZE <= self.bytes.len() {
            let word = BigEndian::read_u32(&self.bytes[self.position..self.position + WORD_SIZE]);
            self.position += WORD_SIZE;
            if self.filter.accepts(word) {
                return Some(word);
            }
        }
        None
    }
}

/// Anything the ReadoutWorker can poll for raw words
pub trait FifoSource: Send + 'static {
    fn read_once(&mut self) -> Result<FifoWords, TransportError>;
}

/// The SRAM FIFO of the readout board, read through a [`Transport`].
#[derive(Debug)]
pub struct HardwareFifoSource<T: Transport> {
    transport: T,
    base_address: u32,
    filter: WordFilter,
}

impl<T: Transport> HardwareFifoSource<T> {
    pub fn new(transport: T, base_address: u32, filter: WordFilter) -> Self {
        Self {
            transport,
            base_address,
            filter,
        }
    }

    /// FIFO occupancy in 16 bit units, truncated to whole 32 bit words
    pub fn fifo_size(&mut self) -> Result<usize, TransportError> {
        let occupancy = self
            .transport
            .read_register(self.base_address + FIFO_SIZE_OFFSET)?;
        Ok((occupancy - occupancy % 2) as usize)
    }

    /// Access the transport for other register traffic. Callers must hold the same
    /// device lock as the ReadoutWorker.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

impl<T: Transport + 'static> FifoSource for HardwareFifoSource<T> {
    fn read_once(&mut self) -> Result<FifoWords, TransportError> {
        let size = self.fifo_size()?;
        if size == 0 {
            return Ok(FifoWords::empty());
        }
        let n_bytes = size * 2;
        let bytes = self.transport.read_bulk(n_bytes)?;
        if bytes.len() != n_bytes {
            return Err(TransportError::ShortRead {
                expected: n_bytes,
                got: bytes.len(),
            });
        }
        Ok(FifoWords::new(bytes, self.filter))
    }
}
