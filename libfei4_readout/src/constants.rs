// Readout board
/// Offset of the FIFO occupancy register from the FIFO base address
pub const FIFO_SIZE_OFFSET: u32 = 4;
/// Default base address of the SRAM FIFO on the readout board
pub const DEFAULT_FIFO_BASE_ADDRESS: u32 = 0x18100;
/// Bytes per FIFO word
pub const WORD_SIZE: usize = 4;
/// Default interval between FIFO polls in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;
/// Largest transfer a replayed FIFO serves per poll
pub const REPLAY_MAX_TRANSFER_BYTES: usize = 1 << 20;

// Word kinds as seen by the host
pub const TRIGGER_WORD_FLAG: u32 = 0x8000_0000;
pub const TRIGGER_NUMBER_MASK: u32 = 0x7FFF_FFFF;
pub const WORD_KIND_MASK: u32 = 0xF000_0000;
pub const TDC_WORD_KIND: u32 = 0x4000_0000;
pub const TDC_VALUE_MASK: u32 = 0x0000_0FFF;
pub const TDC_COUNTER_MASK: u32 = 0x0FFF_F000;
pub const FE_PAYLOAD_MASK: u32 = 0x00FF_FFFF;

// FE-I4 record signatures (top byte of the 24 bit payload)
pub const DATA_HEADER_SIGNATURE: u32 = 0xE9;
pub const ADDRESS_RECORD_SIGNATURE: u32 = 0xEA;
pub const VALUE_RECORD_SIGNATURE: u32 = 0xEC;
pub const SERVICE_RECORD_SIGNATURE: u32 = 0xEF;

// FE-I4 pixel matrix
pub const MIN_COLUMN: u8 = 1;
pub const MAX_COLUMN: u8 = 80;
pub const MIN_ROW: u16 = 1;
pub const MAX_ROW: u16 = 336;
/// ToT code meaning "no hit" in the second half of a data record
pub const NO_HIT_TOT: u8 = 15;
/// Largest ToT code kept as a hit by default (14 is the "small hit" code)
pub const DEFAULT_MAX_TOT: u8 = 14;
/// Most data headers one event may span (relative BCIDs are 16 bit)
pub const MAX_HEADERS_PER_EVENT: u32 = 1 << 16;
/// Number of distinct service record codes (6 bit code field)
pub const N_SERVICE_RECORD_CODES: usize = 64;

// FE-I4B specific service records
pub const SR_CODE_LVL1ID_BCID: u8 = 14;
pub const SR_CODE_SKIPPED: u8 = 15;
pub const SR_CODE_TRUNCATION: u8 = 16;
/// Number of bits of the reconstructed FE-I4B LVL1ID (DH low bits + SR14 high bits)
pub const FEI4B_EXTENDED_LVL1ID_BITS: u32 = 12;

// Mimosa26 telescope
pub const N_TELESCOPE_PLANES: usize = 6;
pub const M26_WORD_KIND: u32 = 0x2000_0000;
pub const M26_PLANE_MASK: u32 = 0x00F0_0000;
pub const M26_START_MASK: u32 = 0x000F_FFFF;
pub const M26_START_PATTERN: u32 = 0x1_5555;
pub const M26_HEADER_PATTERN: u32 = 0x5550;
pub const M26_TRAILER_PATTERN: u32 = 0xAA50;
pub const M26_LOW_WORD_MASK: u32 = 0xFFFF;
pub const M26_TLU_MASK: u32 = 0x7FFF;
/// Plane number used for records carrying only a trigger number
pub const M26_TRIGGER_PLANE: u8 = 0;
/// First FSM index of the frame's data section
pub const M26_DATA_START_INDEX: i32 = 6;
/// Size in bytes of one telescope hit record in the binary sink
pub const TELESCOPE_HIT_RECORD_SIZE: usize = 11;
/// Default number of telescope hits buffered before a flush
pub const DEFAULT_HIT_BUFFER_CAPACITY: usize = 10_000;

// Processing
/// Words decoded between progress reports when decoding a file
pub const REPORT_INTERVAL_WORDS: usize = 100_000;
