//! Storage-layer error taxonomy.

use foxbatdb_types::{ByteOffset, SegmentId};
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("torn write in segment {segment} at offset {offset}: {reason}")]
    TornWrite {
        segment: SegmentId,
        offset: ByteOffset,
        reason: &'static str,
    },

    #[error("corrupted record in segment {segment} at offset {offset}: crc mismatch")]
    CorruptedRecord {
        segment: SegmentId,
        offset: ByteOffset,
    },

    #[error("unexpected end of file reading segment {segment} at offset {offset}")]
    UnexpectedEof {
        segment: SegmentId,
        offset: ByteOffset,
    },

    #[error("invalid record state byte {byte} at offset {offset}")]
    InvalidState { byte: u8, offset: ByteOffset },

    #[error("key of {len} bytes exceeds configured key_max_bytes ({max})")]
    KeyTooLarge { len: u64, max: u32 },

    #[error("value of {len} bytes exceeds configured val_max_bytes ({max})")]
    ValueTooLarge { len: u64, max: u32 },

    #[error("db index {idx} out of range (db_max_num = {max})")]
    DbIndexOutOfRange { idx: u8, max: u8 },

    #[error("no writable segment available")]
    NoWritableSegment,
}
