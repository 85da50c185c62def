//! On-disk record codec: header + key + value + CRC-32, little-endian,
//! packed, no padding.
//!
//! ```text
//! [crc:4][timestamp:8][state:1][dbIdx:1][keySize:8][valSize:8][key][value]
//! ```
//!
//! `crc` covers every byte after it: the rest of the header, the key, and
//! the value.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use foxbatdb_types::{ByteOffset, DbIndex, MicroTimestamp, SegmentId};

use crate::crc32::crc32;
use crate::error::{StorageError, StorageResult};

/// Header size in bytes, including the leading CRC field.
pub const HEADER_SIZE: usize = 4 + 8 + 1 + 1 + 8 + 8;

/// Tag occupying the `state` byte of a record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Data = 0,
    Failed = 1,
    Begin = 2,
    Finish = 3,
}

impl RecordState {
    fn from_byte(byte: u8, offset: ByteOffset) -> StorageResult<Self> {
        match byte {
            0 => Ok(Self::Data),
            1 => Ok(Self::Failed),
            2 => Ok(Self::Begin),
            3 => Ok(Self::Finish),
            other => Err(StorageError::InvalidState {
                byte: other,
                offset,
            }),
        }
    }
}

/// A decoded record plus the number of bytes it occupied on disk.
#[derive(Debug, Clone)]
pub struct Record {
    pub timestamp: MicroTimestamp,
    pub state: RecordState,
    pub db_idx: DbIndex,
    /// For `Begin`, this is `txCmdCount`. For `Data`, the key length.
    /// Zero for `Failed`/`Finish`.
    pub key_size: u64,
    pub key: Bytes,
    pub value: Bytes,
}

impl Record {
    /// `txCmdCount` carried by a `Begin` marker.
    pub fn tx_cmd_count(&self) -> u64 {
        debug_assert_eq!(self.state, RecordState::Begin);
        self.key_size
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self.state, RecordState::Data) && self.value.is_empty()
    }
}

/// Builds the bytes for a `Data` record (PUT or tombstone).
pub fn encode_data(db_idx: DbIndex, key: &[u8], value: &[u8], now: MicroTimestamp) -> Bytes {
    encode(db_idx, RecordState::Data, key.len() as u64, key, value, now)
}

/// Builds the bytes for a `Begin`/`Finish`/`Failed` marker.
/// `count` is only meaningful for `Begin` (it becomes `keySize`).
pub fn encode_marker(db_idx: DbIndex, state: RecordState, count: u64, now: MicroTimestamp) -> Bytes {
    debug_assert_ne!(state, RecordState::Data);
    let key_size = if state == RecordState::Begin { count } else { 0 };
    encode(db_idx, state, key_size, &[], &[], now)
}

fn encode(
    db_idx: DbIndex,
    state: RecordState,
    key_size: u64,
    key: &[u8],
    value: &[u8],
    now: MicroTimestamp,
) -> Bytes {
    let val_size = value.len() as u64;
    let mut tail = BytesMut::with_capacity(HEADER_SIZE - 4 + key.len() + value.len());
    tail.put_u64_le(now.as_u64());
    tail.put_u8(state as u8);
    tail.put_u8(db_idx.as_u8());
    tail.put_u64_le(key_size);
    tail.put_u64_le(val_size);
    tail.put_slice(key);
    tail.put_slice(value);

    let crc = crc32(&tail);
    let mut buf = BytesMut::with_capacity(4 + tail.len());
    buf.put_u32_le(crc);
    buf.put_slice(&tail);
    buf.freeze()
}

/// Decodes one record out of `data` starting at `offset` (`data` holds the
/// full contents of `segment` from `offset` onward, or at least enough of
/// it to cover the record). Returns the record and its total encoded size.
pub fn decode(
    segment: SegmentId,
    data: &[u8],
    offset: ByteOffset,
    key_max_bytes: u32,
    val_max_bytes: u32,
    db_max_num: u8,
) -> StorageResult<(Record, usize)> {
    if data.len() < HEADER_SIZE {
        return Err(StorageError::UnexpectedEof { segment, offset });
    }

    let mut header = &data[..HEADER_SIZE];
    let crc = header.get_u32_le();
    let timestamp = header.get_u64_le();
    let state_byte = header.get_u8();
    let db_idx_byte = header.get_u8();
    let key_size = header.get_u64_le();
    let val_size = header.get_u64_le();

    let state = RecordState::from_byte(state_byte, offset)?;

    if timestamp == 0 {
        return Err(StorageError::TornWrite {
            segment,
            offset,
            reason: "zero timestamp",
        });
    }
    if db_idx_byte >= db_max_num {
        return Err(StorageError::DbIndexOutOfRange {
            idx: db_idx_byte,
            max: db_max_num,
        });
    }

    match state {
        RecordState::Data => {
            if key_size > u64::from(key_max_bytes) {
                return Err(StorageError::KeyTooLarge {
                    len: key_size,
                    max: key_max_bytes,
                });
            }
            if val_size > u64::from(val_max_bytes) {
                return Err(StorageError::ValueTooLarge {
                    len: val_size,
                    max: val_max_bytes,
                });
            }
        }
        RecordState::Failed | RecordState::Finish => {
            if key_size != 0 || val_size != 0 {
                return Err(StorageError::TornWrite {
                    segment,
                    offset,
                    reason: "marker with nonzero sizes",
                });
            }
        }
        RecordState::Begin => {
            if val_size != 0 {
                return Err(StorageError::TornWrite {
                    segment,
                    offset,
                    reason: "begin marker with nonzero valSize",
                });
            }
        }
    }

    let body_len = (key_size + val_size) as usize;
    let total_len = HEADER_SIZE + body_len;
    if data.len() < total_len {
        return Err(StorageError::UnexpectedEof { segment, offset });
    }

    let key = Bytes::copy_from_slice(&data[HEADER_SIZE..HEADER_SIZE + key_size as usize]);
    let value = Bytes::copy_from_slice(
        &data[HEADER_SIZE + key_size as usize..HEADER_SIZE + key_size as usize + val_size as usize],
    );

    let computed = crc32(&data[4..total_len]);
    if computed != crc {
        return Err(StorageError::CorruptedRecord { segment, offset });
    }

    Ok((
        Record {
            timestamp: MicroTimestamp::new(timestamp),
            state,
            db_idx: DbIndex::new(db_idx_byte),
            key_size,
            key,
            value,
        },
        total_len,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(key: &[u8], value: &[u8]) -> Record {
        let now = MicroTimestamp::new(42);
        let bytes = encode_data(DbIndex::new(0), key, value, now);
        let (record, len) = decode(SegmentId::new(0), &bytes, ByteOffset::ZERO, 1024, 1024, 16).unwrap();
        assert_eq!(len, bytes.len());
        record
    }

    #[test]
    fn data_record_roundtrips() {
        let record = roundtrip(b"hello", b"world");
        assert_eq!(record.key.as_ref(), b"hello");
        assert_eq!(record.value.as_ref(), b"world");
        assert_eq!(record.state, RecordState::Data);
        assert!(!record.is_tombstone());
    }

    #[test]
    fn empty_value_is_tombstone() {
        let record = roundtrip(b"hello", b"");
        assert!(record.is_tombstone());
    }

    #[test]
    fn begin_marker_encodes_count_in_key_size() {
        let now = MicroTimestamp::new(1);
        let bytes = encode_marker(DbIndex::new(0), RecordState::Begin, 3, now);
        let (record, _) = decode(SegmentId::new(0), &bytes, ByteOffset::ZERO, 1024, 1024, 16).unwrap();
        assert_eq!(record.state, RecordState::Begin);
        assert_eq!(record.tx_cmd_count(), 3);
    }

    #[test]
    fn corrupted_byte_fails_crc() {
        let now = MicroTimestamp::new(7);
        let mut bytes = encode_data(DbIndex::new(0), b"k", b"v", now).to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let err = decode(SegmentId::new(0), &bytes, ByteOffset::ZERO, 1024, 1024, 16).unwrap_err();
        assert!(matches!(err, StorageError::CorruptedRecord { .. }));
    }

    #[test]
    fn oversized_key_is_rejected() {
        let now = MicroTimestamp::new(7);
        let bytes = encode_data(DbIndex::new(0), b"0123456789", b"v", now);
        let err = decode(SegmentId::new(0), &bytes, ByteOffset::ZERO, 4, 1024, 16).unwrap_err();
        assert!(matches!(err, StorageError::KeyTooLarge { .. }));
    }

    proptest::proptest! {
        #[test]
        fn arbitrary_key_value_roundtrip(key in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..64),
                                          value in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..64)) {
            let now = MicroTimestamp::new(99);
            let bytes = encode_data(DbIndex::new(0), &key, &value, now);
            let (record, _) = decode(SegmentId::new(0), &bytes, ByteOffset::ZERO, 1024, 1024, 16).unwrap();
            proptest::prop_assert_eq!(record.key.as_ref(), key.as_slice());
            proptest::prop_assert_eq!(record.value.as_ref(), value.as_slice());
        }
    }
}
