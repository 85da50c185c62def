//! Rebuilds the key index for every shard by replaying all segments in
//! order at startup, honoring transaction boundaries.

use bytes::Bytes;
use foxbatdb_types::ByteOffset;
use tracing::{info, warn};

use crate::index::{KeyIndex, Locator, NEVER};
use crate::pool::SegmentPool;
use crate::record::{decode, Record, RecordState};

pub struct RecoveryLimits {
    pub key_max_bytes: u32,
    pub val_max_bytes: u32,
    pub db_max_num: u8,
}

/// Replays every segment in `pool` in order, installing locators into one
/// `KeyIndex` per shard. Structural or CRC failures truncate the remaining
/// bytes of that segment and recovery moves on to the next one.
pub fn recover(pool: &mut SegmentPool, limits: &RecoveryLimits) -> Vec<KeyIndex> {
    let mut shards: Vec<KeyIndex> = (0..limits.db_max_num).map(|_| KeyIndex::new()).collect();

    let segment_ids: Vec<_> = pool.ids_in_order().collect();
    for segment_id in segment_ids {
        let mut cursor = ByteOffset::ZERO;
        loop {
            let tail = match pool.read_tail(segment_id, cursor) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(%segment_id, %cursor, error = %err, "failed to read segment tail during recovery");
                    break;
                }
            };
            if tail.is_empty() {
                break;
            }

            let decoded = decode(
                segment_id,
                &tail,
                cursor,
                limits.key_max_bytes,
                limits.val_max_bytes,
                limits.db_max_num,
            );
            let (record, len) = match decoded {
                Ok(pair) => pair,
                Err(err) => {
                    info!(%segment_id, %cursor, error = %err, "torn tail, truncating recovery for this segment");
                    break;
                }
            };

            match record.state {
                RecordState::Data => {
                    apply_data(&mut shards, segment_id, cursor, &record);
                    cursor += ByteOffset::new(len as u64);
                }
                RecordState::Begin => {
                    let count = record.tx_cmd_count();
                    cursor += ByteOffset::new(len as u64);
                    match replay_transaction(pool, segment_id, &mut cursor, count, limits) {
                        TxOutcome::Committed(records) => {
                            for (offset, record) in records {
                                apply_data(&mut shards, segment_id, offset, &record);
                            }
                        }
                        TxOutcome::Aborted => {}
                        TxOutcome::Malformed => break,
                    }
                }
                RecordState::Failed | RecordState::Finish => {
                    // A lone marker not preceded by BEGIN in this scan: stop.
                    break;
                }
            }
        }
    }

    for (idx, shard) in shards.iter().enumerate() {
        info!(shard = idx, keys = shard.len(), "recovered shard");
    }
    shards
}

enum TxOutcome {
    Committed(Vec<(ByteOffset, Record)>),
    Aborted,
    Malformed,
}

/// Speculatively reads up to `count` DATA records followed by one
/// FINISH/FAILED marker. A FAILED marker may arrive after anywhere from 0 to
/// `count` DATA records, since a queued command can fail mid-transaction
/// before every planned write lands; that short-circuits to `Aborted` rather
/// than being mistaken for a malformed stream. Advances `cursor` past
/// whatever was consumed.
fn replay_transaction(
    pool: &mut SegmentPool,
    segment_id: foxbatdb_types::SegmentId,
    cursor: &mut ByteOffset,
    count: u64,
    limits: &RecoveryLimits,
) -> TxOutcome {
    let mut buffered = Vec::with_capacity(count as usize);

    for _ in 0..count {
        let tail = match pool.read_tail(segment_id, *cursor) {
            Ok(bytes) => bytes,
            Err(_) => return TxOutcome::Malformed,
        };
        if tail.is_empty() {
            return TxOutcome::Malformed;
        }
        let decoded = decode(
            segment_id,
            &tail,
            *cursor,
            limits.key_max_bytes,
            limits.val_max_bytes,
            limits.db_max_num,
        );
        let (record, len) = match decoded {
            Ok(pair) => pair,
            Err(_) => return TxOutcome::Malformed,
        };
        match record.state {
            RecordState::Data => {
                buffered.push((*cursor, record));
                *cursor += ByteOffset::new(len as u64);
            }
            RecordState::Failed => {
                *cursor += ByteOffset::new(len as u64);
                return TxOutcome::Aborted;
            }
            RecordState::Begin | RecordState::Finish => return TxOutcome::Malformed,
        }
    }

    let tail = match pool.read_tail(segment_id, *cursor) {
        Ok(bytes) => bytes,
        Err(_) => return TxOutcome::Malformed,
    };
    if tail.is_empty() {
        return TxOutcome::Malformed;
    }
    let decoded = decode(
        segment_id,
        &tail,
        *cursor,
        limits.key_max_bytes,
        limits.val_max_bytes,
        limits.db_max_num,
    );
    match decoded {
        Ok((marker, len)) if marker.state == RecordState::Finish => {
            *cursor += ByteOffset::new(len as u64);
            TxOutcome::Committed(buffered)
        }
        Ok((marker, len)) if marker.state == RecordState::Failed => {
            *cursor += ByteOffset::new(len as u64);
            TxOutcome::Aborted
        }
        _ => TxOutcome::Malformed,
    }
}

fn apply_data(
    shards: &mut [KeyIndex],
    segment: foxbatdb_types::SegmentId,
    offset: ByteOffset,
    record: &Record,
) {
    let shard = &mut shards[record.db_idx.as_usize()];
    let key: Bytes = record.key.clone();
    if record.is_tombstone() {
        shard.delete(&key);
    } else {
        shard.put(key, Locator::new(segment, offset).with_ttl(NEVER));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{encode_data, encode_marker};
    use foxbatdb_types::{DbIndex, MicroTimestamp};
    use tempfile::tempdir;

    fn limits() -> RecoveryLimits {
        RecoveryLimits {
            key_max_bytes: 1024,
            val_max_bytes: 1024,
            db_max_num: 2,
        }
    }

    #[test]
    fn plain_writes_are_indexed() {
        let dir = tempdir().unwrap();
        let mut pool = SegmentPool::open(dir.path(), 1 << 20).unwrap();
        pool.append(&encode_data(DbIndex::new(0), b"a", b"1", MicroTimestamp::new(1)))
            .unwrap();
        pool.append(&encode_data(DbIndex::new(0), b"b", b"2", MicroTimestamp::new(2)))
            .unwrap();

        let shards = recover(&mut pool, &limits());
        assert!(shards[0].contains(b"a"));
        assert!(shards[0].contains(b"b"));
    }

    #[test]
    fn tombstone_removes_key() {
        let dir = tempdir().unwrap();
        let mut pool = SegmentPool::open(dir.path(), 1 << 20).unwrap();
        pool.append(&encode_data(DbIndex::new(0), b"a", b"1", MicroTimestamp::new(1)))
            .unwrap();
        pool.append(&encode_data(DbIndex::new(0), b"a", b"", MicroTimestamp::new(2)))
            .unwrap();

        let shards = recover(&mut pool, &limits());
        assert!(!shards[0].contains(b"a"));
    }

    #[test]
    fn committed_transaction_is_applied() {
        let dir = tempdir().unwrap();
        let mut pool = SegmentPool::open(dir.path(), 1 << 20).unwrap();
        pool.append(&encode_marker(DbIndex::new(0), RecordState::Begin, 2, MicroTimestamp::new(1)))
            .unwrap();
        pool.append(&encode_data(DbIndex::new(0), b"a", b"1", MicroTimestamp::new(2)))
            .unwrap();
        pool.append(&encode_data(DbIndex::new(0), b"b", b"2", MicroTimestamp::new(3)))
            .unwrap();
        pool.append(&encode_marker(DbIndex::new(0), RecordState::Finish, 0, MicroTimestamp::new(4)))
            .unwrap();

        let shards = recover(&mut pool, &limits());
        assert!(shards[0].contains(b"a"));
        assert!(shards[0].contains(b"b"));
    }

    #[test]
    fn failed_transaction_is_discarded() {
        let dir = tempdir().unwrap();
        let mut pool = SegmentPool::open(dir.path(), 1 << 20).unwrap();
        pool.append(&encode_marker(DbIndex::new(0), RecordState::Begin, 2, MicroTimestamp::new(1)))
            .unwrap();
        pool.append(&encode_data(DbIndex::new(0), b"a", b"1", MicroTimestamp::new(2)))
            .unwrap();
        pool.append(&encode_marker(DbIndex::new(0), RecordState::Failed, 0, MicroTimestamp::new(3)))
            .unwrap();
        // A later, unrelated write should still be recovered.
        pool.append(&encode_data(DbIndex::new(0), b"c", b"3", MicroTimestamp::new(4)))
            .unwrap();

        let shards = recover(&mut pool, &limits());
        assert!(!shards[0].contains(b"a"));
        assert!(shards[0].contains(b"c"));
    }
}
