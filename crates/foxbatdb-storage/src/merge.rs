//! Merge/compaction: rewrites live entries from sealed segments into one
//! fresh segment and swaps the segment pool atomically.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use bytes::Bytes;
use foxbatdb_types::{ByteOffset, SegmentId};
use tracing::info;

use crate::error::StorageResult;
use crate::index::{KeyIndex, Locator};
use crate::pool::SegmentPool;
use crate::record::decode;
use crate::recovery::RecoveryLimits;

#[derive(Debug, Clone, Copy)]
pub struct MergeStats {
    pub segments_before: usize,
    pub segments_after: usize,
    pub bytes_reclaimed: u64,
}

const MERGE_FILENAME: &str = "foxbat-merge.db";

/// Runs the merge procedure described by component H. `shards` are mutated
/// in place: every surviving locator is redirected to its new location.
pub fn merge(
    dir: &Path,
    pool: &mut SegmentPool,
    shards: &mut [KeyIndex],
    limits: &RecoveryLimits,
) -> StorageResult<MergeStats> {
    let cutoff = pool.tail_id();
    let segments_before = pool.ids_in_order().count();
    let bytes_before: u64 = pool
        .ids_in_order()
        .filter_map(|id| pool.segment(id).map(crate::segment::Segment::len))
        .sum();

    let merge_path = dir.join(MERGE_FILENAME);
    let mut merge_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&merge_path)?;
    let mut merge_len: u64 = 0;

    // (shard index, key, new offset within the merge file)
    let mut rewrites: Vec<(usize, Bytes, ByteOffset)> = Vec::new();

    for (shard_idx, shard) in shards.iter().enumerate() {
        for (key, locator) in shard.iter_all() {
            if locator.segment == cutoff {
                continue;
            }
            let raw = read_record_bytes(pool, locator, limits)?;
            let offset = ByteOffset::new(merge_len);
            merge_file.write_all(&raw)?;
            merge_len += raw.len() as u64;
            rewrites.push((shard_idx, key.clone(), offset));
        }
    }
    merge_file.flush()?;
    drop(merge_file);

    for (shard_idx, key, new_offset) in rewrites {
        if let Some(existing) = shards[shard_idx].get(&key).copied() {
            shards[shard_idx].put(
                key,
                Locator {
                    segment: SegmentId::FIRST,
                    offset: new_offset,
                    ..existing
                },
            );
        }
    }

    pool.replace_with_merge(&merge_path, cutoff)?;

    // The pool always renumbers the merge file to segment 0 and its one
    // surviving segment (the former cutoff) to segment 1.
    let new_cutoff = SegmentId::FIRST.next();
    for shard in shards.iter_mut() {
        let stale: Vec<Bytes> = shard
            .iter_all()
            .filter(|(_, loc)| loc.segment == cutoff)
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            if let Some(existing) = shard.get(&key).copied() {
                shard.put(
                    key,
                    Locator {
                        segment: new_cutoff,
                        ..existing
                    },
                );
            }
        }
    }

    let segments_after = pool.ids_in_order().count();
    let bytes_after: u64 = pool
        .ids_in_order()
        .filter_map(|id| pool.segment(id).map(crate::segment::Segment::len))
        .sum();

    info!(segments_before, segments_after, "merge complete");

    Ok(MergeStats {
        segments_before,
        segments_after,
        bytes_reclaimed: bytes_before.saturating_sub(bytes_after),
    })
}

fn read_record_bytes(
    pool: &mut SegmentPool,
    locator: &Locator,
    limits: &RecoveryLimits,
) -> StorageResult<Vec<u8>> {
    let tail = pool.read_tail(locator.segment, locator.offset)?;
    let (_, len) = decode(
        locator.segment,
        &tail,
        locator.offset,
        limits.key_max_bytes,
        limits.val_max_bytes,
        limits.db_max_num,
    )?;
    Ok(tail[..len].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::encode_data;
    use foxbatdb_types::{DbIndex, MicroTimestamp};
    use tempfile::tempdir;

    #[test]
    fn merge_preserves_live_values_and_collapses_segments() {
        let dir = tempdir().unwrap();
        let mut pool = SegmentPool::open(dir.path(), 16).unwrap();
        let limits = RecoveryLimits {
            key_max_bytes: 1024,
            val_max_bytes: 1024,
            db_max_num: 1,
        };
        let mut shards = vec![KeyIndex::new()];

        for i in 0..6u8 {
            let key = vec![b'k', i];
            let value = vec![b'v', i];
            let bytes = encode_data(DbIndex::new(0), &key, &value, MicroTimestamp::new(u64::from(i) + 1));
            let (seg, off) = pool.append(&bytes).unwrap();
            shards[0].put(Bytes::copy_from_slice(&key), Locator::new(seg, off));
        }

        let stats = merge(dir.path(), &mut pool, &mut shards, &limits).unwrap();
        assert!(stats.segments_after <= 2);

        for i in 0..6u8 {
            let key = vec![b'k', i];
            let locator = *shards[0].get(&key).unwrap();
            let tail = pool.read_tail(locator.segment, locator.offset).unwrap();
            let (record, _) = decode(locator.segment, &tail, locator.offset, 1024, 1024, 1).unwrap();
            assert_eq!(record.value.as_ref(), &[b'v', i]);
        }
    }
}
