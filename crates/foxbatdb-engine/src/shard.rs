//! Database shard (component E): binds one key index, one eviction policy,
//! and one watch table, and applies commands against them.

use std::path::Path;

use bytes::Bytes;
use foxbatdb_resp::{CommandOption, CommandOptionKind};
use foxbatdb_storage::{
    decode, encode_data, EvictionPolicy, KeyIndex, Locator, MergeStats, RecoveryLimits, SegmentPool,
    NEVER,
};
use foxbatdb_types::{DbIndex, MicroTimestamp};

use crate::error::{FoxbatError, FoxbatResult};
use crate::session::SessionId;
use crate::watch::WatchTable;

#[derive(Debug, Default, Clone, Copy)]
pub struct SetOptions {
    pub ex_secs: Option<u64>,
    pub px_millis: Option<u64>,
    pub nx: bool,
    pub xx: bool,
    pub keep_ttl: bool,
    pub get: bool,
}

impl SetOptions {
    pub fn from_parsed(options: &[CommandOption]) -> FoxbatResult<Self> {
        let mut out = Self::default();
        for opt in options {
            match opt.kind {
                CommandOptionKind::Ex => {
                    let secs = parse_u64(&opt.args[0])?;
                    out.ex_secs = Some(secs);
                }
                CommandOptionKind::Px => {
                    let millis = parse_u64(&opt.args[0])?;
                    out.px_millis = Some(millis);
                }
                CommandOptionKind::Nx => out.nx = true,
                CommandOptionKind::Xx => out.xx = true,
                CommandOptionKind::KeepTtl => out.keep_ttl = true,
                CommandOptionKind::Get => out.get = true,
            }
        }
        Ok(out)
    }

    fn expire_ms(&self) -> Option<u64> {
        self.ex_secs.map(|s| s * 1000).or(self.px_millis)
    }
}

fn parse_u64(bytes: &Bytes) -> FoxbatResult<u64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or(FoxbatError::Syntax)
}

/// Result of a `GET`: a live value, a key that was never present, or one
/// that just expired. The dispatch layer turns `Absent` into a nil reply
/// and `Expired` into an error, matching the reference implementation.
pub enum GetOutcome {
    Found(Bytes),
    Absent,
    Expired,
}

pub struct Database {
    pub db_idx: DbIndex,
    index: KeyIndex,
    eviction: EvictionPolicy<Bytes>,
    watch: WatchTable,
}

impl Database {
    pub fn new(db_idx: DbIndex, index: KeyIndex, eviction: EvictionPolicy<Bytes>) -> Self {
        Self {
            db_idx,
            index,
            eviction,
            watch: WatchTable::new(),
        }
    }

    pub fn index(&self) -> &KeyIndex {
        &self.index
    }

    pub fn index_mut(&mut self) -> &mut KeyIndex {
        &mut self.index
    }

    /// `PUT`/`SET`: validates options before any mutation, then appends a
    /// DATA record, updates the index, touches the eviction policy, and
    /// notifies watchers.
    pub fn put(
        &mut self,
        pool: &mut SegmentPool,
        key: &[u8],
        value: &[u8],
        options: SetOptions,
        limits: &RecoveryLimits,
        now: MicroTimestamp,
    ) -> FoxbatResult<Option<Bytes>> {
        if key.len() as u64 > u64::from(limits.key_max_bytes) {
            return Err(FoxbatError::Syntax);
        }
        if value.len() as u64 > u64::from(limits.val_max_bytes) {
            return Err(FoxbatError::Syntax);
        }

        let existing = self.index.get(key).copied();
        if options.nx && existing.is_some() {
            return Err(FoxbatError::KeyAlreadyExists);
        }
        if options.xx && existing.is_none() {
            return Err(FoxbatError::KeyNotFound);
        }

        let pre_image = if options.get {
            match existing {
                Some(loc) => Some(self.read_value(pool, &loc, limits)?),
                None => None,
            }
        } else {
            None
        };

        let bytes = encode_data(self.db_idx, key, value, now);
        let (segment, offset) = pool.append(&bytes)?;

        let expire_ms = if options.keep_ttl {
            existing.map(|loc| loc.expire_ms).unwrap_or(NEVER)
        } else {
            options.expire_ms().unwrap_or(NEVER)
        };

        let key_bytes = Bytes::copy_from_slice(key);
        self.index
            .put(key_bytes.clone(), Locator::new(segment, offset).with_ttl(expire_ms));
        self.eviction.touch(key_bytes);

        if options.get {
            Ok(pre_image)
        } else {
            Ok(None)
        }
    }

    /// `GET`: lazily expires the key on read. Distinguishes a key that was
    /// never present (nil) from one that just expired (an error), per the
    /// reference implementation's behavior.
    pub fn get(
        &mut self,
        pool: &mut SegmentPool,
        key: &[u8],
        limits: &RecoveryLimits,
        now: MicroTimestamp,
    ) -> FoxbatResult<GetOutcome> {
        let Some(locator) = self.index.get(key).copied() else {
            return Ok(GetOutcome::Absent);
        };

        if locator.is_expired() {
            self.expire_key(pool, key, limits, now)?;
            return Ok(GetOutcome::Expired);
        }

        let key_bytes = Bytes::copy_from_slice(key);
        self.eviction.touch(key_bytes);
        Ok(GetOutcome::Found(self.read_value(pool, &locator, limits)?))
    }

    /// `DEL`: returns whether the key was present.
    pub fn del(
        &mut self,
        pool: &mut SegmentPool,
        key: &[u8],
        limits: &RecoveryLimits,
        now: MicroTimestamp,
    ) -> FoxbatResult<bool> {
        if self.index.get(key).is_none() {
            return Ok(false);
        }
        self.append_tombstone(pool, key, now)?;
        self.index.delete(key);
        self.eviction.remove(&Bytes::copy_from_slice(key));
        let _ = limits;
        Ok(true)
    }

    /// `PREFIX`: live values sharing `prefix`, lexicographically ordered.
    pub fn prefix(
        &mut self,
        pool: &mut SegmentPool,
        prefix: &[u8],
        limits: &RecoveryLimits,
    ) -> FoxbatResult<Vec<Bytes>> {
        let locators: Vec<(Bytes, Locator)> = self
            .index
            .prefix(prefix)
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        let mut out = Vec::with_capacity(locators.len());
        for (_, locator) in locators {
            if locator.is_expired() {
                continue;
            }
            out.push(self.read_value(pool, &locator, limits)?);
        }
        Ok(out)
    }

    pub fn add_watch(&mut self, key: &[u8], session: SessionId) {
        if self.index.contains(key) {
            self.watch.add(Bytes::copy_from_slice(key), session);
        }
    }

    pub fn del_watch(&mut self, key: &[u8], session: SessionId) {
        self.watch.remove(key, session);
    }

    pub fn clear_session_watches(&mut self, session: SessionId) {
        self.watch.clear_session(session);
    }

    /// Sessions watching `key`; the caller (the transaction engine) marks
    /// each one's pending transaction as failed.
    pub fn watchers(&self, key: &[u8]) -> Vec<SessionId> {
        self.watch.watchers(key).collect()
    }

    /// Requests eviction of the least-recently-used key, appending a
    /// tombstone to keep on-disk and in-memory state consistent. Returns the
    /// key and value length freed, so the caller can release it from the
    /// memory budget it was charged against.
    pub fn evict_one(
        &mut self,
        pool: &mut SegmentPool,
        limits: &RecoveryLimits,
        now: MicroTimestamp,
    ) -> FoxbatResult<Option<u64>> {
        let Some(key) = self.eviction.evict() else {
            return Ok(None);
        };
        let freed = match self.index.get(&key) {
            Some(locator) => {
                let value = self.read_value(pool, locator, limits)?;
                key.len() as u64 + value.len() as u64
            }
            None => key.len() as u64,
        };
        self.append_tombstone(pool, &key, now)?;
        self.index.delete(&key);
        Ok(Some(freed))
    }

    pub fn is_eviction_exhausted(&self) -> bool {
        self.eviction.is_empty()
    }

    fn expire_key(
        &mut self,
        pool: &mut SegmentPool,
        key: &[u8],
        _limits: &RecoveryLimits,
        now: MicroTimestamp,
    ) -> FoxbatResult<()> {
        self.append_tombstone(pool, key, now)?;
        self.index.delete(key);
        self.eviction.remove(&Bytes::copy_from_slice(key));
        Ok(())
    }

    fn append_tombstone(&mut self, pool: &mut SegmentPool, key: &[u8], now: MicroTimestamp) -> FoxbatResult<()> {
        let bytes = encode_data(self.db_idx, key, &[], now);
        pool.append(&bytes)?;
        Ok(())
    }

    fn read_value(
        &self,
        pool: &mut SegmentPool,
        locator: &Locator,
        limits: &RecoveryLimits,
    ) -> FoxbatResult<Bytes> {
        let tail = pool.read_tail(locator.segment, locator.offset)?;
        let (record, _) = decode(
            locator.segment,
            &tail,
            locator.offset,
            limits.key_max_bytes,
            limits.val_max_bytes,
            limits.db_max_num,
        )?;
        Ok(record.value)
    }
}

/// Runs merge/compaction (component H) across every shard. Temporarily
/// takes each shard's key index out to satisfy the storage layer's
/// shard-agnostic `merge` signature, then puts the rewritten indices back.
pub fn merge_all(
    pool: &mut SegmentPool,
    shards: &mut [Database],
    dir: &Path,
    limits: &RecoveryLimits,
) -> FoxbatResult<MergeStats> {
    let mut indices: Vec<KeyIndex> = shards.iter_mut().map(|d| std::mem::take(&mut d.index)).collect();
    let stats = foxbatdb_storage::merge(dir, pool, &mut indices, limits)?;
    for (shard, index) in shards.iter_mut().zip(indices) {
        shard.index = index;
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn limits() -> RecoveryLimits {
        RecoveryLimits { key_max_bytes: 1024, val_max_bytes: 1024, db_max_num: 1 }
    }

    fn fresh_db() -> Database {
        Database::new(DbIndex::new(0), KeyIndex::new(), EvictionPolicy::NoEviction)
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let mut pool = SegmentPool::open(dir.path(), 1 << 20).unwrap();
        let mut db = fresh_db();
        let now = MicroTimestamp::new(1);
        db.put(&mut pool, b"k", b"v", SetOptions::default(), &limits(), now).unwrap();
        match db.get(&mut pool, b"k", &limits(), now).unwrap() {
            GetOutcome::Found(v) => assert_eq!(v.as_ref(), b"v"),
            _ => panic!("expected value"),
        }
    }

    #[test]
    fn nx_rejects_existing_key() {
        let dir = tempdir().unwrap();
        let mut pool = SegmentPool::open(dir.path(), 1 << 20).unwrap();
        let mut db = fresh_db();
        let now = MicroTimestamp::new(1);
        db.put(&mut pool, b"k", b"v", SetOptions::default(), &limits(), now).unwrap();
        let opts = SetOptions { nx: true, ..Default::default() };
        let err = db.put(&mut pool, b"k", b"w", opts, &limits(), now).unwrap_err();
        assert_eq!(err, FoxbatError::KeyAlreadyExists);
    }

    #[test]
    fn xx_rejects_missing_key() {
        let dir = tempdir().unwrap();
        let mut pool = SegmentPool::open(dir.path(), 1 << 20).unwrap();
        let mut db = fresh_db();
        let opts = SetOptions { xx: true, ..Default::default() };
        let err = db.put(&mut pool, b"k", b"w", opts, &limits(), MicroTimestamp::new(1)).unwrap_err();
        assert_eq!(err, FoxbatError::KeyNotFound);
    }

    #[test]
    fn del_reports_presence() {
        let dir = tempdir().unwrap();
        let mut pool = SegmentPool::open(dir.path(), 1 << 20).unwrap();
        let mut db = fresh_db();
        let now = MicroTimestamp::new(1);
        assert!(!db.del(&mut pool, b"k", &limits(), now).unwrap());
        db.put(&mut pool, b"k", b"v", SetOptions::default(), &limits(), now).unwrap();
        assert!(db.del(&mut pool, b"k", &limits(), now).unwrap());
    }

    #[test]
    fn prefix_returns_live_values_only() {
        let dir = tempdir().unwrap();
        let mut pool = SegmentPool::open(dir.path(), 1 << 20).unwrap();
        let mut db = fresh_db();
        let now = MicroTimestamp::new(1);
        db.put(&mut pool, b"app", b"1", SetOptions::default(), &limits(), now).unwrap();
        db.put(&mut pool, b"apple", b"2", SetOptions::default(), &limits(), now).unwrap();
        db.del(&mut pool, b"apple", &limits(), now).unwrap();
        let values = db.prefix(&mut pool, b"app", &limits()).unwrap();
        assert_eq!(values, vec![Bytes::from_static(b"1")]);
    }
}
