//! Top-level facade (component K/P's core collaborator): owns the segment
//! pool, every shard, the pub/sub registry, and per-session state, and
//! exposes the single `execute(session, command) -> RespValue` entry point
//! the dispatch layer calls.

use std::collections::HashMap;
use std::path::PathBuf;

use bytes::Bytes;
use foxbatdb_resp::{is_write_command, Command, RespValue};
use foxbatdb_storage::{encode_marker, KeyIndex, RecordState, RecoveryLimits, SegmentPool};
use foxbatdb_types::{DbIndex, MicroTimestamp};

use crate::error::{FoxbatError, FoxbatResult};
use crate::memory::MemoryGuard;
use crate::pubsub::PubSubRegistry;
use crate::session::SessionId;
use crate::shard::{self, Database, GetOutcome, SetOptions};
use crate::transaction::{rollback, TxState};

struct SessionState {
    db_idx: DbIndex,
    tx: Option<TxState>,
}

impl SessionState {
    fn new() -> Self {
        Self { db_idx: DbIndex::new(0), tx: None }
    }
}

pub struct DatabaseManager {
    dir: PathBuf,
    pool: SegmentPool,
    shards: Vec<Database>,
    pubsub: PubSubRegistry,
    memory: MemoryGuard,
    limits: RecoveryLimits,
    sessions: HashMap<SessionId, SessionState>,
    /// RESP push messages (subscribe acks, published messages) queued for
    /// delivery to sessions other than the one currently dispatching;
    /// the reactor drains this after every `execute` call.
    pending_pushes: Vec<(SessionId, RespValue)>,
}

impl DatabaseManager {
    pub fn new(
        dir: PathBuf,
        pool: SegmentPool,
        indices: Vec<KeyIndex>,
        eviction_policy: fn() -> foxbatdb_storage::EvictionPolicy<Bytes>,
        limits: RecoveryLimits,
        memory_budget_bytes: u64,
    ) -> Self {
        let shards = indices
            .into_iter()
            .enumerate()
            .map(|(idx, index)| Database::new(DbIndex::new(idx as u8), index, eviction_policy()))
            .collect();
        Self {
            dir,
            pool,
            shards,
            pubsub: PubSubRegistry::new(),
            memory: MemoryGuard::new(memory_budget_bytes),
            limits,
            sessions: HashMap::new(),
            pending_pushes: Vec::new(),
        }
    }

    pub fn register_session(&mut self) -> SessionId {
        let id = SessionId::next();
        self.sessions.insert(id, SessionState::new());
        id
    }

    pub fn deregister_session(&mut self, session: SessionId) {
        self.sessions.remove(&session);
        for shard in &mut self.shards {
            shard.clear_session_watches(session);
        }
        self.pubsub.clear_session(session);
    }

    /// Drains RESP push messages accumulated by the last `execute` call
    /// (PUBLISH fan-out, subscribe acknowledgements for other sessions).
    pub fn take_pending_pushes(&mut self) -> Vec<(SessionId, RespValue)> {
        std::mem::take(&mut self.pending_pushes)
    }

    pub fn execute(&mut self, session: SessionId, command: Command) -> RespValue {
        match command.name.as_str() {
            "multi" => return self.cmd_multi(session),
            "discard" => return self.cmd_discard(session),
            "exec" => return self.cmd_exec(session),
            _ => {}
        }

        let in_tx = self.sessions.get(&session).is_some_and(|s| s.tx.is_some());
        if in_tx {
            if matches!(command.name.as_str(), "watch" | "unwatch") {
                return FoxbatError::InvalidTxCmd.to_resp();
            }
            self.enqueue(session, command);
            return RespValue::SimpleString("QUEUED".to_string());
        }

        let db_idx = self.sessions.get(&session).map_or(DbIndex::new(0), |s| s.db_idx);
        match self.execute_immediate(session, db_idx, &command) {
            Ok(reply) => reply,
            Err(err) => err.to_resp(),
        }
    }

    fn cmd_multi(&mut self, session: SessionId) -> RespValue {
        let Some(state) = self.sessions.get_mut(&session) else {
            return FoxbatError::Internal("unknown session".into()).to_resp();
        };
        if state.tx.is_some() {
            return FoxbatError::AlreadyInTx.to_resp();
        }
        state.tx = Some(TxState::new());
        RespValue::ok()
    }

    fn cmd_discard(&mut self, session: SessionId) -> RespValue {
        let Some(state) = self.sessions.get_mut(&session) else {
            return FoxbatError::Internal("unknown session".into()).to_resp();
        };
        if state.tx.take().is_none() {
            return FoxbatError::NotInTx.to_resp();
        }
        for shard in &mut self.shards {
            shard.clear_session_watches(session);
        }
        RespValue::ok()
    }

    fn enqueue(&mut self, session: SessionId, command: Command) {
        let db_idx = self.sessions.get(&session).map_or(DbIndex::new(0), |s| s.db_idx);
        let undo_entries: Vec<(Bytes, Option<foxbatdb_storage::Locator>)> =
            if is_write_command(&command.name) {
                write_keys(&command)
                    .into_iter()
                    .map(|key| {
                        let pre_image = self.shards[db_idx.as_usize()].index().get(&key).copied();
                        (key, pre_image)
                    })
                    .collect()
            } else {
                Vec::new()
            };

        if let Some(state) = self.sessions.get_mut(&session) {
            if let Some(tx) = state.tx.as_mut() {
                for (key, pre_image) in undo_entries {
                    tx.push_undo(key, pre_image);
                }
                tx.enqueue(command, false);
            }
        }
    }

    fn cmd_exec(&mut self, session: SessionId) -> RespValue {
        let Some(state) = self.sessions.get_mut(&session) else {
            return FoxbatError::Internal("unknown session".into()).to_resp();
        };
        let Some(tx) = state.tx.take() else {
            return FoxbatError::NotInTx.to_resp();
        };
        let mut db_idx = state.db_idx;
        let failed_flag = tx.is_failed();
        let (queue, undo) = tx.into_parts();

        if queue.is_empty() {
            for shard in &mut self.shards {
                shard.clear_session_watches(session);
            }
            return RespValue::ok();
        }

        let now = MicroTimestamp::now();
        let begin = encode_marker(db_idx, RecordState::Begin, queue.len() as u64, now);
        log_marker_failure(self.pool.append(&begin));

        let mut replies = Vec::with_capacity(queue.len());
        let mut abort: Option<RespValue> = None;

        for (i, queued) in queue.iter().enumerate() {
            db_idx = self.sessions.get(&session).map_or(db_idx, |s| s.db_idx);

            if queued.invalid || (i == 0 && failed_flag) {
                let failed_marker = encode_marker(db_idx, RecordState::Failed, 0, now);
                log_marker_failure(self.pool.append(&failed_marker));
                rollback(self.shards[db_idx.as_usize()].index_mut(), undo);
                abort = Some(if failed_flag {
                    FoxbatError::WatchedKeyModified.to_resp()
                } else {
                    FoxbatError::InvalidTxCmd.to_resp()
                });
                break;
            }

            match self.execute_immediate(session, db_idx, &queued.command) {
                Ok(reply) => replies.push(reply),
                Err(_) => {
                    let failed_marker = encode_marker(db_idx, RecordState::Failed, 0, now);
                    log_marker_failure(self.pool.append(&failed_marker));
                    rollback(self.shards[db_idx.as_usize()].index_mut(), undo);
                    abort = Some(FoxbatError::TxError.to_resp());
                    break;
                }
            }
        }

        for shard in &mut self.shards {
            shard.clear_session_watches(session);
        }

        match abort {
            Some(reply) => reply,
            None => {
                let finish = encode_marker(db_idx, RecordState::Finish, 0, now);
                log_marker_failure(self.pool.append(&finish));
                RespValue::Array(replies)
            }
        }
    }

    fn execute_immediate(
        &mut self,
        session: SessionId,
        db_idx: DbIndex,
        command: &Command,
    ) -> FoxbatResult<RespValue> {
        match command.name.as_str() {
            "select" => self.cmd_select(session, command),
            "set" => self.cmd_set(db_idx, command),
            "get" => self.cmd_get(db_idx, command),
            "del" => self.cmd_del(db_idx, command),
            "prefix" => self.cmd_prefix(db_idx, command),
            "watch" => self.cmd_watch(session, db_idx, command),
            "unwatch" => self.cmd_unwatch(session, db_idx, command),
            "publish" => self.cmd_publish(command),
            "subscribe" => self.cmd_subscribe(session, command),
            "unsubscribe" => self.cmd_unsubscribe(session, command),
            "merge" => self.cmd_merge(),
            "command" => Ok(RespValue::Array(Vec::new())),
            "info" => Ok(RespValue::bulk(&b"foxbatdb"[..])),
            "server" => Ok(RespValue::bulk(&b"foxbatdb"[..])),
            other => Err(FoxbatError::CommandNotFound(other.to_string())),
        }
    }

    fn cmd_select(&mut self, session: SessionId, command: &Command) -> FoxbatResult<RespValue> {
        let idx = parse_db_index(&command.argv[0])?;
        if idx as usize >= self.shards.len() {
            return Err(FoxbatError::DbIndexOutOfRange);
        }
        if let Some(state) = self.sessions.get_mut(&session) {
            state.db_idx = DbIndex::new(idx);
        }
        Ok(RespValue::ok())
    }

    fn cmd_set(&mut self, db_idx: DbIndex, command: &Command) -> FoxbatResult<RespValue> {
        if self.memory.is_read_only() {
            return Err(FoxbatError::MemoryOut);
        }
        let options = SetOptions::from_parsed(&command.options)?;
        let key = &command.argv[0];
        let value = &command.argv[1];
        let now = MicroTimestamp::now();
        let delta = key.len() as u64 + value.len() as u64;

        let watchers = self.shards[db_idx.as_usize()].watchers(key);
        let pre_image =
            self.shards[db_idx.as_usize()].put(&mut self.pool, key, value, options, &self.limits, now)?;
        self.memory.record_allocation(delta);
        self.relieve_pressure();
        self.mark_watchers_failed(&watchers);

        if options.get {
            Ok(pre_image.map_or_else(RespValue::nil, |v| RespValue::bulk(v)))
        } else {
            Ok(RespValue::ok())
        }
    }

    fn cmd_get(&mut self, db_idx: DbIndex, command: &Command) -> FoxbatResult<RespValue> {
        let key = &command.argv[0];
        let now = MicroTimestamp::now();
        match self.shards[db_idx.as_usize()].get(&mut self.pool, key, &self.limits, now)? {
            GetOutcome::Found(value) => Ok(RespValue::bulk(value)),
            GetOutcome::Absent => Ok(RespValue::nil()),
            GetOutcome::Expired => Err(FoxbatError::KeyNotFound),
        }
    }

    fn cmd_del(&mut self, db_idx: DbIndex, command: &Command) -> FoxbatResult<RespValue> {
        let now = MicroTimestamp::now();
        let mut count = 0i64;
        for key in &command.argv {
            let watchers = self.shards[db_idx.as_usize()].watchers(key);
            if self.shards[db_idx.as_usize()].del(&mut self.pool, key, &self.limits, now)? {
                count += 1;
                self.mark_watchers_failed(&watchers);
            }
        }
        Ok(RespValue::Integer(count))
    }

    fn cmd_prefix(&mut self, db_idx: DbIndex, command: &Command) -> FoxbatResult<RespValue> {
        let prefix = &command.argv[0];
        let values = self.shards[db_idx.as_usize()].prefix(&mut self.pool, prefix, &self.limits)?;
        Ok(RespValue::Array(values.into_iter().map(|v| RespValue::bulk(v)).collect()))
    }

    fn cmd_watch(&mut self, session: SessionId, db_idx: DbIndex, command: &Command) -> FoxbatResult<RespValue> {
        let key = &command.argv[0];
        self.shards[db_idx.as_usize()].add_watch(key, session);
        Ok(RespValue::ok())
    }

    fn cmd_unwatch(&mut self, session: SessionId, db_idx: DbIndex, command: &Command) -> FoxbatResult<RespValue> {
        let key = &command.argv[0];
        self.shards[db_idx.as_usize()].del_watch(key, session);
        Ok(RespValue::ok())
    }

    fn cmd_publish(&mut self, command: &Command) -> FoxbatResult<RespValue> {
        let channel = &command.argv[0];
        let message = &command.argv[1];
        let receivers = self.pubsub.publish(channel);
        for receiver in &receivers {
            let push = RespValue::Array(vec![
                RespValue::bulk(&b"message"[..]),
                RespValue::bulk(channel.clone()),
                RespValue::bulk(message.clone()),
            ]);
            self.pending_pushes.push((*receiver, push));
        }
        Ok(RespValue::Integer(receivers.len() as i64))
    }

    fn cmd_subscribe(&mut self, session: SessionId, command: &Command) -> FoxbatResult<RespValue> {
        let mut acks = Vec::with_capacity(command.argv.len());
        for channel in &command.argv {
            self.pubsub.subscribe(channel.clone(), session);
            acks.push(RespValue::Array(vec![
                RespValue::bulk(&b"subscribe"[..]),
                RespValue::bulk(channel.clone()),
                RespValue::Integer(1),
            ]));
        }
        Ok(RespValue::Array(acks))
    }

    fn cmd_unsubscribe(&mut self, session: SessionId, command: &Command) -> FoxbatResult<RespValue> {
        let mut acks = Vec::with_capacity(command.argv.len());
        for channel in &command.argv {
            self.pubsub.unsubscribe(channel, session);
            acks.push(RespValue::Array(vec![
                RespValue::bulk(&b"unsubscribe"[..]),
                RespValue::bulk(channel.clone()),
                RespValue::Integer(0),
            ]));
        }
        Ok(RespValue::Array(acks))
    }

    fn cmd_merge(&mut self) -> FoxbatResult<RespValue> {
        let stats = shard::merge_all(&mut self.pool, &mut self.shards, &self.dir, &self.limits)?;
        Ok(RespValue::Array(vec![
            RespValue::Integer(stats.segments_before as i64),
            RespValue::Integer(stats.segments_after as i64),
            RespValue::Integer(stats.bytes_reclaimed as i64),
        ]))
    }

    /// Runs an eviction pass across every shard until pressure clears or no
    /// shard has a candidate left, entering read-only mode as a last resort.
    pub fn relieve_pressure(&mut self) {
        if !self.memory.under_pressure() {
            return;
        }
        let now = MicroTimestamp::now();
        loop {
            let mut evicted_any = false;
            for shard in &mut self.shards {
                if let Ok(Some(freed)) = shard.evict_one(&mut self.pool, &self.limits, now) {
                    self.memory.record_release(freed);
                    evicted_any = true;
                }
                if !self.memory.under_pressure() {
                    break;
                }
            }
            if !self.memory.under_pressure() {
                self.memory.clear_read_only();
                return;
            }
            if !evicted_any {
                self.memory.enter_read_only();
                return;
            }
        }
    }

    fn mark_watchers_failed(&mut self, watchers: &[SessionId]) {
        for session in watchers {
            if let Some(state) = self.sessions.get_mut(session) {
                if let Some(tx) = state.tx.as_mut() {
                    tx.mark_failed();
                }
            }
        }
    }
}

fn log_marker_failure(result: foxbatdb_storage::StorageResult<(foxbatdb_types::SegmentId, foxbatdb_types::ByteOffset)>) {
    if let Err(err) = result {
        tracing::warn!(%err, "failed to append transaction marker");
    }
}

fn parse_db_index(bytes: &Bytes) -> FoxbatResult<u8> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<u8>().ok())
        .ok_or(FoxbatError::Syntax)
}

/// Positional keys a write command touches, used to snapshot undo entries
/// at enqueue time.
fn write_keys(command: &Command) -> Vec<Bytes> {
    match command.name.as_str() {
        "set" => command.argv.first().cloned().into_iter().collect(),
        "del" => command.argv.clone(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use foxbatdb_resp::parse;
    use foxbatdb_storage::{recover, EvictionPolicy, SegmentPool};
    use tempfile::tempdir;

    fn bulk(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    fn manager(dir: &Path) -> DatabaseManager {
        let limits = RecoveryLimits { key_max_bytes: 1024, val_max_bytes: 1024, db_max_num: 4 };
        let mut pool = SegmentPool::open(dir, 1 << 20).unwrap();
        let indices = recover(&mut pool, &limits);
        DatabaseManager::new(dir.to_path_buf(), pool, indices, || EvictionPolicy::NoEviction, limits, u64::MAX)
    }

    #[test]
    fn set_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let mut mgr = manager(dir.path());
        let session = mgr.register_session();
        let set = parse(vec![bulk("SET"), bulk("foo"), bulk("bar")]).unwrap();
        assert_eq!(mgr.execute(session, set), RespValue::ok());
        let get = parse(vec![bulk("GET"), bulk("foo")]).unwrap();
        assert_eq!(mgr.execute(session, get), RespValue::bulk(&b"bar"[..]));
    }

    #[test]
    fn multi_exec_applies_all_commands() {
        let dir = tempdir().unwrap();
        let mut mgr = manager(dir.path());
        let session = mgr.register_session();
        mgr.execute(session, parse(vec![bulk("MULTI")]).unwrap());
        mgr.execute(session, parse(vec![bulk("SET"), bulk("a"), bulk("1")]).unwrap());
        mgr.execute(session, parse(vec![bulk("SET"), bulk("b"), bulk("2")]).unwrap());
        let result = mgr.execute(session, parse(vec![bulk("EXEC")]).unwrap());
        assert_eq!(result, RespValue::Array(vec![RespValue::ok(), RespValue::ok()]));
        assert_eq!(
            mgr.execute(session, parse(vec![bulk("GET"), bulk("a")]).unwrap()),
            RespValue::bulk(&b"1"[..])
        );
    }

    #[test]
    fn watch_invalidation_aborts_exec() {
        let dir = tempdir().unwrap();
        let mut mgr = manager(dir.path());
        let watcher = mgr.register_session();
        let writer = mgr.register_session();

        mgr.execute(watcher, parse(vec![bulk("SET"), bulk("x"), bulk("A")]).unwrap());
        mgr.execute(watcher, parse(vec![bulk("WATCH"), bulk("x")]).unwrap());
        mgr.execute(watcher, parse(vec![bulk("MULTI")]).unwrap());
        mgr.execute(watcher, parse(vec![bulk("SET"), bulk("x"), bulk("B")]).unwrap());

        mgr.execute(writer, parse(vec![bulk("SET"), bulk("x"), bulk("C")]).unwrap());

        let result = mgr.execute(watcher, parse(vec![bulk("EXEC")]).unwrap());
        assert_eq!(result, FoxbatError::WatchedKeyModified.to_resp());
        assert_eq!(
            mgr.execute(watcher, parse(vec![bulk("GET"), bulk("x")]).unwrap()),
            RespValue::bulk(&b"C"[..])
        );
    }

    #[test]
    fn nx_then_xx_scenario() {
        let dir = tempdir().unwrap();
        let mut mgr = manager(dir.path());
        let session = mgr.register_session();
        let set_nx = parse(vec![bulk("SET"), bulk("k"), bulk("v"), bulk("NX")]).unwrap();
        assert_eq!(mgr.execute(session, set_nx.clone()), RespValue::ok());
        assert_eq!(
            mgr.execute(session, set_nx),
            FoxbatError::KeyAlreadyExists.to_resp()
        );
    }

    #[test]
    fn ttl_expiry_reads_as_key_not_found() {
        let dir = tempdir().unwrap();
        let mut mgr = manager(dir.path());
        let session = mgr.register_session();
        mgr.execute(session, parse(vec![bulk("SET"), bulk("k"), bulk("v"), bulk("PX"), bulk("50")]).unwrap());
        std::thread::sleep(std::time::Duration::from_millis(120));
        let result = mgr.execute(session, parse(vec![bulk("GET"), bulk("k")]).unwrap());
        assert_eq!(result, FoxbatError::KeyNotFound.to_resp());
    }

    #[test]
    fn keep_ttl_preserves_original_expiry() {
        let dir = tempdir().unwrap();
        let mut mgr = manager(dir.path());
        let session = mgr.register_session();
        mgr.execute(session, parse(vec![bulk("SET"), bulk("k"), bulk("v1"), bulk("PX"), bulk("80")]).unwrap());
        mgr.execute(session, parse(vec![bulk("SET"), bulk("k"), bulk("v2"), bulk("KEEPTTL")]).unwrap());
        assert_eq!(
            mgr.execute(session, parse(vec![bulk("GET"), bulk("k")]).unwrap()),
            RespValue::bulk(&b"v2"[..])
        );
        std::thread::sleep(std::time::Duration::from_millis(150));
        let result = mgr.execute(session, parse(vec![bulk("GET"), bulk("k")]).unwrap());
        assert_eq!(result, FoxbatError::KeyNotFound.to_resp());
    }

    #[test]
    fn del_on_absent_key_returns_zero() {
        let dir = tempdir().unwrap();
        let mut mgr = manager(dir.path());
        let session = mgr.register_session();
        let result = mgr.execute(session, parse(vec![bulk("DEL"), bulk("missing")]).unwrap());
        assert_eq!(result, RespValue::Integer(0));

        mgr.execute(session, parse(vec![bulk("SET"), bulk("k"), bulk("v")]).unwrap());
        let result = mgr.execute(session, parse(vec![bulk("DEL"), bulk("k")]).unwrap());
        assert_eq!(result, RespValue::Integer(1));
        assert_eq!(
            mgr.execute(session, parse(vec![bulk("GET"), bulk("k")]).unwrap()),
            RespValue::nil()
        );
    }

    #[test]
    fn merge_preserves_latest_values_and_compacts() {
        let dir = tempdir().unwrap();
        let mut mgr = manager(dir.path());
        let session = mgr.register_session();

        for i in 0..20 {
            let key = format!("k{i}");
            mgr.execute(session, parse(vec![bulk("SET"), bulk(&key), bulk("v0")]).unwrap());
        }
        for i in (0..20).step_by(2) {
            let key = format!("k{i}");
            mgr.execute(session, parse(vec![bulk("DEL"), bulk(&key)]).unwrap());
        }
        mgr.execute(session, parse(vec![bulk("MERGE")]).unwrap());

        for i in 0..20 {
            let key = format!("k{i}");
            let expected = if i % 2 == 0 { RespValue::nil() } else { RespValue::bulk(&b"v0"[..]) };
            assert_eq!(mgr.execute(session, parse(vec![bulk("GET"), bulk(&key)]).unwrap()), expected);
        }
        assert!(mgr.pool.ids_in_order().count() <= 2);
    }

    #[test]
    fn lru_eviction_prefers_untouched_key() {
        let dir = tempdir().unwrap();
        let limits = RecoveryLimits { key_max_bytes: 1024, val_max_bytes: 1024, db_max_num: 4 };
        let mut pool = SegmentPool::open(dir.path(), 1 << 20).unwrap();
        let indices = recover(&mut pool, &limits);
        let mut mgr = DatabaseManager::new(
            dir.path().to_path_buf(),
            pool,
            indices,
            || EvictionPolicy::Lru(foxbatdb_storage::Lru::new()),
            limits,
            32,
        );
        let session = mgr.register_session();

        mgr.execute(session, parse(vec![bulk("SET"), bulk("old"), bulk("v")]).unwrap());
        mgr.execute(session, parse(vec![bulk("SET"), bulk("young"), bulk("v")]).unwrap());
        // touching "old" after "young" was written makes "old" the
        // most-recently-used key, leaving "young" as the eviction victim.
        mgr.execute(session, parse(vec![bulk("GET"), bulk("old")]).unwrap());
        mgr.execute(session, parse(vec![bulk("SET"), bulk("trigger"), bulk("vvvvvvvvvvvvvvvvvvvv")]).unwrap());

        assert_eq!(
            mgr.execute(session, parse(vec![bulk("GET"), bulk("old")]).unwrap()),
            RespValue::bulk(&b"v"[..])
        );
        assert_eq!(
            mgr.execute(session, parse(vec![bulk("GET"), bulk("young")]).unwrap()),
            RespValue::nil()
        );
    }
}
