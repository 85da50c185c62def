//! Per-shard watch table: key -> set of sessions that have watched it.
//! Entries are a registry keyed by session id rather than an owning
//! reference, so a disconnected session is simply deregistered rather than
//! kept alive by the table.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;

use crate::session::SessionId;

#[derive(Debug, Default)]
pub struct WatchTable {
    by_key: HashMap<Bytes, HashSet<SessionId>>,
}

impl WatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: Bytes, session: SessionId) {
        self.by_key.entry(key).or_default().insert(session);
    }

    pub fn remove(&mut self, key: &[u8], session: SessionId) {
        if let Some(set) = self.by_key.get_mut(key) {
            set.remove(&session);
            if set.is_empty() {
                self.by_key.remove(key);
            }
        }
    }

    /// Sessions currently watching `key`, to be marked failed by the caller.
    pub fn watchers(&self, key: &[u8]) -> impl Iterator<Item = SessionId> + '_ {
        self.by_key.get(key).into_iter().flatten().copied()
    }

    /// Deregisters a session from every key it was watching (used on
    /// disconnect and on DISCARD/EXEC completion).
    pub fn clear_session(&mut self, session: SessionId) {
        self.by_key.retain(|_, set| {
            set.remove(&session);
            !set.is_empty()
        });
    }
}
