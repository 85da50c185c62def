//! Per-session transaction state: command queue, undo log, and the watch
//! "failed" flag, plus the rollback algorithm. The state machine itself
//! (NONE/BEGIN/APPENDING/EXEC/DISCARD) collapses BEGIN into APPENDING here,
//! since a `MULTI` immediately falls through to accepting queued commands.

use bytes::Bytes;
use foxbatdb_storage::Locator;

use foxbatdb_resp::Command;

/// One command captured between `MULTI` and `EXEC`/`DISCARD`.
pub struct QueuedCommand {
    pub command: Command,
    /// Set when the command is not valid to queue at all (e.g. a nested
    /// `MULTI`); EXEC aborts on reaching it without running anything after.
    pub invalid: bool,
}

/// The key's locator immediately before a queued write executed, so it can
/// be restored verbatim on rollback.
pub struct UndoEntry {
    pub key: Bytes,
    pub pre_image: Option<Locator>,
}

#[derive(Default)]
pub struct TxState {
    queue: Vec<QueuedCommand>,
    undo: Vec<UndoEntry>,
    failed: bool,
}

impl TxState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, command: Command, invalid: bool) {
        self.queue.push(QueuedCommand { command, invalid });
    }

    pub fn push_undo(&mut self, key: Bytes, pre_image: Option<Locator>) {
        self.undo.push(UndoEntry { key, pre_image });
    }

    pub fn mark_failed(&mut self) {
        self.failed = true;
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn queue(&self) -> &[QueuedCommand] {
        &self.queue
    }

    /// Consumes the state, handing back the queue and undo log for the
    /// caller (the dispatch layer) to drive EXEC or rollback.
    pub fn into_parts(self) -> (Vec<QueuedCommand>, Vec<UndoEntry>) {
        (self.queue, self.undo)
    }
}

/// Reinstalls each undo entry's pre-image locator in reverse order, without
/// appending any further log record. A `None` pre-image means the key did
/// not exist before the transaction touched it, so it is deleted again.
pub fn rollback(index: &mut foxbatdb_storage::KeyIndex, undo: Vec<UndoEntry>) {
    for entry in undo.into_iter().rev() {
        match entry.pre_image {
            Some(locator) => index.put(entry.key, locator),
            None => {
                index.delete(&entry.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foxbatdb_types::{ByteOffset, SegmentId};

    fn locator() -> Locator {
        Locator::new(SegmentId::new(0), ByteOffset::new(0))
    }

    #[test]
    fn rollback_restores_prior_value_and_deletes_new_keys() {
        let mut index = foxbatdb_storage::KeyIndex::new();
        index.put(Bytes::from_static(b"a"), locator());

        let undo = vec![
            UndoEntry { key: Bytes::from_static(b"a"), pre_image: Some(locator()) },
            UndoEntry { key: Bytes::from_static(b"b"), pre_image: None },
        ];
        index.put(Bytes::from_static(b"b"), locator());

        rollback(&mut index, undo);
        assert!(index.contains(b"a"));
        assert!(!index.contains(b"b"));
    }

    #[test]
    fn tx_state_tracks_queue_and_failed_flag() {
        let mut tx = TxState::new();
        assert!(tx.is_empty());
        tx.mark_failed();
        assert!(tx.is_failed());
    }
}
