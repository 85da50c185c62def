//! Channel -> subscriber registry (component M). Sessions are referenced by
//! id only; the reactor owns the actual socket and write buffer and is
//! responsible for delivering queued messages.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;

use crate::session::SessionId;

#[derive(Debug, Default)]
pub struct PubSubRegistry {
    channels: HashMap<Bytes, HashSet<SessionId>>,
}

impl PubSubRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, channel: Bytes, session: SessionId) {
        self.channels.entry(channel).or_default().insert(session);
    }

    pub fn unsubscribe(&mut self, channel: &[u8], session: SessionId) {
        if let Some(set) = self.channels.get_mut(channel) {
            set.remove(&session);
            if set.is_empty() {
                self.channels.remove(channel);
            }
        }
    }

    pub fn clear_session(&mut self, session: SessionId) {
        self.channels.retain(|_, set| {
            set.remove(&session);
            !set.is_empty()
        });
    }

    /// Sessions subscribed to `channel`; the caller queues the RESP push
    /// message into each one's write buffer and reports the count.
    pub fn publish(&self, channel: &[u8]) -> Vec<SessionId> {
        self.channels.get(channel).into_iter().flatten().copied().collect()
    }
}
