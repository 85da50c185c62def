//! In-memory key index: an ordered map from key to the location of its
//! latest on-disk value. Backed by a `BTreeMap` so prefix iteration yields
//! keys in lexicographic order, as required of component D.

use std::collections::BTreeMap;
use std::time::Instant;

use bytes::Bytes;
use foxbatdb_types::{ByteOffset, SegmentId};

/// Milliseconds-past-creation sentinel meaning "never expires".
pub const NEVER: u64 = u64::MAX;

/// The value locator stored for each live key.
#[derive(Debug, Clone, Copy)]
pub struct Locator {
    pub segment: SegmentId,
    pub offset: ByteOffset,
    pub created: Instant,
    pub expire_ms: u64,
}

impl Locator {
    pub fn new(segment: SegmentId, offset: ByteOffset) -> Self {
        Self {
            segment,
            offset,
            created: Instant::now(),
            expire_ms: NEVER,
        }
    }

    pub fn with_ttl(mut self, expire_ms: u64) -> Self {
        self.expire_ms = expire_ms;
        self
    }

    pub fn is_expired(&self) -> bool {
        self.expire_ms != NEVER && self.created.elapsed().as_millis() as u64 >= self.expire_ms
    }
}

#[derive(Debug, Default)]
pub struct KeyIndex {
    map: BTreeMap<Bytes, Locator>,
}

impl KeyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Bytes, locator: Locator) {
        self.map.insert(key, locator);
    }

    pub fn get(&self, key: &[u8]) -> Option<&Locator> {
        self.map.get(key)
    }

    pub fn delete(&mut self, key: &[u8]) -> Option<Locator> {
        self.map.remove(key)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Keys sharing `prefix`, in lexicographic order.
    pub fn prefix<'a>(&'a self, prefix: &'a [u8]) -> impl Iterator<Item = (&'a Bytes, &'a Locator)> {
        self.map
            .range(Bytes::copy_from_slice(prefix)..)
            .take_while(move |(k, _)| k.starts_with(prefix))
    }

    pub fn iter_all(&self) -> impl Iterator<Item = (&Bytes, &Locator)> {
        self.map.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator() -> Locator {
        Locator::new(SegmentId::new(0), ByteOffset::new(0))
    }

    #[test]
    fn prefix_iteration_is_lexicographic() {
        let mut idx = KeyIndex::new();
        for key in ["app", "apple", "apply", "banana"] {
            idx.put(Bytes::from(key), locator());
        }
        let found: Vec<&[u8]> = idx.prefix(b"app").map(|(k, _)| k.as_ref()).collect();
        assert_eq!(found, vec![b"app".as_slice(), b"apple".as_slice(), b"apply".as_slice()]);
    }

    #[test]
    fn delete_removes_entry() {
        let mut idx = KeyIndex::new();
        idx.put(Bytes::from_static(b"k"), locator());
        assert!(idx.delete(b"k").is_some());
        assert!(!idx.contains(b"k"));
    }

    #[test]
    fn ttl_expiry_is_detected() {
        let loc = locator().with_ttl(0);
        assert!(loc.is_expired());
        let loc = locator().with_ttl(NEVER);
        assert!(!loc.is_expired());
    }
}
