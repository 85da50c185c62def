//! Memory-bounded eviction policy over the key index.
//!
//! Two variants selectable by configuration (modeled as a tagged enum per
//! the project's policy-adapter convention, not a trait object): `NoEviction`
//! and `Lru`. `Lru` is a slab (`Vec<Option<Entry<K>>>`) plus a `HashMap<K,
//! usize>` index, with explicit `prev`/`next` links forming an intrusive
//! doubly linked list — the head is least-recently-used, the tail is
//! most-recently-used.

use std::collections::HashMap;
use std::hash::Hash;

const NIL: usize = usize::MAX;

struct Entry<K> {
    key: K,
    prev: usize,
    next: usize,
}

/// True least-recently-used eviction: `touch` always moves a key to the MRU
/// end; `evict` always removes the LRU end.
pub struct Lru<K> {
    slab: Vec<Option<Entry<K>>>,
    index: HashMap<K, usize>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
}

impl<K: Eq + Hash + Clone> Lru<K> {
    pub fn new() -> Self {
        Self {
            slab: Vec::new(),
            index: HashMap::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Moves `key` to the MRU end, inserting it if absent.
    pub fn touch(&mut self, key: K) {
        if let Some(&slot) = self.index.get(&key) {
            self.unlink(slot);
            self.push_back(slot);
            return;
        }
        let slot = self.alloc_slot(key.clone());
        self.index.insert(key, slot);
        self.push_back(slot);
    }

    /// Removes `key` from tracking without evicting anything else, used
    /// when the shard deletes the key directly.
    pub fn remove(&mut self, key: &K) {
        if let Some(slot) = self.index.remove(key) {
            self.unlink(slot);
            self.slab[slot] = None;
            self.free.push(slot);
        }
    }

    /// Removes and returns the least-recently-used key.
    pub fn evict(&mut self) -> Option<K> {
        if self.head == NIL {
            return None;
        }
        let slot = self.head;
        let key = self.slab[slot].as_ref().unwrap().key.clone();
        self.unlink(slot);
        self.slab[slot] = None;
        self.free.push(slot);
        self.index.remove(&key);
        Some(key)
    }

    fn alloc_slot(&mut self, key: K) -> usize {
        let entry = Entry {
            key,
            prev: NIL,
            next: NIL,
        };
        if let Some(slot) = self.free.pop() {
            self.slab[slot] = Some(entry);
            slot
        } else {
            self.slab.push(Some(entry));
            self.slab.len() - 1
        }
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = {
            let entry = self.slab[slot].as_ref().unwrap();
            (entry.prev, entry.next)
        };
        if prev != NIL {
            self.slab[prev].as_mut().unwrap().next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.slab[next].as_mut().unwrap().prev = prev;
        } else {
            self.tail = prev;
        }
    }

    fn push_back(&mut self, slot: usize) {
        let entry = self.slab[slot].as_mut().unwrap();
        entry.prev = self.tail;
        entry.next = NIL;
        if self.tail != NIL {
            self.slab[self.tail].as_mut().unwrap().next = slot;
        } else {
            self.head = slot;
        }
        self.tail = slot;
    }
}

impl<K: Eq + Hash + Clone> Default for Lru<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Eviction policy selector. The write path touches whichever variant is
/// configured; `NoEviction::release` is a no-op, and callers that see
/// allocation pressure must raise `MemoryOut` themselves in that case.
pub enum EvictionPolicy<K> {
    NoEviction,
    Lru(Lru<K>),
}

impl<K: Eq + Hash + Clone> EvictionPolicy<K> {
    pub fn touch(&mut self, key: K) {
        if let Self::Lru(lru) = self {
            lru.touch(key);
        }
    }

    pub fn remove(&mut self, key: &K) {
        if let Self::Lru(lru) = self {
            lru.remove(key);
        }
    }

    /// Evicts one key, if the policy supports eviction and has a candidate.
    pub fn evict(&mut self) -> Option<K> {
        match self {
            Self::NoEviction => None,
            Self::Lru(lru) => lru.evict(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::NoEviction => true,
            Self::Lru(lru) => lru.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let mut lru = Lru::new();
        lru.touch("a");
        lru.touch("b");
        lru.touch("c");
        // touching "a" makes "b" the new LRU
        lru.touch("a");
        assert_eq!(lru.evict(), Some("b"));
        assert_eq!(lru.evict(), Some("c"));
        assert_eq!(lru.evict(), Some("a"));
        assert_eq!(lru.evict(), None);
    }

    #[test]
    fn remove_drops_candidate_without_evicting_others() {
        let mut lru = Lru::new();
        lru.touch("a");
        lru.touch("b");
        lru.remove(&"a");
        assert_eq!(lru.evict(), Some("b"));
        assert!(lru.is_empty());
    }

    #[test]
    fn no_eviction_never_produces_a_candidate() {
        let mut policy: EvictionPolicy<&str> = EvictionPolicy::NoEviction;
        policy.touch("a");
        assert_eq!(policy.evict(), None);
    }
}
