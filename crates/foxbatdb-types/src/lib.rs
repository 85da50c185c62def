//! Shared newtypes used across the storage engine and the dispatch layer:
//! - Segment identity ([`SegmentId`])
//! - On-disk positions ([`ByteOffset`])
//! - Shard selection ([`DbIndex`])
//! - Record timestamps ([`MicroTimestamp`])

use std::fmt::{self, Display};
use std::ops::{Add, AddAssign};
use std::time::{SystemTime, UNIX_EPOCH};

/// Numeric suffix of a segment file (`foxbat-<n>.db`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId(u32);

impl SegmentId {
    pub const FIRST: SegmentId = SegmentId(0);

    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SegmentId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<SegmentId> for u32 {
    fn from(id: SegmentId) -> Self {
        id.0
    }
}

/// Byte position of a record header within its owning segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ByteOffset(u64);

impl ByteOffset {
    pub const ZERO: ByteOffset = ByteOffset(0);

    pub fn new(offset: u64) -> Self {
        Self(offset)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl Display for ByteOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for ByteOffset {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for ByteOffset {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl From<u64> for ByteOffset {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<ByteOffset> for u64 {
    fn from(offset: ByteOffset) -> Self {
        offset.0
    }
}

/// Shard selector. Valid range is `[0, dbMaxNum)`, enforced by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DbIndex(u8);

impl DbIndex {
    pub fn new(idx: u8) -> Self {
        Self(idx)
    }

    pub fn as_u8(self) -> u8 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl Display for DbIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for DbIndex {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<DbIndex> for u8 {
    fn from(idx: DbIndex) -> Self {
        idx.0
    }
}

/// Microseconds since the Unix epoch. Monotonic within one writer thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MicroTimestamp(u64);

impl MicroTimestamp {
    pub fn new(micros: u64) -> Self {
        Self(micros)
    }

    /// Reads the wall clock. Panics only if the system clock predates the
    /// Unix epoch, which cannot happen on any supported platform.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_micros() as u64;
        Self(micros)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for MicroTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for MicroTimestamp {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<MicroTimestamp> for u64 {
    fn from(ts: MicroTimestamp) -> Self {
        ts.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_id_ordering_follows_numeric_suffix() {
        assert!(SegmentId::new(1) < SegmentId::new(2));
        assert_eq!(SegmentId::FIRST.next(), SegmentId::new(1));
    }

    #[test]
    fn byte_offset_accumulates() {
        let mut off = ByteOffset::ZERO;
        off += ByteOffset::new(58);
        off += ByteOffset::new(12);
        assert_eq!(off.as_u64(), 70);
    }

    #[test]
    fn db_index_roundtrips_through_u8() {
        let idx = DbIndex::new(3);
        assert_eq!(u8::from(idx), 3);
    }
}
