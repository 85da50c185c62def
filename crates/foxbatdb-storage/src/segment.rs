//! A single append-only segment file, `foxbat-<n>.db`.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use foxbatdb_types::{ByteOffset, SegmentId};

use crate::error::StorageResult;

pub fn segment_filename(id: SegmentId) -> String {
    format!("foxbat-{}.db", id.as_u32())
}

/// One append-only segment. Reads and writes share the same handle; writes
/// always land at end-of-file regardless of any prior seek performed for a
/// read, since every append re-seeks to the end first.
#[derive(Debug)]
pub struct Segment {
    pub id: SegmentId,
    path: PathBuf,
    file: File,
    /// Cached length, kept in sync with every append so size checks avoid a
    /// syscall on the hot path.
    len: u64,
    sealed: bool,
}

impl Segment {
    pub fn create(dir: &Path, id: SegmentId) -> StorageResult<Self> {
        let path = dir.join(segment_filename(id));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            id,
            path,
            file,
            len,
            sealed: false,
        })
    }

    pub fn open_existing(path: PathBuf, id: SegmentId) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).append(true).open(&path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            id,
            path,
            file,
            len,
            sealed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Appends `bytes` at end-of-file and flushes to the OS buffer cache.
    /// Returns the starting offset of the write. Does not fsync: the
    /// operation-log writer is the durability boundary for the write path.
    pub fn append(&mut self, bytes: &[u8]) -> StorageResult<ByteOffset> {
        let start = self.len;
        self.file.write_all(bytes)?;
        self.file.flush()?;
        self.len += bytes.len() as u64;
        Ok(ByteOffset::new(start))
    }

    /// Reads `len` bytes starting at `offset`. Deterministic for sealed
    /// segments; for the writable tail it reflects whatever has been
    /// appended so far.
    pub fn read_at(&mut self, offset: ByteOffset, len: usize) -> StorageResult<Bytes> {
        let mut buf = vec![0u8; len];
        self.file.seek(SeekFrom::Start(offset.as_u64()))?;
        self.file.read_exact(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    /// Reads the remainder of the segment starting at `offset`, used by
    /// recovery to scan forward without knowing record boundaries ahead of
    /// time.
    pub fn read_tail(&mut self, offset: ByteOffset) -> StorageResult<Bytes> {
        let remaining = self.len.saturating_sub(offset.as_u64()) as usize;
        self.read_at(offset, remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let mut seg = Segment::create(dir.path(), SegmentId::new(0)).unwrap();
        let off1 = seg.append(b"abc").unwrap();
        let off2 = seg.append(b"defg").unwrap();
        assert_eq!(off1.as_u64(), 0);
        assert_eq!(off2.as_u64(), 3);
        assert_eq!(seg.len(), 7);

        let read = seg.read_at(ByteOffset::new(3), 4).unwrap();
        assert_eq!(read.as_ref(), b"defg");
    }

    #[test]
    fn reopen_preserves_length() {
        let dir = tempdir().unwrap();
        let path = {
            let mut seg = Segment::create(dir.path(), SegmentId::new(0)).unwrap();
            seg.append(b"hello").unwrap();
            seg.path().to_path_buf()
        };
        let seg = Segment::open_existing(path, SegmentId::new(0)).unwrap();
        assert_eq!(seg.len(), 5);
    }
}
