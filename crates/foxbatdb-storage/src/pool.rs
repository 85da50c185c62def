//! Ordered collection of segments with exactly one writable tail.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use foxbatdb_types::{ByteOffset, SegmentId};

use crate::error::{StorageError, StorageResult};
use crate::segment::{segment_filename, Segment};

fn parse_segment_filename(name: &str) -> Option<SegmentId> {
    let digits = name.strip_prefix("foxbat-")?.strip_suffix(".db")?;
    digits.parse::<u32>().ok().map(SegmentId::new)
}

/// Segments ordered by numeric suffix, with the highest-numbered segment
/// open for writes.
pub struct SegmentPool {
    dir: PathBuf,
    segments: BTreeMap<SegmentId, Segment>,
    tail: SegmentId,
    max_segment_size: u64,
}

impl SegmentPool {
    /// Opens (or creates) the segment directory, enumerating any existing
    /// `foxbat-<n>.db` files and opening each read-write. The
    /// highest-numbered segment becomes the writable tail; if the directory
    /// is empty a fresh segment 0 is created.
    pub fn open(dir: &Path, max_segment_size: u64) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;
        let mut segments = BTreeMap::new();

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(id) = parse_segment_filename(name) else {
                continue;
            };
            let segment = Segment::open_existing(entry.path(), id)?;
            segments.insert(id, segment);
        }

        let tail = if let Some((&max_id, _)) = segments.iter().next_back() {
            max_id
        } else {
            let seg = Segment::create(dir, SegmentId::FIRST)?;
            segments.insert(SegmentId::FIRST, seg);
            SegmentId::FIRST
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            segments,
            tail,
            max_segment_size,
        })
    }

    pub fn tail_id(&self) -> SegmentId {
        self.tail
    }

    /// Ordered iteration, lowest segment id first. Used by recovery.
    pub fn ids_in_order(&self) -> impl Iterator<Item = SegmentId> + '_ {
        self.segments.keys().copied()
    }

    pub fn segment(&self, id: SegmentId) -> Option<&Segment> {
        self.segments.get(&id)
    }

    pub fn read_at(&mut self, id: SegmentId, offset: ByteOffset, len: usize) -> StorageResult<Bytes> {
        let segment = self
            .segments
            .get_mut(&id)
            .ok_or(StorageError::NoWritableSegment)?;
        segment.read_at(offset, len)
    }

    pub fn read_tail(&mut self, id: SegmentId, offset: ByteOffset) -> StorageResult<Bytes> {
        let segment = self
            .segments
            .get_mut(&id)
            .ok_or(StorageError::NoWritableSegment)?;
        segment.read_tail(offset)
    }

    /// Appends `bytes` to the writable tail, rotating to a new segment first
    /// if the tail has exceeded `max_segment_size`. Returns the segment the
    /// record landed in plus its offset within that segment.
    pub fn append(&mut self, bytes: &[u8]) -> StorageResult<(SegmentId, ByteOffset)> {
        if self.tail_segment()?.len() >= self.max_segment_size {
            self.rotate()?;
        }
        let offset = self.tail_segment_mut()?.append(bytes)?;
        Ok((self.tail, offset))
    }

    fn tail_segment(&self) -> StorageResult<&Segment> {
        self.segments
            .get(&self.tail)
            .ok_or(StorageError::NoWritableSegment)
    }

    fn tail_segment_mut(&mut self) -> StorageResult<&mut Segment> {
        self.segments
            .get_mut(&self.tail)
            .ok_or(StorageError::NoWritableSegment)
    }

    fn rotate(&mut self) -> StorageResult<()> {
        if let Some(seg) = self.segments.get_mut(&self.tail) {
            seg.seal();
        }
        let next = self.tail.next();
        let segment = Segment::create(&self.dir, next)?;
        self.segments.insert(next, segment);
        self.tail = next;
        Ok(())
    }

    /// Inserts a merge segment at `id`, sealing everything before it and
    /// removing their files, then renumbers the survivors to the canonical
    /// `0..k` sequence with the merge segment's successor becoming the new
    /// tail. Used by the merge procedure (component H).
    pub fn replace_with_merge(
        &mut self,
        merge_path: &Path,
        cutoff: SegmentId,
    ) -> StorageResult<()> {
        let stale_ids: Vec<SegmentId> = self.segments.keys().copied().filter(|&id| id < cutoff).collect();
        let mut survivors: Vec<(SegmentId, PathBuf)> = self
            .segments
            .iter()
            .filter(|(&id, _)| id >= cutoff)
            .map(|(&id, segment)| (id, segment.path().to_path_buf()))
            .collect();
        survivors.sort_by_key(|(id, _)| *id);

        for id in &stale_ids {
            if let Some(segment) = self.segments.remove(id) {
                let path = segment.path().to_path_buf();
                drop(segment);
                let _ = fs::remove_file(path);
            }
        }

        let renumbered_merge = SegmentId::FIRST;
        let merge_target = self.dir.join(segment_filename(renumbered_merge));
        fs::rename(merge_path, &merge_target)?;

        let mut new_segments = BTreeMap::new();
        new_segments.insert(
            renumbered_merge,
            Segment::open_existing(merge_target, renumbered_merge)?,
        );

        let mut next_id = renumbered_merge.next();
        for (_old_id, old_path) in survivors {
            let new_path = self.dir.join(segment_filename(next_id));
            if old_path != new_path {
                fs::rename(&old_path, &new_path)?;
            }
            new_segments.insert(next_id, Segment::open_existing(new_path, next_id)?);
            next_id = next_id.next();
        }

        self.tail = *new_segments
            .keys()
            .next_back()
            .expect("merge always leaves at least the merge segment");
        self.segments = new_segments;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fresh_directory_creates_segment_zero() {
        let dir = tempdir().unwrap();
        let pool = SegmentPool::open(dir.path(), 1024).unwrap();
        assert_eq!(pool.tail_id(), SegmentId::FIRST);
    }

    #[test]
    fn rotation_advances_tail_on_size_cap() {
        let dir = tempdir().unwrap();
        let mut pool = SegmentPool::open(dir.path(), 8).unwrap();
        pool.append(b"12345678").unwrap();
        let (seg_id, _) = pool.append(b"x").unwrap();
        assert_eq!(seg_id, SegmentId::new(1));
        assert_eq!(pool.tail_id(), SegmentId::new(1));
    }

    #[test]
    fn reopen_discovers_existing_segments_in_order() {
        let dir = tempdir().unwrap();
        {
            let mut pool = SegmentPool::open(dir.path(), 8).unwrap();
            pool.append(b"12345678").unwrap();
            pool.append(b"x").unwrap();
        }
        let pool = SegmentPool::open(dir.path(), 8).unwrap();
        let ids: Vec<_> = pool.ids_in_order().collect();
        assert_eq!(ids, vec![SegmentId::new(0), SegmentId::new(1)]);
        assert_eq!(pool.tail_id(), SegmentId::new(1));
    }
}
