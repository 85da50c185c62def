//! Log-structured storage engine: the record codec, segment files, the
//! segment pool, the in-memory key index, the LRU eviction policy,
//! crash recovery, and merge/compaction.

pub mod crc32;
pub mod error;
pub mod eviction;
pub mod index;
pub mod merge;
pub mod pool;
pub mod record;
pub mod recovery;
pub mod segment;

pub use error::{StorageError, StorageResult};
pub use eviction::{EvictionPolicy, Lru};
pub use index::{KeyIndex, Locator, NEVER};
pub use merge::{merge, MergeStats};
pub use pool::SegmentPool;
pub use record::{decode, encode_data, encode_marker, Record, RecordState};
pub use recovery::{recover, RecoveryLimits};
pub use segment::Segment;
