//! Columns, their flags, and the priority/deletion rules that make
//! eventual consistency work (§3, §4.1).

use std::cmp::Ordering;

use crate::metadata::Metadata;

/// Column flags bitmask values.
pub mod flags {
    /// A live column with a real value.
    pub const LIVE: u8 = 0;
    /// A tombstone: the column has been deleted. Its `value` bytes hold the
    /// big-endian `i32` local deletion time (the wall-clock second at which
    /// the tombstone was written), matching the legacy on-disk convention
    /// this format's source codebase used for deleted columns.
    pub const TOMBSTONE: u8 = 1 << 0;
    /// The column carries a TTL and expires at `timestamp` plus some
    /// externally-tracked duration. Orthogonal to `TOMBSTONE`; carried
    /// through compaction unchanged (expiry-to-tombstone conversion is the
    /// write path's concern, out of scope here).
    pub const EXPIRING: u8 = 1 << 1;
}

/// The smallest addressable value in the store: `(name, value, timestamp,
/// flags)`. See §3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// The column name (the leaf name component of its `ColumnKey`).
    pub name: Vec<u8>,
    /// The payload. For a tombstone, this instead holds the serialized
    /// local deletion time (see [`flags::TOMBSTONE`]).
    pub value: Vec<u8>,
    /// Client-supplied write timestamp used for priority and deletion
    /// comparisons.
    pub timestamp: i64,
    /// Bitmask of [`flags`] values.
    pub flags: u8,
}

impl Column {
    /// Builds a live column.
    pub fn live(name: Vec<u8>, value: Vec<u8>, timestamp: i64) -> Self {
        Self {
            name,
            value,
            timestamp,
            flags: flags::LIVE,
        }
    }

    /// Builds a tombstone column. `local_deletion_time` is the wall-clock
    /// second the delete was written, used for GC eligibility.
    pub fn tombstone(name: Vec<u8>, timestamp: i64, local_deletion_time: i32) -> Self {
        Self {
            name,
            value: local_deletion_time.to_be_bytes().to_vec(),
            timestamp,
            flags: flags::TOMBSTONE,
        }
    }

    /// `true` if this column is a tombstone.
    pub fn is_tombstone(&self) -> bool {
        self.flags & flags::TOMBSTONE != 0
    }

    /// `true` if this column carries a TTL.
    pub fn is_expiring(&self) -> bool {
        self.flags & flags::EXPIRING != 0
    }

    /// The local deletion time encoded in a tombstone's value bytes, or
    /// `None` for a live column (or a malformed tombstone whose value isn't
    /// 4 bytes — treated as non-GC-eligible rather than panicking).
    pub fn local_deletion_time(&self) -> Option<i32> {
        if !self.is_tombstone() {
            return None;
        }
        let bytes: [u8; 4] = self.value.as_slice().try_into().ok()?;
        Some(i32::from_be_bytes(bytes))
    }

    /// Total order used to pick the winner among conflicting versions of the
    /// same column (§3): higher timestamp wins; on a timestamp tie a
    /// tombstone beats a live column; on a further tie the lexicographically
    /// greater value wins. Symmetric and transitive.
    pub fn compare_priority(&self, other: &Column) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.is_tombstone().cmp(&other.is_tombstone()))
            .then_with(|| self.value.cmp(&other.value))
    }

    /// Rough estimate of this column's serialized size in bytes, used to
    /// track slice/block size targets against `TARGET_MAX_SLICE_BYTES` and
    /// `TARGET_MAX_BLOCK_BYTES`. Need not be exact — those are soft targets.
    pub fn estimated_size(&self) -> u64 {
        (self.name.len() + self.value.len() + 2 + 8 + 1 + 4) as u64
    }

    /// `true` if this column must not survive compaction (§4.1, §4.4):
    ///
    /// - a live (or tombstone) column with `timestamp <= ancestor.markedForDeleteAt`
    ///   for any ancestor level is always dropped — the parent group's
    ///   delete shadows it regardless of compaction kind;
    /// - otherwise, a tombstone is dropped only under a **major** compaction
    ///   whose `local_deletion_time` is older than `gc_before` — a minor
    ///   compaction must retain it in case an un-included SSTable still
    ///   holds the value it shadows.
    pub fn is_deleted(&self, ancestor_meta: &Metadata, major: bool, gc_before: i32) -> bool {
        if ancestor_meta
            .pairs
            .iter()
            .any(|p| self.timestamp <= p.marked_for_delete_at)
        {
            return true;
        }
        if major && self.is_tombstone() {
            if let Some(ldt) = self.local_deletion_time() {
                return ldt < gc_before;
            }
        }
        false
    }
}
