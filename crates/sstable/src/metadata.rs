//! Per-parent-group tombstone bookkeeping (§3, §4.1).
//!
//! A `Metadata` record tracks, for one depth level of one parent group (a
//! row, or a super-column within a row), the strongest delete that has ever
//! been applied at or above that level — independent of which individual
//! columns happen to be present in a given SSTable.

/// One `(markedForDeleteAt, localDeletionTime)` pair recorded against a
/// single ancestor level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionMark {
    /// The highest write timestamp shadowed by this delete: any column with
    /// `timestamp <= marked_for_delete_at` at or below this level is gone.
    pub marked_for_delete_at: i64,
    /// The wall-clock second the delete was written, used for GC eligibility
    /// of the delete marker itself once nothing is left for it to shadow.
    pub local_deletion_time: i32,
}

/// Ordered per-level delete bookkeeping for a parent group. `pairs.len()`
/// tracks the key depth *D* the metadata was built for: depth-1 keys (plain
/// column families) have one pair (the row delete), depth-2 keys (super
/// column families) have two (row delete, then super-column delete).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub pairs: Vec<DeletionMark>,
}

impl Metadata {
    /// Builds a `Metadata` with no delete recorded at any of `depth` levels.
    pub fn empty(depth: usize) -> Self {
        Self {
            pairs: vec![
                DeletionMark {
                    marked_for_delete_at: i64::MIN,
                    local_deletion_time: i32::MIN,
                };
                depth
            ],
        }
    }

    /// Builds a `Metadata` directly from per-level pairs.
    pub fn from_pairs(pairs: Vec<DeletionMark>) -> Self {
        Self { pairs }
    }

    /// Merges two `Metadata` records for the same parent group (e.g. from
    /// two SSTables being compacted together) by taking the pairwise
    /// strongest delete at each level: the pair with the higher
    /// `marked_for_delete_at` wins outright; on a tie the higher
    /// `local_deletion_time` wins. Both inputs must share the same depth.
    pub fn resolve(&self, other: &Metadata) -> Metadata {
        assert_eq!(
            self.pairs.len(),
            other.pairs.len(),
            "cannot resolve metadata of differing depth"
        );
        let pairs = self
            .pairs
            .iter()
            .zip(other.pairs.iter())
            .map(|(a, b)| {
                if (a.marked_for_delete_at, a.local_deletion_time)
                    >= (b.marked_for_delete_at, b.local_deletion_time)
                {
                    *a
                } else {
                    *b
                }
            })
            .collect();
        Metadata { pairs }
    }

    /// `true` if no level of this metadata records a delete.
    pub fn is_empty(&self) -> bool {
        self.pairs
            .iter()
            .all(|p| p.marked_for_delete_at == i64::MIN)
    }
}
