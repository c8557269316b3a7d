//! Hierarchical column keys, decorated keys, and the comparator contracts
//! that a real deployment's partitioner and column-family schema would
//! plug in (§4.1, §6 "Collaborator contracts").

use std::cmp::Ordering;
use std::sync::Arc;

/// A partitioner-produced comparison key for a row: an opaque token plus the
/// raw row-key bytes that produced it. Two decorated keys are compared first
/// by token, then by raw bytes — this is the only ordering contract the core
/// requires from a partitioner.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecoratedKey {
    /// Partitioner-assigned token. Opaque to the core; only its byte order
    /// matters.
    pub token: Vec<u8>,
    /// The original row-key bytes.
    pub raw: Vec<u8>,
}

impl DecoratedKey {
    /// Builds a decorated key from raw parts.
    pub fn new(token: Vec<u8>, raw: Vec<u8>) -> Self {
        Self { token, raw }
    }
}

impl Ord for DecoratedKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.token.cmp(&other.token).then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for DecoratedKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Produces a [`DecoratedKey`] from a raw row key. A real deployment's
/// partitioner (consistent hashing, range partitioning, ...) implements this;
/// the core only relies on the resulting total order.
pub trait Partitioner: Send + Sync {
    /// Decorates `raw` with this partitioner's token.
    fn decorate_key(&self, raw: &[u8]) -> DecoratedKey;
}

/// A partitioner whose "token" is just the raw key bytes themselves, giving
/// plain lexicographic row ordering. Used by the CLI and by tests; a real
/// deployment supplies its own partitioner over the same trait.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytewisePartitioner;

impl Partitioner for BytewisePartitioner {
    fn decorate_key(&self, raw: &[u8]) -> DecoratedKey {
        DecoratedKey::new(raw.to_vec(), raw.to_vec())
    }
}

/// A total order on one column-family level's name-component bytes. Each
/// depth of a [`ColumnKey`] may have its own comparator (e.g. a row's column
/// names might compare differently than its super-column names).
pub trait NameComparator: Send + Sync {
    /// Compares two real (non-sentinel) name components at this level.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Plain byte-lexicographic name comparator. The default for both levels
/// unless a column family configures something else (e.g. a numeric or
/// reversed comparator).
#[derive(Debug, Default, Clone, Copy)]
pub struct BytewiseNameComparator;

impl NameComparator for BytewiseNameComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// One component of a [`ColumnKey`]'s name sequence: either a real byte
/// string or one of the two sentinels that bound natural subranges.
/// `Begin` sorts before every real name at its level; `End` sorts after.
/// Sentinels are never persisted as real column data — they only appear as
/// `start_key`/`end_key` roundings at slice boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Name {
    /// Sorts before every real name component at this level.
    Begin,
    /// A real, persisted name component.
    Real(Vec<u8>),
    /// Sorts after every real name component at this level.
    End,
}

impl Name {
    /// Returns the real bytes, if this is not a sentinel.
    pub fn as_real(&self) -> Option<&[u8]> {
        match self {
            Name::Real(b) => Some(b),
            _ => None,
        }
    }

    /// `true` for `Begin` or `End`.
    pub fn is_sentinel(&self) -> bool {
        !matches!(self, Name::Real(_))
    }
}

/// A hierarchical column key: a decorated row key plus an ordered sequence
/// of name components. `names.len()` is the key's depth *D* — 1 for
/// standard column families, 2 for "super" column families.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnKey {
    /// The decorated row key.
    pub dk: DecoratedKey,
    /// Ordered name components; the last is the column name, earlier ones
    /// are parent (super-column) group names.
    pub names: Vec<Name>,
}

impl ColumnKey {
    /// Builds a key with all-real name components.
    pub fn new(dk: DecoratedKey, names: Vec<Vec<u8>>) -> Self {
        Self {
            dk,
            names: names.into_iter().map(Name::Real).collect(),
        }
    }

    /// Builds a key from already-constructed name components, which may
    /// include `Begin`/`End` sentinels (used when deserializing a rounded
    /// boundary key from disk).
    pub fn from_names(dk: DecoratedKey, names: Vec<Name>) -> Self {
        Self { dk, names }
    }

    /// The key's depth *D* (number of name components).
    pub fn depth(&self) -> usize {
        self.names.len()
    }

    /// Returns a clone with the final (depth `D`) name component replaced,
    /// used to round a slice's `end_key` up to [`Name::End`] or a slice's
    /// `start_key` down to [`Name::Begin`] at a natural boundary.
    pub fn with_last_name(&self, name: Name) -> ColumnKey {
        let mut k = self.clone();
        if let Some(last) = k.names.last_mut() {
            *last = name;
        }
        k
    }

    /// Rounds the final name component up to [`Name::End`].
    pub fn rounded_end(&self) -> ColumnKey {
        self.with_last_name(Name::End)
    }

    /// Rounds the final name component down to [`Name::Begin`].
    pub fn rounded_begin(&self) -> ColumnKey {
        self.with_last_name(Name::Begin)
    }

    /// `true` if `self` and `other` share the same decorated key and the
    /// same first `D-1` name components — i.e. they belong to the same
    /// natural parent group (§3 "natural subrange").
    pub fn same_parent_group(&self, other: &ColumnKey) -> bool {
        if self.dk != other.dk || self.names.len() != other.names.len() {
            return false;
        }
        let parent_len = self.names.len().saturating_sub(1);
        self.names[..parent_len] == other.names[..parent_len]
    }
}

/// Bundles a partitioner with one [`NameComparator`] per depth level and
/// implements `compare(a, b, d)` from §4.1. Threaded explicitly into the
/// writer, reader, and compaction iterator constructors rather than
/// resolved from a global — per-column-family configuration, not a
/// process-wide singleton.
pub struct KeyComparator {
    partitioner: Arc<dyn Partitioner>,
    name_comparators: Vec<Arc<dyn NameComparator>>,
}

impl KeyComparator {
    /// Builds a comparator for keys of the given depth, all levels using the
    /// supplied partitioner and per-level name comparators.
    ///
    /// # Panics
    ///
    /// Panics if `name_comparators` is empty.
    pub fn new(partitioner: Arc<dyn Partitioner>, name_comparators: Vec<Arc<dyn NameComparator>>) -> Self {
        assert!(!name_comparators.is_empty(), "depth must be >= 1");
        Self {
            partitioner,
            name_comparators,
        }
    }

    /// A byte-lexicographic comparator for a standard (depth-1) column
    /// family. Used by the CLI and tests; a real deployment supplies its
    /// own partitioner/comparators via [`KeyComparator::new`].
    pub fn bytewise(depth: usize) -> Self {
        Self::new(
            Arc::new(BytewisePartitioner),
            (0..depth).map(|_| Arc::new(BytewiseNameComparator) as Arc<dyn NameComparator>).collect(),
        )
    }

    /// The partitioner's own ordering contract, exposed for callers that
    /// need to decorate a raw key before constructing a [`ColumnKey`].
    pub fn decorate(&self, raw: &[u8]) -> DecoratedKey {
        self.partitioner.decorate_key(raw)
    }

    /// Compares one name component at level `i`, honoring the `Begin`/`End`
    /// sentinels regardless of the configured comparator (`compareAt` in
    /// §4.1).
    pub fn compare_at(&self, a: &Name, b: &Name, level: usize) -> Ordering {
        match (a, b) {
            (Name::Begin, Name::Begin) | (Name::End, Name::End) => Ordering::Equal,
            (Name::Begin, _) => Ordering::Less,
            (_, Name::Begin) => Ordering::Greater,
            (Name::End, _) => Ordering::Greater,
            (_, Name::End) => Ordering::Less,
            (Name::Real(x), Name::Real(y)) => self.name_comparators[level].compare(x, y),
        }
    }

    /// The total order on [`ColumnKey`] at depth `d` ∈ `[0, D]`: compares
    /// the decorated key first, then the first `d` name components.
    pub fn compare(&self, a: &ColumnKey, b: &ColumnKey, d: usize) -> Ordering {
        let dk_ord = a.dk.cmp(&b.dk);
        if dk_ord != Ordering::Equal {
            return dk_ord;
        }
        for level in 0..d {
            let ord = self.compare_at(&a.names[level], &b.names[level], level);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Compares at the key's full depth *D*.
    pub fn compare_full(&self, a: &ColumnKey, b: &ColumnKey) -> Ordering {
        self.compare(a, b, a.names.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(raw: &[u8], names: &[&[u8]]) -> ColumnKey {
        let dk = DecoratedKey::new(raw.to_vec(), raw.to_vec());
        ColumnKey::new(dk, names.iter().map(|n| n.to_vec()).collect())
    }

    #[test]
    fn compares_by_decorated_key_first() {
        let cmp = KeyComparator::bytewise(1);
        let a = key(b"a", &[b"x"]);
        let b = key(b"b", &[b"a"]);
        assert_eq!(cmp.compare_full(&a, &b), Ordering::Less);
    }

    #[test]
    fn compares_by_name_on_equal_dk() {
        let cmp = KeyComparator::bytewise(1);
        let a = key(b"k", &[b"c1"]);
        let b = key(b"k", &[b"c2"]);
        assert_eq!(cmp.compare_full(&a, &b), Ordering::Less);
    }

    #[test]
    fn sentinels_bound_real_names() {
        let cmp = KeyComparator::bytewise(1);
        assert_eq!(cmp.compare_at(&Name::Begin, &Name::Real(b"a".to_vec()), 0), Ordering::Less);
        assert_eq!(cmp.compare_at(&Name::End, &Name::Real(b"z".to_vec()), 0), Ordering::Greater);
        assert_eq!(cmp.compare_at(&Name::Begin, &Name::End, 0), Ordering::Less);
    }

    #[test]
    fn depth_at_zero_ignores_names() {
        let cmp = KeyComparator::bytewise(1);
        let a = key(b"k", &[b"zzz"]);
        let b = key(b"k", &[b"aaa"]);
        assert_eq!(cmp.compare(&a, &b, 0), Ordering::Equal);
    }

    #[test]
    fn same_parent_group_depth_two() {
        let dk = DecoratedKey::new(b"row".to_vec(), b"row".to_vec());
        let a = ColumnKey::new(dk.clone(), vec![b"group1".to_vec(), b"c1".to_vec()]);
        let b = ColumnKey::new(dk, vec![b"group1".to_vec(), b"c2".to_vec()]);
        assert!(a.same_parent_group(&b));
    }

    #[test]
    fn rounded_end_and_begin_only_touch_last_component() {
        let k = key(b"row", &[b"group", b"col"]);
        let end = k.rounded_end();
        assert_eq!(end.names[0], Name::Real(b"group".to_vec()));
        assert_eq!(end.names[1], Name::End);
        let begin = k.rounded_begin();
        assert_eq!(begin.names[1], Name::Begin);
    }
}
