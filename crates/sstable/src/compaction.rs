//! The compaction merge iterator (§4.4): heap-merges several scanners into
//! one monotonically non-decreasing output stream of [`Slice`]s, applying
//! column priority, metadata resolution, and tombstone GC along the way.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;

use config::Config;

use crate::column::Column;
use crate::error::Result;
use crate::key::{ColumnKey, KeyComparator, Name};
use crate::metadata::Metadata;
use crate::scanner::Scanner;
use crate::slice::Slice;
use crate::writer::Writer;

/// One entry in the merge buffer: either a parent group's resolved metadata
/// or one surviving column. Kept as a tagged enum rather than `Box<dyn
/// Any>` or a trait object — the buffer is on the hot path of every
/// compaction and the two variants are known up front (§9, "avoid dynamic
/// dispatch in the merge buffer").
#[derive(Debug, Clone)]
enum BufferEntry {
    Metadata { key: ColumnKey, meta: Metadata },
    Column { key: ColumnKey, column: Column },
}

impl BufferEntry {
    fn key(&self) -> &ColumnKey {
        match self {
            BufferEntry::Metadata { key, .. } => key,
            BufferEntry::Column { key, .. } => key,
        }
    }

    fn is_metadata(&self) -> bool {
        matches!(self, BufferEntry::Metadata { .. })
    }
}

/// Running counters for one compaction run, logged at completion and handed
/// back to the caller for its own bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Output slices emitted.
    pub slices_emitted: u64,
    /// Columns that survived into the output.
    pub columns_emitted: u64,
    /// Columns dropped because they were shadowed by an ancestor's delete
    /// (`timestamp <= marked_for_delete_at`).
    pub columns_dropped_shadowed: u64,
    /// Tombstones dropped because a major compaction GC'd them past
    /// `gc_before`.
    pub columns_dropped_tombstone: u64,
}

struct OutputBuilder {
    start_key: ColumnKey,
    last_key: ColumnKey,
    columns: Vec<Column>,
    bytes: u64,
}

/// Heap-merges N scanners (one per input SSTable) into a single
/// monotonically non-decreasing stream of output [`Slice`]s.
///
/// Not an [`Iterator`] of infallible items: each pull can fail, so
/// [`CompactionIterator::next_slice`] is the primitive and the
/// [`Iterator`] impl just wraps it. Construction primes every scanner with
/// one `next()` call and pushes the live ones onto a `BinaryHeap` ordered
/// by current slice key (§4.3's `Ord` impl on [`Scanner`]); every pull after
/// that drains the merge buffer and the scanner queue in lock-step (§4.4
/// "Scheduling").
pub struct CompactionIterator {
    heap: BinaryHeap<Reverse<Scanner>>,
    buffer: VecDeque<BufferEntry>,
    comparator: Arc<KeyComparator>,
    depth: usize,
    gc_before: i32,
    major: bool,
    config: Config,

    active_meta: Metadata,
    current: Option<OutputBuilder>,
    done: bool,
    stats: CompactionStats,
}

impl CompactionIterator {
    /// Builds an iterator over `scanners`, priming each with one `next()`
    /// call. A scanner that is already exhausted is closed immediately and
    /// never enters the merge.
    pub fn new(
        scanners: Vec<Scanner>,
        comparator: Arc<KeyComparator>,
        depth: usize,
        gc_before: i32,
        major: bool,
        config: Config,
    ) -> Result<Self> {
        let mut heap = BinaryHeap::with_capacity(scanners.len());
        for mut scanner in scanners {
            if scanner.next()? {
                heap.push(Reverse(scanner));
            } else {
                scanner.close()?;
            }
        }
        Ok(Self {
            heap,
            buffer: VecDeque::new(),
            comparator,
            depth,
            gc_before,
            major,
            config,
            active_meta: Metadata::empty(depth),
            current: None,
            done: false,
            stats: CompactionStats::default(),
        })
    }

    /// Pulls the next output slice, or `None` once every input scanner and
    /// the merge buffer are exhausted.
    pub fn next_slice(&mut self) -> Result<Option<Slice>> {
        loop {
            if self.done {
                return Ok(None);
            }
            if !self.ensure_merge_buffer()? {
                self.done = true;
                return Ok(self.finish_output());
            }
            let entry = self
                .buffer
                .pop_front()
                .expect("ensure_merge_buffer guarantees a non-empty buffer");
            match entry {
                BufferEntry::Metadata { key, meta } => {
                    let finished = self.finish_output();
                    self.active_meta = meta.clone();
                    self.current = Some(OutputBuilder {
                        start_key: key.clone(),
                        last_key: key,
                        columns: Vec::new(),
                        bytes: 0,
                    });
                    if finished.is_some() {
                        return Ok(finished);
                    }
                }
                BufferEntry::Column { key, column } => {
                    if self.current.is_none() {
                        self.current = Some(OutputBuilder {
                            start_key: key.clone(),
                            last_key: key.clone(),
                            columns: Vec::new(),
                            bytes: 0,
                        });
                    }
                    if column.is_deleted(&self.active_meta, self.major, self.gc_before) {
                        self.record_drop(&column);
                        continue;
                    }
                    self.stats.columns_emitted += 1;
                    let builder = self.current.as_mut().expect("set above");
                    builder.bytes += column.estimated_size();
                    builder.last_key = key;
                    builder.columns.push(column);
                    if builder.bytes >= self.config.target_max_slice_bytes {
                        let finished = self.finish_output();
                        if finished.is_some() {
                            return Ok(finished);
                        }
                    }
                }
            }
        }
    }

    /// Determines the minimum key over `{merge buffer head, scanner queue
    /// head}`, drains every scanner whose current slice belongs to that
    /// minimum's parent group into the buffer, and re-queues each drained
    /// scanner (or closes it at EOF). Returns `false` only when both the
    /// buffer and the queue are empty — the whole merge is finished.
    ///
    /// Eligibility is judged at `group_depth` (one level shallower than the
    /// full key depth), not the full depth: two input slices for the same
    /// row can start at different real leaf columns (each input only knows
    /// its own columns), so comparing at full depth would let one scanner's
    /// slice sit in the heap — unadmitted — while the other's metadata and
    /// columns are already being popped off the buffer, splitting one row's
    /// metadata across two drain rounds instead of resolving it in one.
    /// Comparing at the group level instead batches every scanner currently
    /// sitting on the same parent group together, so `merge_into_buffer`
    /// sees (and resolves) all of that group's metadata before any of its
    /// columns reach `next_slice`.
    fn ensure_merge_buffer(&mut self) -> Result<bool> {
        let group_depth = self.depth.saturating_sub(1);
        let buffer_head = self.buffer.front().map(|e| e.key().clone());
        let heap_head = self
            .heap
            .peek()
            .map(|Reverse(s)| s.get().expect("primed scanners always have a current slice").start_key.clone());

        let min_key = match (&buffer_head, &heap_head) {
            (None, None) => return Ok(false),
            (Some(b), None) => b.clone(),
            (None, Some(h)) => h.clone(),
            (Some(b), Some(h)) => {
                if self.comparator.compare(b, h, group_depth) != Ordering::Greater {
                    b.clone()
                } else {
                    h.clone()
                }
            }
        };

        while let Some(Reverse(scanner)) = self.heap.peek() {
            let cur_key = &scanner
                .get()
                .expect("primed scanners always have a current slice")
                .start_key;
            if self.comparator.compare(cur_key, &min_key, group_depth) == Ordering::Greater {
                break;
            }
            let Reverse(mut scanner) = self.heap.pop().expect("just peeked");
            let slice = scanner
                .get()
                .cloned()
                .expect("primed scanners always have a current slice");
            self.merge_into_buffer(slice);
            if scanner.next()? {
                self.heap.push(Reverse(scanner));
            } else {
                scanner.close()?;
            }
        }
        Ok(true)
    }

    /// Folds one input slice into the merge buffer: a metadata entry for
    /// the slice's parent group, then one column entry per surviving
    /// column, two-way merged against whatever the buffer already holds.
    /// Ties resolve by [`Metadata::resolve`] for two metadata entries or by
    /// [`Column::compare_priority`] for two columns at the same key.
    ///
    /// The metadata entry is keyed at the parent group's `NAME_BEGIN`
    /// rather than the slice's own (possibly leaf-real) `start_key`: two
    /// input slices for the same row almost never start at the same leaf
    /// column, so keying at the literal start key would scatter a row's
    /// metadata across several buffer entries that never compare equal and
    /// so never `resolve` together. Anchoring at the rounded begin key
    /// collapses every input's metadata for one parent group onto a single
    /// buffer key, so a row tombstone from one SSTable is guaranteed to
    /// merge with (and shadow) a live column from another before that
    /// column is ever tested against `active_meta`.
    fn merge_into_buffer(&mut self, slice: Slice) {
        let mut incoming = Vec::with_capacity(slice.columns.len() + 1);
        incoming.push(BufferEntry::Metadata {
            key: slice.start_key.rounded_begin(),
            meta: slice.meta,
        });
        for col in slice.columns {
            let key = slice.start_key.with_last_name(Name::Real(col.name.clone()));
            incoming.push(BufferEntry::Column { key, column: col });
        }

        let left: Vec<BufferEntry> = self.buffer.drain(..).collect();
        let mut merged = VecDeque::with_capacity(left.len() + incoming.len());
        let (mut li, mut ri) = (0usize, 0usize);
        while li < left.len() && ri < incoming.len() {
            match self.entry_order(&left[li], &incoming[ri]) {
                Ordering::Less => {
                    merged.push_back(left[li].clone());
                    li += 1;
                }
                Ordering::Greater => {
                    merged.push_back(incoming[ri].clone());
                    ri += 1;
                }
                Ordering::Equal => {
                    match (&left[li], &incoming[ri]) {
                        (BufferEntry::Metadata { meta: a, .. }, BufferEntry::Metadata { meta: b, key }) => {
                            merged.push_back(BufferEntry::Metadata {
                                key: key.clone(),
                                meta: a.resolve(b),
                            });
                        }
                        (BufferEntry::Column { column: a, .. }, BufferEntry::Column { column: b, key }) => {
                            let winner = if a.compare_priority(b) == Ordering::Less { b } else { a };
                            merged.push_back(BufferEntry::Column {
                                key: key.clone(),
                                column: winner.clone(),
                            });
                        }
                        _ => unreachable!("entry_order ties only same-variant entries"),
                    }
                    li += 1;
                    ri += 1;
                }
            }
        }
        merged.extend(left[li..].iter().cloned());
        merged.extend(incoming[ri..].iter().cloned());
        self.buffer = merged;
    }

    /// Total order on buffer entries: by key at this merge's depth, then
    /// metadata before column on an exact key tie (a slice's metadata entry
    /// always logically precedes its own columns).
    fn entry_order(&self, a: &BufferEntry, b: &BufferEntry) -> Ordering {
        self.comparator
            .compare(a.key(), b.key(), self.depth)
            .then_with(|| match (a.is_metadata(), b.is_metadata()) {
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                _ => Ordering::Equal,
            })
    }

    /// Closes out the in-progress output builder, dropping it instead of
    /// emitting a [`Slice`] if it ended up with no surviving columns and its
    /// metadata itself is GC-eligible (empty, or — under a major compaction
    /// — every level's tombstone is older than `gc_before`). Boundary
    /// rounding is left entirely to [`Writer::append_slice`], which
    /// recomputes natural vs. artificial transitions from consecutively
    /// appended slices exactly as [`Writer::append`] does for raw columns.
    fn finish_output(&mut self) -> Option<Slice> {
        let builder = self.current.take()?;
        let meta = self.active_meta.clone();
        let fully_deleted = builder.columns.is_empty() && self.metadata_gc_eligible(&meta);
        if fully_deleted {
            return None;
        }
        self.stats.slices_emitted += 1;
        Some(Slice::new(builder.start_key, builder.last_key, None, meta, builder.columns))
    }

    fn metadata_gc_eligible(&self, meta: &Metadata) -> bool {
        if meta.is_empty() {
            return true;
        }
        self.major
            && meta
                .pairs
                .iter()
                .all(|p| p.marked_for_delete_at == i64::MIN || p.local_deletion_time < self.gc_before)
    }

    fn record_drop(&mut self, column: &Column) {
        let shadowed = self
            .active_meta
            .pairs
            .iter()
            .any(|p| column.timestamp <= p.marked_for_delete_at);
        if shadowed {
            self.stats.columns_dropped_shadowed += 1;
        } else {
            self.stats.columns_dropped_tombstone += 1;
        }
    }

    /// Snapshot of the run's counters so far.
    pub fn stats(&self) -> CompactionStats {
        self.stats
    }

    /// Cooperatively cancels the merge, closing every scanner still queued.
    /// Aggregates and returns the first error encountered; closing the
    /// remaining scanners continues regardless (§5 "cancellation").
    pub fn close(mut self) -> Result<()> {
        let mut first_err = None;
        while let Some(Reverse(scanner)) = self.heap.pop() {
            if let Err(e) = scanner.close() {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Iterator for CompactionIterator {
    type Item = Result<Slice>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_slice() {
            Ok(Some(slice)) => Some(Ok(slice)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Drives a [`CompactionIterator`] to completion, streaming every emitted
/// slice into `writer`. Logs a `tracing` span for the run and a summary
/// event on completion (§4.4 "Observability").
pub fn run_compaction(
    scanners: Vec<Scanner>,
    comparator: Arc<KeyComparator>,
    depth: usize,
    gc_before: i32,
    major: bool,
    config: Config,
    writer: &mut Writer,
) -> Result<CompactionStats> {
    let inputs = scanners.len();
    let span = tracing::info_span!("sstable::compaction", major, gc_before, inputs);
    let _enter = span.enter();

    let mut iter = CompactionIterator::new(scanners, comparator, depth, gc_before, major, config)?;
    loop {
        match iter.next_slice() {
            Ok(Some(slice)) => writer.append_slice(slice)?,
            Ok(None) => break,
            Err(e) => {
                let _ = iter.close();
                return Err(e);
            }
        }
    }
    let stats = iter.stats();
    iter.close()?;

    tracing::info!(
        target: "sstable::compaction",
        slices = stats.slices_emitted,
        columns = stats.columns_emitted,
        dropped_shadowed = stats.columns_dropped_shadowed,
        dropped_tombstone = stats.columns_dropped_tombstone,
        "compaction complete"
    );
    Ok(stats)
}

#[cfg(test)]
#[path = "tests/compaction_tests.rs"]
mod tests;
