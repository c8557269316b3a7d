//! Iterates an SST's slices in key order, supporting seek-driven point
//! lookups and heap-merge ordering for compaction (§4.3).

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use bloom::BloomFilter;

use crate::column::Column;
use crate::column_filter::{ColumnFilter, FilterDecision};
use crate::error::Result;
use crate::format::{self, IndexEntry};
use crate::key::{ColumnKey, KeyComparator, Name};
use crate::slice::{status, Slice};

static NEXT_SCANNER_ID: AtomicU64 = AtomicU64::new(0);

fn decode_columns(payload: &[u8], count: u32) -> Result<Vec<Column>> {
    let mut cursor = Cursor::new(payload);
    let mut columns = Vec::with_capacity(count as usize);
    for _ in 0..count {
        columns.push(format::read_column(&mut cursor)?);
    }
    Ok(columns)
}

/// An iterator over one SST's slices in key order.
///
/// Not thread-safe (§5): each caller must hold its own scanner. Scanners
/// implement a total order on their current slice's key so a
/// `BinaryHeap<Scanner>` can drive a global merge, with scanner identity as
/// the tie-break to keep that order stable.
pub struct Scanner {
    path: PathBuf,
    comparator: Arc<KeyComparator>,
    depth: usize,
    file: BufReader<File>,
    total_len: u64,
    block_cursor: Option<Cursor<Vec<u8>>>,
    current: Option<Slice>,
    bloom: Option<Arc<BloomFilter>>,
    sparse_index: Arc<Vec<IndexEntry>>,
    last_seek_offset: u64,
    filter: Option<Arc<dyn ColumnFilter>>,
    id: u64,
}

impl Scanner {
    /// Opens a scanner over the data file at `path`. `sparse_index` and
    /// `bloom` are the reader's already-loaded, shared structures.
    pub fn open(
        path: PathBuf,
        comparator: Arc<KeyComparator>,
        depth: usize,
        sparse_index: Arc<Vec<IndexEntry>>,
        bloom: Option<Arc<BloomFilter>>,
    ) -> Result<Self> {
        let file = File::open(&path)?;
        let total_len = file.metadata()?.len();
        Ok(Self {
            path,
            comparator,
            depth,
            file: BufReader::new(file),
            total_len,
            block_cursor: None,
            current: None,
            bloom,
            sparse_index,
            last_seek_offset: 0,
            filter: None,
            id: NEXT_SCANNER_ID.fetch_add(1, AtomicOrdering::Relaxed),
        })
    }

    fn path_str(&self) -> String {
        self.path.display().to_string()
    }

    /// The slice at the current position, or `None` at EOF / before the
    /// first call to [`Scanner::next`].
    pub fn get(&self) -> Option<&Slice> {
        self.current.as_ref()
    }

    /// Installs a column-name filter used to skip intra-slice decoding.
    /// Compaction must never call this — it needs every column.
    pub fn set_column_filter(&mut self, filter: Arc<dyn ColumnFilter>) {
        self.filter = Some(filter);
    }

    /// Approximate number of bytes remaining between the current position
    /// and EOF, for compaction progress reporting.
    pub fn bytes_remaining(&mut self) -> Result<u64> {
        let pos = self.file.stream_position()?;
        Ok(self.total_len.saturating_sub(pos))
    }

    /// Releases the underlying file handle.
    pub fn close(self) -> Result<()> {
        Ok(())
    }

    fn load_next_block(&mut self) -> Result<bool> {
        match format::read_block_header(&mut self.file, &self.path_str())? {
            None => Ok(false),
            Some(header) => {
                let mut buf = vec![0u8; header.length as usize];
                self.file.read_exact(&mut buf)?;
                self.block_cursor = Some(Cursor::new(buf));
                Ok(true)
            }
        }
    }

    /// Advances to the following slice. Returns `false` at EOF.
    ///
    /// Any framing corruption encountered while decoding the next block or
    /// slice mark is logged (path + best-effort byte offset) before the
    /// error propagates, so a `CorruptSSTable` failure is attributable
    /// without replaying the read (§4.3 Observability).
    pub fn next(&mut self) -> Result<bool> {
        self.next_inner().inspect_err(|e| {
            let offset = self.file.stream_position().unwrap_or(self.total_len);
            tracing::error!(
                target: "sstable::scanner",
                path = %self.path_str(),
                offset,
                error = %e,
                "framing corruption while scanning sstable"
            );
        })
    }

    fn next_inner(&mut self) -> Result<bool> {
        loop {
            if let Some(cursor) = &mut self.block_cursor {
                if (cursor.position() as usize) < cursor.get_ref().len() {
                    let mark = format::read_slice_mark(cursor, &self.path_str())?;
                    let mut payload = vec![0u8; mark.payload_bytes as usize];
                    cursor.read_exact(&mut payload)?;
                    let skip = match &self.filter {
                        Some(f) => matches!(
                            f.matches_between(
                                start_leaf(&mark.start_key),
                                end_leaf(&mark.end_key)
                            ),
                            FilterDecision::NomatchDone
                        ),
                        None => false,
                    };
                    let columns = if skip {
                        Vec::new()
                    } else {
                        let mut columns = decode_columns(&payload, mark.column_count)?;
                        if let Some(f) = &self.filter {
                            columns.retain(|c| f.matches(&c.name));
                        }
                        columns
                    };
                    self.current = Some(Slice::new(mark.start_key, mark.end_key, mark.next_key, mark.meta, columns));
                    return Ok(true);
                }
                self.block_cursor = None;
            }
            if !self.load_next_block()? {
                self.current = None;
                return Ok(false);
            }
        }
    }

    /// Positions at the first slice whose `end_key >= key`. Never moves
    /// backward: a target already passed returns the current slice's
    /// successor search starting from the present position rather than
    /// re-scanning from the start.
    pub fn seek_to(&mut self, target: &ColumnKey) -> Result<bool> {
        if let (Some(bloom), Some(Name::Real(name))) = (&self.bloom, target.names.last()) {
            let mut probe = Vec::with_capacity(target.dk.raw.len() + name.len() + 1);
            probe.extend_from_slice(&target.dk.raw);
            probe.push(0);
            probe.extend_from_slice(name);
            if !bloom.may_contain(&probe) {
                return Ok(false);
            }
        }

        let idx = self.sparse_index.partition_point(|e| e.dk <= target.dk);
        let candidate_offset = if idx == 0 { 0 } else { self.sparse_index[idx - 1].data_file_offset as u64 };
        if candidate_offset > self.last_seek_offset || self.current.is_none() {
            self.file.seek(SeekFrom::Start(candidate_offset))?;
            self.block_cursor = None;
            self.last_seek_offset = candidate_offset;
        }

        loop {
            if !self.next()? {
                return Ok(false);
            }
            let cur = self.current.as_ref().expect("set by next()");
            if self.comparator.compare(&cur.end_key, target, self.depth) != Ordering::Less {
                return Ok(true);
            }
        }
    }
}

fn start_leaf(key: &ColumnKey) -> &Name {
    key.names.last().unwrap_or(&Name::Begin)
}

fn end_leaf(key: &ColumnKey) -> &Name {
    key.names.last().unwrap_or(&Name::End)
}

impl PartialEq for Scanner {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scanner {}

impl PartialOrd for Scanner {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scanner {
    /// Orders scanners by their current slice's start key so a
    /// `BinaryHeap` (a max-heap) can be driven with `Reverse` to yield the
    /// global minimum first. Ties break on scanner id for stability.
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.current, &other.current) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => self
                .comparator
                .compare(&a.start_key, &b.start_key, self.depth)
                .then_with(|| self.id.cmp(&other.id)),
        }
    }
}

#[cfg(test)]
#[path = "tests/scanner_tests.rs"]
mod tests;
