//! Opens a finalized SST triplet and constructs scanners over it (§4.3).

use std::fs::File;
use std::io;
use std::sync::Arc;

use bloom::BloomFilter;
use config::Config;

use crate::column::Column;
use crate::column_filter::NamesFilter;
use crate::error::{Result, SstError};
use crate::format::{self, IndexEntry};
use crate::key::{ColumnKey, KeyComparator};
use crate::scanner::Scanner;
use crate::writer::SstPaths;

/// A read-only handle on a finalized SST triplet.
///
/// Immutable once opened; safe for concurrent use across threads provided
/// each caller opens its own [`Scanner`] (§5). The bloom filter and sparse
/// index are loaded once and shared (via `Arc`) by every scanner opened
/// from this reader.
pub struct Reader {
    paths: SstPaths,
    comparator: Arc<KeyComparator>,
    depth: usize,
    #[allow(dead_code)]
    config: Config,
    bloom: Arc<BloomFilter>,
    sparse_index: Arc<Vec<IndexEntry>>,
}

impl Reader {
    /// Opens the SST triplet at `paths`, deserializing the bloom filter and
    /// sparse index into memory.
    pub fn open(paths: SstPaths, comparator: Arc<KeyComparator>, depth: usize, config: Config) -> Result<Self> {
        let mut filter_file = File::open(&paths.filter)?;
        let bloom = BloomFilter::read_from(&mut filter_file).map_err(|e| map_bloom_error(e, &paths)).inspect_err(|e| {
            tracing::error!(target: "sstable::reader", path = %paths.filter.display(), error = %e, "corrupt bloom filter file");
        })?;

        let mut index_file = File::open(&paths.index)?;
        let index_path = paths.index.display().to_string();
        let mut sparse_index = Vec::new();
        while let Some(entry) = format::read_index_entry_opt(&mut index_file, &index_path).inspect_err(|e| {
            tracing::error!(target: "sstable::reader", path = %index_path, error = %e, "corrupt sparse index file");
        })? {
            sparse_index.push(entry);
        }

        Ok(Self {
            paths,
            comparator,
            depth,
            config,
            bloom: Arc::new(bloom),
            sparse_index: Arc::new(sparse_index),
        })
    }

    /// A cheap negative check: `false` means the key is definitely absent
    /// from this SST and no scanner needs to be opened.
    pub fn may_contain(&self, key: &ColumnKey, name: &[u8]) -> bool {
        let mut probe = Vec::with_capacity(key.dk.raw.len() + name.len() + 1);
        probe.extend_from_slice(&key.dk.raw);
        probe.push(0);
        probe.extend_from_slice(name);
        self.bloom.may_contain(&probe)
    }

    /// Opens a new scanner over this SST's data file.
    pub fn scanner(&self) -> Result<Scanner> {
        Scanner::open(
            self.paths.data.clone(),
            self.comparator.clone(),
            self.depth,
            self.sparse_index.clone(),
            Some(self.bloom.clone()),
        )
    }

    /// Point lookup: the highest-priority column named `name` under `key`,
    /// or `None` if absent. Combines the bloom probe, sparse-index seek,
    /// and a column-name filter so only the matching slice is decoded.
    pub fn get(&self, key: &ColumnKey, name: &[u8]) -> Result<Option<Column>> {
        if !self.may_contain(key, name) {
            return Ok(None);
        }
        let mut scanner = self.scanner()?;
        scanner.set_column_filter(Arc::new(NamesFilter::new(vec![name.to_vec()])));
        if !scanner.seek_to(key)? {
            return Ok(None);
        }
        let slice = match scanner.get() {
            Some(s) => s,
            None => return Ok(None),
        };
        // `seek_to` only guarantees `slice.end_key >= key`; a bloom false
        // positive can still land on a slice belonging to a different row
        // (or a different parent group) whose columns happen to share
        // `name` with the one being looked up. Confirm the landed slice's
        // own bounds actually cover `key` before folding its columns, so an
        // absent key never resolves to another row's value.
        let covers = slice.start_key.dk == key.dk
            && self.comparator.compare(&slice.start_key, key, self.depth) != std::cmp::Ordering::Greater
            && self.comparator.compare(&slice.end_key, key, self.depth) != std::cmp::Ordering::Less;
        if !covers {
            return Ok(None);
        }
        Ok(slice
            .columns
            .iter()
            .filter(|c| c.name == name)
            .fold(None::<Column>, |best, c| match best {
                None => Some(c.clone()),
                Some(b) if c.compare_priority(&b) == std::cmp::Ordering::Greater => Some(c.clone()),
                other => other,
            }))
    }
}

fn map_bloom_error(e: io::Error, paths: &SstPaths) -> SstError {
    if e.kind() == io::ErrorKind::InvalidData {
        SstError::CorruptSSTable {
            path: paths.filter.display().to_string(),
            reason: e.to_string(),
        }
    } else {
        SstError::from(e)
    }
}

#[cfg(test)]
#[path = "tests/reader_tests.rs"]
mod tests;
