//! Streams a monotonically non-decreasing column sequence into a finalized
//! SST triplet (§4.2).

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bloom::BloomFilter;
use config::Config;

use crate::column::Column;
use crate::error::{Result, SstError};
use crate::format;
use crate::key::{ColumnKey, KeyComparator};
use crate::metadata::Metadata;
use crate::reader::Reader;
use crate::slice::{codec, status, BlockHeader, Slice};

/// The three sibling paths (data, index, filter) that make up one SST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SstPaths {
    pub data: PathBuf,
    pub index: PathBuf,
    pub filter: PathBuf,
}

impl SstPaths {
    /// Derives the triplet's three paths from a shared prefix, e.g.
    /// `SstPaths::from_prefix("/data/sst-1")` yields `sst-1.data`,
    /// `sst-1.index`, `sst-1.filter`.
    pub fn from_prefix(prefix: impl AsRef<Path>) -> Self {
        let prefix = prefix.as_ref();
        Self {
            data: with_suffix(prefix, "data"),
            index: with_suffix(prefix, "index"),
            filter: with_suffix(prefix, "filter"),
        }
    }

    fn tmp(&self) -> Self {
        Self {
            data: tmp_name(&self.data),
            index: tmp_name(&self.index),
            filter: tmp_name(&self.filter),
        }
    }
}

fn with_suffix(prefix: &Path, ext: &str) -> PathBuf {
    let mut os = prefix.as_os_str().to_owned();
    os.push(".");
    os.push(ext);
    PathBuf::from(os)
}

fn tmp_name(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("-tmp-{file_name}"))
}

/// Bloom filter input: the column's key bytes plus its name, so that the
/// filter discriminates `(key, column name)` pairs rather than just rows.
fn bloom_input(key: &ColumnKey, name: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(key.dk.raw.len() + name.len() + 1);
    buf.extend_from_slice(&key.dk.raw);
    buf.push(0);
    buf.extend_from_slice(name);
    buf
}

/// Rough estimate of a column's serialized size, used to track the current
/// slice's accumulated byte size against `TARGET_MAX_SLICE_BYTES`. Need not
/// be exact — the size bound is a soft target, not a hard on-disk limit.
fn estimated_column_bytes(col: &Column) -> u64 {
    (col.name.len() + col.value.len() + 2 + 8 + 1 + 4) as u64
}

/// Streams `(Metadata, ColumnKey, Column)` appends into a finalized SST.
///
/// Single-threaded, no internal synchronization (§5): the caller must
/// serialize appends and guarantee they are strictly non-decreasing at the
/// configured depth. A violation is reported as
/// [`SstError::InputOrderViolation`] and aborts the write; temporary files
/// are left on disk for the caller to clean up.
pub struct Writer {
    paths: SstPaths,
    tmp_paths: SstPaths,
    comparator: Arc<KeyComparator>,
    depth: usize,
    config: Config,

    data_writer: BufWriter<File>,
    data_bytes_written: u64,
    index_writer: BufWriter<File>,
    index_bytes_written: u64,
    dense_index_count: u64,
    sparse_index: Vec<format::IndexEntry>,

    bloom: BloomFilter,

    block_buf: Vec<u8>,
    block_first_key: Option<ColumnKey>,

    current_slice_start: Option<ColumnKey>,
    current_meta: Option<Metadata>,
    current_columns: Vec<Column>,
    current_slice_bytes: u64,

    last_key: Option<ColumnKey>,
    total_columns: u64,
    total_slices: u64,
}

impl Writer {
    /// Opens a new writer at `paths`, sizing the bloom filter for
    /// `expected_columns` total appends (callers writing from a row-count
    /// estimate should multiply by `config.bloom_keys_per_column`).
    pub fn create(
        paths: SstPaths,
        comparator: Arc<KeyComparator>,
        depth: usize,
        config: Config,
        expected_columns: usize,
    ) -> Result<Self> {
        let tmp_paths = paths.tmp();
        let data_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_paths.data)?;
        let index_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_paths.index)?;
        let bloom = BloomFilter::with_hash_count(expected_columns.max(1), config.bloom_hashes);
        Ok(Self {
            paths,
            tmp_paths,
            comparator,
            depth,
            config,
            data_writer: BufWriter::new(data_file),
            data_bytes_written: 0,
            index_writer: BufWriter::new(index_file),
            index_bytes_written: 0,
            dense_index_count: 0,
            sparse_index: Vec::new(),
            bloom,
            block_buf: Vec::new(),
            block_first_key: None,
            current_slice_start: None,
            current_meta: None,
            current_columns: Vec::new(),
            current_slice_bytes: 0,
            last_key: None,
            total_columns: 0,
            total_slices: 0,
        })
    }

    /// Appends one column under `meta`. `key` must sort strictly after the
    /// previously appended key at this writer's depth.
    pub fn append(&mut self, meta: Metadata, key: ColumnKey, column: Column) -> Result<()> {
        if let Some(last) = &self.last_key {
            if self.comparator.compare(last, &key, self.depth) != std::cmp::Ordering::Less {
                return Err(SstError::InputOrderViolation {
                    previous: format!("{last:?}"),
                    new: format!("{key:?}"),
                });
            }
        }

        let mut new_slice_start = key.clone();
        if let Some(start) = self.current_slice_start.clone() {
            let natural = !start.same_parent_group(&key);
            let meta_changed = self.current_meta.as_ref().is_some_and(|m| *m != meta);
            let size_exceeded = self.current_slice_bytes >= self.config.target_max_slice_bytes;
            if natural || meta_changed || size_exceeded {
                self.close_current_slice(&key, natural)?;
                new_slice_start = if natural { key.rounded_begin() } else { key.clone() };
            } else {
                new_slice_start = start;
            }
        }

        if self.current_slice_start.is_none() {
            self.current_slice_start = Some(new_slice_start);
            self.current_meta = Some(meta);
            self.current_slice_bytes = 0;
        }

        self.bloom.insert(&bloom_input(&key, &column.name));
        self.current_slice_bytes += estimated_column_bytes(&column);
        self.current_columns.push(column);
        self.last_key = Some(key);
        self.total_columns += 1;
        Ok(())
    }

    /// Appends a whole pre-serialized slice (the compaction iterator's
    /// output path), unioning its columns' keys into the bloom filter
    /// directly rather than replaying individual `append` calls.
    ///
    /// Mirrors `append`'s boundary rounding (§4.2, §3): when this slice's
    /// start falls in a different parent group than the previously appended
    /// key, its `start_key` rounds down to `NAME_BEGIN` just as a natural
    /// boundary would inside `append`. Skipping this would leave every
    /// compaction-produced SST's post-boundary slices keyed at a leaf-real
    /// start instead of the group's begin, the same invariant `append`
    /// already upholds for the ingest path.
    pub fn append_slice(&mut self, mut slice: Slice) -> Result<()> {
        if let Some(last) = &self.last_key {
            if self.comparator.compare(last, &slice.start_key, self.depth) != std::cmp::Ordering::Less {
                return Err(SstError::InputOrderViolation {
                    previous: format!("{last:?}"),
                    new: format!("{:?}", slice.start_key),
                });
            }
        }
        if self.current_slice_start.is_some() {
            self.flush_current_slice_as_boundary(&slice.start_key)?;
        }
        let natural = self.last_key.as_ref().is_some_and(|last| !last.same_parent_group(&slice.start_key));
        if natural {
            slice.start_key = slice.start_key.rounded_begin();
        }
        for col in &slice.columns {
            self.bloom.insert(&bloom_input(&slice.start_key, &col.name));
        }
        self.last_key = Some(slice.end_key.clone());
        self.total_columns += slice.columns.len() as u64;
        self.emit_slice(slice)
    }

    fn flush_current_slice_as_boundary(&mut self, incoming_key: &ColumnKey) -> Result<()> {
        let start = self.current_slice_start.clone().expect("checked by caller");
        let natural = !start.same_parent_group(incoming_key);
        self.close_current_slice(incoming_key, natural)
    }

    fn close_current_slice(&mut self, incoming_key: &ColumnKey, natural: bool) -> Result<()> {
        let start = self.current_slice_start.take().expect("checked by caller");
        let meta = self.current_meta.take().expect("checked by caller");
        let last = self.last_key.clone().expect("a slice always has a last key");
        let columns = std::mem::take(&mut self.current_columns);
        let end_key = if natural { last.rounded_end() } else { last };
        let next_key = if natural { incoming_key.rounded_begin() } else { incoming_key.clone() };
        let slice = Slice::new(start, end_key, Some(next_key), meta, columns);
        self.emit_slice(slice)
    }

    fn emit_slice(&mut self, slice: Slice) -> Result<()> {
        let mut payload = Vec::new();
        for col in &slice.columns {
            format::write_column(&mut payload, col)?;
        }
        // `SliceMark.payload_len` is a u32 (§6); a caller bypassing the
        // boundary rules in `append_slice` could hand us a slice too large
        // to frame without silently truncating that length on cast.
        if payload.len() > u32::MAX as usize {
            return Err(SstError::BoundedResourceExhaustion(format!(
                "slice at {:?} serializes to {} bytes, exceeding the u32 payload length this format can frame",
                slice.start_key, payload.len()
            )));
        }
        if self.block_first_key.is_none() {
            self.block_first_key = Some(slice.start_key.clone());
        }
        // A rough overhead estimate for the mark itself; exact accounting
        // isn't required since TARGET_MAX_BLOCK_BYTES is a soft target.
        const MARK_OVERHEAD_ESTIMATE: usize = 128;
        let would_be_len = self.block_buf.len() + payload.len() + MARK_OVERHEAD_ESTIMATE;
        let closes_block = would_be_len as u64 >= self.config.target_max_block_bytes;
        let status = if closes_block { status::BLOCK_END } else { status::BLOCK_CONTINUE };
        let mark = slice.mark(payload.len() as u32, status);
        format::write_slice_mark(&mut self.block_buf, &mark)?;
        self.block_buf.extend_from_slice(&payload);
        self.total_slices += 1;
        if closes_block {
            self.close_block()?;
        }
        Ok(())
    }

    fn close_block(&mut self) -> Result<()> {
        if self.block_buf.is_empty() {
            return Ok(());
        }
        let header = BlockHeader {
            length: self.block_buf.len() as u32,
            codec_tag: codec::IDENTITY,
        };
        let data_offset = self.data_bytes_written;
        format::write_block_header(&mut self.data_writer, &header)?;
        self.data_writer.write_all(&self.block_buf)?;
        self.data_bytes_written += 8 + self.block_buf.len() as u64;
        if let Some(first_key) = self.block_first_key.take() {
            self.record_index_entry(first_key, data_offset)?;
        }
        self.block_buf.clear();
        Ok(())
    }

    fn record_index_entry(&mut self, key: ColumnKey, data_offset: u64) -> Result<()> {
        let parent_len = key.names.len().saturating_sub(1);
        let entry = format::IndexEntry {
            dk: key.dk,
            parent_names: key.names[..parent_len].to_vec(),
            index_file_offset: self.index_bytes_written as i64,
            data_file_offset: data_offset as i64,
        };
        let mut buf = Vec::new();
        format::write_index_entry(&mut buf, &entry)?;
        self.index_writer.write_all(&buf)?;
        self.index_bytes_written += buf.len() as u64;
        let is_sampled = self.dense_index_count % self.config.index_interval as u64 == 0;
        self.dense_index_count += 1;
        if is_sampled {
            self.sparse_index.push(entry);
        }
        Ok(())
    }

    /// Flushes any open slice/block, fsyncs all three files, serializes the
    /// bloom filter, and atomically renames the triplet into place (data
    /// file last — its non-temporary presence is the atomicity marker).
    /// Returns a [`Reader`] opened against the finalized files.
    pub fn finalize(mut self) -> Result<Reader> {
        if let Some(start) = self.current_slice_start.take() {
            let meta = self.current_meta.take().expect("checked above");
            let last = self.last_key.clone().expect("a slice always has a last key");
            let columns = std::mem::take(&mut self.current_columns);
            let slice = Slice::new(start, last.rounded_end(), None, meta, columns);
            self.emit_slice(slice)?;
        }
        self.close_block()?;

        self.data_writer.flush()?;
        self.data_writer.get_ref().sync_all()?;
        self.index_writer.flush()?;
        self.index_writer.get_ref().sync_all()?;

        let mut filter_file = File::create(&self.tmp_paths.filter)?;
        self.bloom.write_to(&mut filter_file)?;
        filter_file.flush()?;
        filter_file.sync_all()?;

        fs::rename(&self.tmp_paths.index, &self.paths.index)?;
        fs::rename(&self.tmp_paths.filter, &self.paths.filter)?;
        fs::rename(&self.tmp_paths.data, &self.paths.data)?;

        tracing::info!(
            target: "sstable::writer",
            data = %self.paths.data.display(),
            index = %self.paths.index.display(),
            filter = %self.paths.filter.display(),
            slices = self.total_slices,
            columns = self.total_columns,
            bloom_bits = self.bloom.num_bits(),
            bloom_hashes = self.bloom.num_hashes(),
            "finalized sstable"
        );

        Reader::open(self.paths.clone(), self.comparator.clone(), self.depth, self.config)
    }
}

#[cfg(test)]
#[path = "tests/writer_tests.rs"]
mod tests;
