//! Bit-exact on-disk encoding/decoding for every record type named in §6.
//!
//! Everything is big-endian. These functions are the single place that
//! knows the wire layout; the writer and reader only deal in the typed
//! structs from [`crate::key`], [`crate::column`], [`crate::metadata`], and
//! [`crate::slice`].

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::column::Column;
use crate::error::{Result, SstError};
use crate::key::{ColumnKey, DecoratedKey, Name};
use crate::metadata::{DeletionMark, Metadata};
use crate::slice::{BlockHeader, SliceMark};

fn corrupt(path: &str, reason: impl Into<String>) -> SstError {
    SstError::CorruptSSTable {
        path: path.to_string(),
        reason: reason.into(),
    }
}

/// Reads a length-prefixed (`u16` length) byte string.
fn read_bytes_u16(r: &mut impl Read) -> Result<Vec<u8>> {
    let len = r.read_u16::<BigEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn write_bytes_u16(w: &mut impl Write, bytes: &[u8]) -> Result<()> {
    w.write_u16::<BigEndian>(bytes.len() as u16)?;
    w.write_all(bytes)?;
    Ok(())
}

/// Writes a [`BlockHeader`]: `length:u32 codec_tag:u8 reserved:u24`.
pub fn write_block_header(w: &mut impl Write, h: &BlockHeader) -> Result<()> {
    w.write_u32::<BigEndian>(h.length)?;
    w.write_u8(h.codec_tag)?;
    w.write_all(&[0u8; 3])?;
    Ok(())
}

/// Reads a [`BlockHeader`].
pub fn read_block_header(r: &mut impl Read, path: &str) -> Result<Option<BlockHeader>> {
    let mut len_buf = [0u8; 4];
    match r.read(&mut len_buf)? {
        0 => return Ok(None),
        4 => {}
        n => {
            r.read_exact(&mut len_buf[n..])?;
        }
    }
    let length = u32::from_be_bytes(len_buf);
    let codec_tag = r.read_u8()?;
    let mut reserved = [0u8; 3];
    r.read_exact(&mut reserved)?;
    if reserved != [0u8; 3] {
        return Err(corrupt(path, "non-zero reserved bytes in block header"));
    }
    Ok(Some(BlockHeader { length, codec_tag }))
}

/// Writes a [`Metadata`] record: `depth:u8` then `depth` `(i64, i32)` pairs.
pub fn write_metadata(w: &mut impl Write, meta: &Metadata) -> Result<()> {
    w.write_u8(meta.pairs.len() as u8)?;
    for p in &meta.pairs {
        w.write_i64::<BigEndian>(p.marked_for_delete_at)?;
        w.write_i32::<BigEndian>(p.local_deletion_time)?;
    }
    Ok(())
}

/// Reads a [`Metadata`] record.
pub fn read_metadata(r: &mut impl Read) -> Result<Metadata> {
    let depth = r.read_u8()? as usize;
    let mut pairs = Vec::with_capacity(depth);
    for _ in 0..depth {
        let marked_for_delete_at = r.read_i64::<BigEndian>()?;
        let local_deletion_time = r.read_i32::<BigEndian>()?;
        pairs.push(DeletionMark {
            marked_for_delete_at,
            local_deletion_time,
        });
    }
    Ok(Metadata { pairs })
}

const NAME_FLAG_REAL: u8 = 0;
const NAME_FLAG_BEGIN: u8 = 1;
const NAME_FLAG_END: u8 = 2;

fn write_name(w: &mut impl Write, name: &Name) -> Result<()> {
    match name {
        Name::Real(bytes) => {
            w.write_u8(NAME_FLAG_REAL)?;
            write_bytes_u16(w, bytes)?;
        }
        Name::Begin => w.write_u8(NAME_FLAG_BEGIN)?,
        Name::End => w.write_u8(NAME_FLAG_END)?,
    }
    Ok(())
}

fn read_name(r: &mut impl Read, path: &str) -> Result<Name> {
    match r.read_u8()? {
        NAME_FLAG_REAL => Ok(Name::Real(read_bytes_u16(r)?)),
        NAME_FLAG_BEGIN => Ok(Name::Begin),
        NAME_FLAG_END => Ok(Name::End),
        other => Err(corrupt(path, format!("unknown name flag byte {other}"))),
    }
}

fn write_decorated_key(w: &mut impl Write, dk: &DecoratedKey) -> Result<()> {
    write_bytes_u16(w, &dk.token)?;
    write_bytes_u16(w, &dk.raw)?;
    Ok(())
}

fn read_decorated_key(r: &mut impl Read) -> Result<DecoratedKey> {
    let token = read_bytes_u16(r)?;
    let raw = read_bytes_u16(r)?;
    Ok(DecoratedKey::new(token, raw))
}

/// Writes a [`ColumnKey`] record: `dk_len:u16 dk_bytes name_count:u8` then
/// `name_count` flagged name components.
pub fn write_column_key(w: &mut impl Write, key: &ColumnKey) -> Result<()> {
    let mut dk_buf = Vec::new();
    write_decorated_key(&mut dk_buf, &key.dk)?;
    write_bytes_u16(w, &dk_buf)?;
    w.write_u8(key.names.len() as u8)?;
    for name in &key.names {
        write_name(w, name)?;
    }
    Ok(())
}

/// Reads a [`ColumnKey`] record.
pub fn read_column_key(r: &mut impl Read, path: &str) -> Result<ColumnKey> {
    let dk_bytes = read_bytes_u16(r)?;
    let dk = read_decorated_key(&mut dk_bytes.as_slice())?;
    let name_count = r.read_u8()? as usize;
    let mut names = Vec::with_capacity(name_count);
    for _ in 0..name_count {
        names.push(read_name(r, path)?);
    }
    Ok(ColumnKey::from_names(dk, names))
}

/// Writes an optional [`ColumnKey`], prefixed with a presence byte.
pub fn write_optional_column_key(w: &mut impl Write, key: Option<&ColumnKey>) -> Result<()> {
    match key {
        Some(k) => {
            w.write_u8(1)?;
            write_column_key(w, k)?;
        }
        None => w.write_u8(0)?,
    }
    Ok(())
}

/// Reads an optional [`ColumnKey`].
pub fn read_optional_column_key(r: &mut impl Read, path: &str) -> Result<Option<ColumnKey>> {
    match r.read_u8()? {
        0 => Ok(None),
        1 => Ok(Some(read_column_key(r, path)?)),
        other => Err(corrupt(path, format!("unknown optional-key presence byte {other}"))),
    }
}

/// Writes a [`Column`] record: `name_len:u16 name timestamp:i64 flags:u8
/// value_len:u32 value`.
pub fn write_column(w: &mut impl Write, col: &Column) -> Result<()> {
    write_bytes_u16(w, &col.name)?;
    w.write_i64::<BigEndian>(col.timestamp)?;
    w.write_u8(col.flags)?;
    w.write_u32::<BigEndian>(col.value.len() as u32)?;
    w.write_all(&col.value)?;
    Ok(())
}

/// Reads a [`Column`] record.
pub fn read_column(r: &mut impl Read) -> Result<Column> {
    let name = read_bytes_u16(r)?;
    let timestamp = r.read_i64::<BigEndian>()?;
    let flags = r.read_u8()?;
    let value_len = r.read_u32::<BigEndian>()? as usize;
    let mut value = vec![0u8; value_len];
    r.read_exact(&mut value)?;
    Ok(Column {
        name,
        value,
        timestamp,
        flags,
    })
}

/// A sparse index record: the first key of one data block, plus where to
/// find that block (and this entry's own record) on disk (§6, "Index
/// file").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Decorated key of the block's first column.
    pub dk: DecoratedKey,
    /// The first `depth - 1` name components of the block's first key
    /// (the parent group the block starts in).
    pub parent_names: Vec<Name>,
    /// Byte offset of this entry's own record within the index file.
    pub index_file_offset: i64,
    /// Byte offset of the block's `BlockHeader` within the data file.
    pub data_file_offset: i64,
}

/// Writes an [`IndexEntry`] record.
pub fn write_index_entry(w: &mut impl Write, e: &IndexEntry) -> Result<()> {
    write_bytes_u16(w, &e.dk.token)?;
    write_bytes_u16(w, &e.dk.raw)?;
    w.write_u8(e.parent_names.len() as u8)?;
    for n in &e.parent_names {
        write_name(w, n)?;
    }
    w.write_i64::<BigEndian>(e.index_file_offset)?;
    w.write_i64::<BigEndian>(e.data_file_offset)?;
    Ok(())
}

/// Reads one [`IndexEntry`] record, or `None` if the reader is already at
/// EOF (used to walk the index file to its end on open).
pub fn read_index_entry_opt(r: &mut impl Read, path: &str) -> Result<Option<IndexEntry>> {
    let mut first = [0u8; 2];
    match r.read(&mut first)? {
        0 => return Ok(None),
        2 => {}
        1 => r.read_exact(&mut first[1..])?,
        _ => unreachable!(),
    }
    let token_len = u16::from_be_bytes(first) as usize;
    let mut token = vec![0u8; token_len];
    r.read_exact(&mut token)?;
    let raw = read_bytes_u16(r)?;
    let dk = DecoratedKey::new(token, raw);
    let parent_count = r.read_u8()? as usize;
    let mut parent_names = Vec::with_capacity(parent_count);
    for _ in 0..parent_count {
        parent_names.push(read_name(r, path)?);
    }
    let index_file_offset = r.read_i64::<BigEndian>()?;
    let data_file_offset = r.read_i64::<BigEndian>()?;
    Ok(Some(IndexEntry {
        dk,
        parent_names,
        index_file_offset,
        data_file_offset,
    }))
}

/// Writes a [`SliceMark`] frame header (the payload bytes that follow are
/// written separately by the caller via [`write_column`] per column).
pub fn write_slice_mark(w: &mut impl Write, mark: &SliceMark) -> Result<()> {
    write_metadata(w, &mark.meta)?;
    write_column_key(w, &mark.start_key)?;
    write_column_key(w, &mark.end_key)?;
    write_optional_column_key(w, mark.next_key.as_ref())?;
    w.write_u32::<BigEndian>(mark.payload_bytes)?;
    w.write_u32::<BigEndian>(mark.column_count)?;
    w.write_u8(mark.status)?;
    Ok(())
}

/// Reads a [`SliceMark`] frame header.
pub fn read_slice_mark(r: &mut impl Read, path: &str) -> Result<SliceMark> {
    let meta = read_metadata(r)?;
    let start_key = read_column_key(r, path)?;
    let end_key = read_column_key(r, path)?;
    let next_key = read_optional_column_key(r, path)?;
    let payload_bytes = r.read_u32::<BigEndian>()?;
    let column_count = r.read_u32::<BigEndian>()?;
    let status = r.read_u8()?;
    Ok(SliceMark {
        meta,
        start_key,
        end_key,
        next_key,
        payload_bytes,
        column_count,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slice::status;

    fn key(raw: &[u8], names: &[Name]) -> ColumnKey {
        ColumnKey::from_names(DecoratedKey::new(raw.to_vec(), raw.to_vec()), names.to_vec())
    }

    #[test]
    fn column_roundtrips() {
        let col = Column::live(b"name".to_vec(), b"value".to_vec(), 42);
        let mut buf = Vec::new();
        write_column(&mut buf, &col).unwrap();
        let back = read_column(&mut buf.as_slice()).unwrap();
        assert_eq!(col, back);
    }

    #[test]
    fn metadata_roundtrips() {
        let meta = Metadata::from_pairs(vec![
            DeletionMark { marked_for_delete_at: 10, local_deletion_time: 20 },
            DeletionMark { marked_for_delete_at: -5, local_deletion_time: 0 },
        ]);
        let mut buf = Vec::new();
        write_metadata(&mut buf, &meta).unwrap();
        let back = read_metadata(&mut buf.as_slice()).unwrap();
        assert_eq!(meta, back);
    }

    #[test]
    fn column_key_with_sentinels_roundtrips() {
        let k = key(b"row", &[Name::Begin, Name::Real(b"col".to_vec())]);
        let mut buf = Vec::new();
        write_column_key(&mut buf, &k).unwrap();
        let back = read_column_key(&mut buf.as_slice(), "test").unwrap();
        assert_eq!(k, back);
    }

    #[test]
    fn optional_column_key_none_roundtrips() {
        let mut buf = Vec::new();
        write_optional_column_key(&mut buf, None).unwrap();
        let back = read_optional_column_key(&mut buf.as_slice(), "test").unwrap();
        assert_eq!(back, None);
    }

    #[test]
    fn slice_mark_roundtrips() {
        let mark = SliceMark {
            meta: Metadata::empty(1),
            start_key: key(b"k", &[Name::Begin]),
            end_key: key(b"k", &[Name::End]),
            next_key: Some(key(b"k2", &[Name::Real(b"c".to_vec())])),
            payload_bytes: 123,
            column_count: 7,
            status: status::BLOCK_END,
        };
        let mut buf = Vec::new();
        write_slice_mark(&mut buf, &mark).unwrap();
        let back = read_slice_mark(&mut buf.as_slice(), "test").unwrap();
        assert_eq!(mark, back);
    }

    #[test]
    fn block_header_roundtrips() {
        let header = BlockHeader { length: 4096, codec_tag: 0 };
        let mut buf = Vec::new();
        write_block_header(&mut buf, &header).unwrap();
        let back = read_block_header(&mut buf.as_slice(), "test").unwrap().unwrap();
        assert_eq!(header, back);
    }

    #[test]
    fn block_header_at_eof_returns_none() {
        let buf: Vec<u8> = Vec::new();
        let back = read_block_header(&mut buf.as_slice(), "test").unwrap();
        assert_eq!(back, None);
    }

    #[test]
    fn index_entry_roundtrips_and_reports_eof() {
        let entry = IndexEntry {
            dk: DecoratedKey::new(b"tok".to_vec(), b"row".to_vec()),
            parent_names: vec![Name::Real(b"group".to_vec())],
            index_file_offset: 10,
            data_file_offset: 4096,
        };
        let mut buf = Vec::new();
        write_index_entry(&mut buf, &entry).unwrap();
        let mut cursor = buf.as_slice();
        let back = read_index_entry_opt(&mut cursor, "test").unwrap().unwrap();
        assert_eq!(entry, back);
        assert_eq!(read_index_entry_opt(&mut cursor, "test").unwrap(), None);
    }

    #[test]
    fn bad_name_flag_is_reported_as_corrupt() {
        let buf = vec![9u8];
        let err = read_name(&mut buf.as_slice(), "test.dat").unwrap_err();
        match err {
            SstError::CorruptSSTable { path, .. } => assert_eq!(path, "test.dat"),
            other => panic!("expected CorruptSSTable, got {other:?}"),
        }
    }
}
