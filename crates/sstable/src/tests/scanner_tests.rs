use std::sync::Arc;

use tempfile::tempdir;

use crate::column::Column;
use crate::column_filter::NamesFilter;
use crate::key::{ColumnKey, DecoratedKey, KeyComparator};
use crate::metadata::Metadata;
use crate::writer::{SstPaths, Writer};

fn key(raw: &[u8], name: &[u8]) -> ColumnKey {
    ColumnKey::new(DecoratedKey::new(raw.to_vec(), raw.to_vec()), vec![name.to_vec()])
}

fn build(dir: &std::path::Path, prefix: &str, rows: &[&[u8]]) -> crate::reader::Reader {
    let paths = SstPaths::from_prefix(dir.join(prefix));
    let comparator = Arc::new(KeyComparator::bytewise(1));
    let mut writer = Writer::create(paths, comparator, 1, config::Config::default(), rows.len()).unwrap();
    for raw in rows {
        writer
            .append(Metadata::empty(1), key(raw, b"name"), Column::live(b"name".to_vec(), b"v".to_vec(), 1))
            .unwrap();
    }
    writer.finalize().unwrap()
}

#[test]
fn next_yields_slices_in_key_order_then_eof() {
    let dir = tempdir().unwrap();
    let reader = build(&dir, "s1", &[b"a", b"b", b"c"]);
    let mut scanner = reader.scanner().unwrap();
    assert!(scanner.next().unwrap());
    assert_eq!(scanner.get().unwrap().start_key.dk.raw, b"a");
    assert!(scanner.next().unwrap());
    assert_eq!(scanner.get().unwrap().start_key.dk.raw, b"b");
    assert!(scanner.next().unwrap());
    assert_eq!(scanner.get().unwrap().start_key.dk.raw, b"c");
    assert!(!scanner.next().unwrap());
    assert!(scanner.get().is_none());
}

#[test]
fn seek_to_positions_at_first_slice_covering_target() {
    let dir = tempdir().unwrap();
    let reader = build(&dir, "s2", &[b"a", b"c", b"e"]);
    let mut scanner = reader.scanner().unwrap();
    assert!(scanner.seek_to(&key(b"c", b"name")).unwrap());
    assert_eq!(scanner.get().unwrap().start_key.dk.raw, b"c");
}

#[test]
fn seek_to_absent_key_past_end_returns_false() {
    let dir = tempdir().unwrap();
    let reader = build(&dir, "s3", &[b"a", b"b"]);
    let mut scanner = reader.scanner().unwrap();
    assert!(!scanner.seek_to(&key(b"zzz", b"name")).unwrap());
}

#[test]
fn column_filter_skips_decoding_non_matching_slices() {
    let dir = tempdir().unwrap();
    let reader = build(&dir, "s4", &[b"a", b"b", b"c"]);
    let mut scanner = reader.scanner().unwrap();
    scanner.set_column_filter(Arc::new(NamesFilter::new(vec![b"nonexistent".to_vec()])));
    assert!(scanner.next().unwrap());
    assert!(scanner.get().unwrap().columns.is_empty());
}

#[test]
fn scanners_order_by_current_slice_start_key() {
    let dir = tempdir().unwrap();
    let reader_a = build(&dir, "s5a", &[b"b"]);
    let reader_b = build(&dir, "s5b", &[b"a"]);
    let mut scanner_a = reader_a.scanner().unwrap();
    let mut scanner_b = reader_b.scanner().unwrap();
    assert!(scanner_a.next().unwrap());
    assert!(scanner_b.next().unwrap());
    assert!(scanner_b < scanner_a, "scanner positioned at \"a\" must sort before one at \"b\"");
}

#[test]
fn exhausted_scanner_sorts_after_any_live_scanner() {
    let dir = tempdir().unwrap();
    let reader_a = build(&dir, "s6a", &[b"only"]);
    let reader_b = build(&dir, "s6b", &[b"x"]);
    let mut scanner_a = reader_a.scanner().unwrap();
    let mut scanner_b = reader_b.scanner().unwrap();
    assert!(scanner_a.next().unwrap());
    assert!(!scanner_a.next().unwrap());
    assert!(scanner_b.next().unwrap());
    assert!(scanner_b < scanner_a);
}
