//! # cli — demonstration driver for the `sstable` storage engine
//!
//! Exercises the real writer, reader/scanner, and compaction merge iterator
//! end to end, standing in for the memtable/WAL/RPC layers this workspace's
//! storage engine treats as external collaborators (see the `sstable` crate's
//! docs). Four subcommands:
//!
//! ```text
//! write <out-prefix>                         < sorted TSV on stdin
//! scan <prefix>
//! get <prefix> <key> <name>
//! compact [--major] [--gc-before N] <out-prefix> <in-prefix>...
//! ```
//!
//! `write` reads lines of `key\tname\tvalue\ttimestamp\tflags`, already
//! sorted by the caller as the writer's append contract requires (§4.2).
//! `flags` is `live` or `tombstone`; for a tombstone, `value` instead holds
//! the decimal local deletion time. All rows in one `write` invocation share
//! an empty (no-delete) row `Metadata` — this CLI only demonstrates the
//! column-level format, not parent-group deletes.
//!
//! Configuration (`TARGET_MAX_SLICE_BYTES`, `TARGET_MAX_BLOCK_BYTES`,
//! `INDEX_INTERVAL`, bloom sizing) is read from the environment via the
//! `config` crate's documented `SSTABLE_*` variables.
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use config::Config;
use sstable::{Column, ColumnKey, DecoratedKey, KeyComparator, Metadata, Reader, SstPaths, Writer};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn main() -> Result<()> {
    init_tracing();
    let mut args = std::env::args().skip(1);
    let cmd = args.next().context("usage: cli <write|scan|get|compact> ...")?;
    let rest: Vec<String> = args.collect();

    match cmd.as_str() {
        "write" => cmd_write(&rest),
        "scan" => cmd_scan(&rest),
        "get" => cmd_get(&rest),
        "compact" => cmd_compact(&rest),
        other => bail!("unknown command: {other}"),
    }
}

fn comparator() -> Arc<KeyComparator> {
    Arc::new(KeyComparator::bytewise(1))
}

/// A depth-1 `ColumnKey` for row `raw`, leaf name `name`.
fn column_key(raw: &str, name: &str) -> ColumnKey {
    ColumnKey::new(
        DecoratedKey::new(raw.as_bytes().to_vec(), raw.as_bytes().to_vec()),
        vec![name.as_bytes().to_vec()],
    )
}

struct ParsedRow {
    key: String,
    column: Column,
}

fn parse_row(line: &str) -> Result<ParsedRow> {
    let mut fields = line.split('\t');
    let key = fields.next().context("missing key field")?.to_string();
    let name = fields.next().context("missing name field")?.to_string();
    let value = fields.next().context("missing value field")?.to_string();
    let timestamp: i64 = fields
        .next()
        .context("missing timestamp field")?
        .parse()
        .context("timestamp must be an integer")?;
    let flags = fields.next().context("missing flags field")?;
    let column = match flags {
        "live" => Column::live(name.into_bytes(), value.into_bytes(), timestamp),
        "tombstone" => {
            let local_deletion_time: i32 = value.parse().context("tombstone value must be an integer local_deletion_time")?;
            Column::tombstone(name.into_bytes(), timestamp, local_deletion_time)
        }
        other => bail!("unknown flags field {other:?} (expected \"live\" or \"tombstone\")"),
    };
    Ok(ParsedRow { key, column })
}

fn cmd_write(args: &[String]) -> Result<()> {
    let out_prefix = args.first().context("usage: cli write <out-prefix>")?;
    let config = Config::from_env();
    let comparator = comparator();
    let paths = SstPaths::from_prefix(out_prefix);

    let stdin = io::stdin();
    let lines: Vec<String> = stdin.lock().lines().collect::<io::Result<_>>()?;
    let mut writer = Writer::create(paths, comparator, 1, config, lines.len().max(1))?;

    let mut count = 0u64;
    for line in &lines {
        if line.trim().is_empty() {
            continue;
        }
        let row = parse_row(line)?;
        let key = column_key(&row.key, &String::from_utf8_lossy(&row.column.name));
        writer.append(Metadata::empty(1), key, row.column)?;
        count += 1;
    }
    writer.finalize()?;
    println!("wrote {count} columns to {out_prefix}");
    Ok(())
}

fn format_column(row: &str, col: &Column) -> String {
    let flags = if col.is_tombstone() { "tombstone" } else { "live" };
    let value = if col.is_tombstone() {
        col.local_deletion_time().map(|t| t.to_string()).unwrap_or_default()
    } else {
        String::from_utf8_lossy(&col.value).into_owned()
    };
    format!(
        "{row}\t{}\t{value}\t{}\t{flags}",
        String::from_utf8_lossy(&col.name),
        col.timestamp
    )
}

fn cmd_scan(args: &[String]) -> Result<()> {
    let prefix = args.first().context("usage: cli scan <prefix>")?;
    let paths = SstPaths::from_prefix(prefix);
    let reader = Reader::open(paths, comparator(), 1, Config::from_env())?;
    let mut scanner = reader.scanner()?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut slices = 0u64;
    let mut columns = 0u64;
    while scanner.next()? {
        let slice = scanner.get().expect("set by next()");
        let row = String::from_utf8_lossy(&slice.start_key.dk.raw).into_owned();
        for col in &slice.columns {
            writeln!(out, "{}", format_column(&row, col))?;
            columns += 1;
        }
        slices += 1;
    }
    eprintln!("{slices} slices, {columns} columns");
    Ok(())
}

fn cmd_get(args: &[String]) -> Result<()> {
    let prefix = args.first().context("usage: cli get <prefix> <key> <name>")?;
    let key = args.get(1).context("usage: cli get <prefix> <key> <name>")?;
    let name = args.get(2).context("usage: cli get <prefix> <key> <name>")?;
    let paths = SstPaths::from_prefix(prefix);
    let reader = Reader::open(paths, comparator(), 1, Config::from_env())?;
    match reader.get(&column_key(key, name), name.as_bytes())? {
        Some(col) => println!("{}", format_column(key, &col)),
        None => println!("(nil)"),
    }
    Ok(())
}

fn cmd_compact(args: &[String]) -> Result<()> {
    let mut major = false;
    let mut gc_before = i32::MAX;
    let mut positional = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--major" => major = true,
            "--gc-before" => {
                let v = iter.next().context("--gc-before requires a value")?;
                gc_before = v.parse().context("--gc-before must be an integer")?;
            }
            other => positional.push(other.to_string()),
        }
    }
    if positional.len() < 2 {
        bail!("usage: cli compact [--major] [--gc-before N] <out-prefix> <in-prefix>...");
    }
    let out_prefix = &positional[0];
    let in_prefixes = &positional[1..];

    let config = Config::from_env();
    let comparator = comparator();

    let mut scanners = Vec::with_capacity(in_prefixes.len());
    for prefix in in_prefixes {
        let reader = Reader::open(SstPaths::from_prefix(prefix), comparator.clone(), 1, config)?;
        scanners.push(reader.scanner()?);
    }

    let out_paths = SstPaths::from_prefix(out_prefix);
    let expected = in_prefixes.len().max(1) * 16;
    let mut out_writer = Writer::create(out_paths, comparator.clone(), 1, config, expected)?;
    let stats = sstable::run_compaction(scanners, comparator, 1, gc_before, major, config, &mut out_writer)?;
    out_writer.finalize()?;

    println!(
        "compacted {} inputs -> {out_prefix}: {} slices, {} columns, {} dropped (shadowed), {} dropped (tombstone gc)",
        in_prefixes.len(),
        stats.slices_emitted,
        stats.columns_emitted,
        stats.columns_dropped_shadowed,
        stats.columns_dropped_tombstone,
    );
    Ok(())
}
