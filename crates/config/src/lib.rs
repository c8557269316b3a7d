//! # Config — SSTable engine tunables
//!
//! Centralizes the size and sizing thresholds the `sstable` crate needs:
//! slice and block target sizes, the sparse index sampling interval, and
//! bloom filter sizing. Schema/cluster configuration is explicitly out of
//! scope for this crate — it only owns the knobs the storage format itself
//! exposes.
//!
//! Values are read from environment variables with documented defaults,
//! following the same `env_or` pattern this workspace's CLI already uses for
//! its own settings.

use std::env;

/// Default target size, in bytes, for a buffered slice before an artificial
/// boundary is forced (see §4.2 of the storage format spec).
pub const DEFAULT_TARGET_MAX_SLICE_BYTES: u64 = 64 * 1024;

/// Default target size, in bytes, for a data block before it is closed at
/// the next slice boundary.
pub const DEFAULT_TARGET_MAX_BLOCK_BYTES: u64 = 16 * 1024;

/// Default sparse index sampling interval: one retained `IndexEntry` per
/// this many blocks.
pub const DEFAULT_INDEX_INTERVAL: u32 = 128;

/// Default average number of columns hashed into the bloom filter per key.
pub const DEFAULT_BLOOM_KEYS_PER_COLUMN: usize = 11;

/// Default number of bloom filter hash functions.
pub const DEFAULT_BLOOM_HASHES: u32 = 15;

/// Reads an environment variable, parsing it as `T`, falling back to
/// `default` if unset or unparsable.
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Tunables for the SSTable writer, reader, and compaction iterator.
///
/// Constructed once per process (or per test) and threaded explicitly into
/// the writer/reader/compaction constructors — there is no global singleton,
/// matching §9's note that per-column-family configuration values should be
/// threaded explicitly rather than read from statics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Target size, in bytes, for a buffered slice before an artificial
    /// boundary is forced.
    pub target_max_slice_bytes: u64,
    /// Target size, in bytes, for a data block before it is closed.
    pub target_max_block_bytes: u64,
    /// Sparse index sampling interval (one retained entry per N blocks).
    pub index_interval: u32,
    /// Average number of columns hashed into the bloom filter per key; used
    /// to size the filter as `key_count * bloom_keys_per_column` items.
    pub bloom_keys_per_column: usize,
    /// Number of bloom filter hash functions.
    pub bloom_hashes: u32,
}

impl Config {
    /// Builds a `Config` from environment variables, falling back to the
    /// documented defaults for anything unset:
    ///
    /// ```text
    /// SSTABLE_TARGET_MAX_SLICE_BYTES  (default: 65536)
    /// SSTABLE_TARGET_MAX_BLOCK_BYTES  (default: 16384)
    /// SSTABLE_INDEX_INTERVAL          (default: 128)
    /// SSTABLE_BLOOM_KEYS_PER_COLUMN   (default: 11)
    /// SSTABLE_BLOOM_HASHES            (default: 15)
    /// ```
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            target_max_slice_bytes: env_or(
                "SSTABLE_TARGET_MAX_SLICE_BYTES",
                DEFAULT_TARGET_MAX_SLICE_BYTES,
            ),
            target_max_block_bytes: env_or(
                "SSTABLE_TARGET_MAX_BLOCK_BYTES",
                DEFAULT_TARGET_MAX_BLOCK_BYTES,
            ),
            index_interval: env_or("SSTABLE_INDEX_INTERVAL", DEFAULT_INDEX_INTERVAL),
            bloom_keys_per_column: env_or(
                "SSTABLE_BLOOM_KEYS_PER_COLUMN",
                DEFAULT_BLOOM_KEYS_PER_COLUMN,
            ),
            bloom_hashes: env_or("SSTABLE_BLOOM_HASHES", DEFAULT_BLOOM_HASHES),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_max_slice_bytes: DEFAULT_TARGET_MAX_SLICE_BYTES,
            target_max_block_bytes: DEFAULT_TARGET_MAX_BLOCK_BYTES,
            index_interval: DEFAULT_INDEX_INTERVAL,
            bloom_keys_per_column: DEFAULT_BLOOM_KEYS_PER_COLUMN,
            bloom_hashes: DEFAULT_BLOOM_HASHES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let c = Config::default();
        assert_eq!(c.target_max_slice_bytes, DEFAULT_TARGET_MAX_SLICE_BYTES);
        assert_eq!(c.target_max_block_bytes, DEFAULT_TARGET_MAX_BLOCK_BYTES);
        assert_eq!(c.index_interval, DEFAULT_INDEX_INTERVAL);
        assert_eq!(c.bloom_keys_per_column, DEFAULT_BLOOM_KEYS_PER_COLUMN);
        assert_eq!(c.bloom_hashes, DEFAULT_BLOOM_HASHES);
    }

    #[test]
    fn from_env_overrides_are_picked_up() {
        // Safety: tests in this module run serially by default (no #[test]
        // parallel env mutation across this crate), and the var is restored.
        std::env::set_var("SSTABLE_INDEX_INTERVAL", "64");
        let c = Config::from_env();
        assert_eq!(c.index_interval, 64);
        std::env::remove_var("SSTABLE_INDEX_INTERVAL");
    }

    #[test]
    fn from_env_falls_back_when_unset_or_unparsable() {
        std::env::set_var("SSTABLE_BLOOM_HASHES", "not-a-number");
        let c = Config::from_env();
        assert_eq!(c.bloom_hashes, DEFAULT_BLOOM_HASHES);
        std::env::remove_var("SSTABLE_BLOOM_HASHES");
    }
}
