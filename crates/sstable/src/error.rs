//! The core's closed error hierarchy (§7 of the storage format spec).
//!
//! The writer, reader, scanner, and compaction iterator all return
//! `Result<_, SstError>` rather than an opaque `anyhow::Error` — callers one
//! layer up can match on a documented, finite set of failure modes instead of
//! string-sniffing a message.

use std::io;

/// A fatal error from the SSTable writer, reader, scanner, or compaction
/// iterator.
#[derive(Debug, thiserror::Error)]
pub enum SstError {
    /// The writer's caller fed a key that is not strictly non-decreasing at
    /// depth *D* relative to the previously appended key. The write is
    /// aborted immediately; temp files are left on disk for the caller to
    /// garbage-collect.
    #[error("input order violation: key {new:?} did not sort after previous key {previous:?}")]
    InputOrderViolation {
        /// Debug-formatted previous key.
        previous: String,
        /// Debug-formatted offending key.
        new: String,
    },

    /// A framing mismatch (bad tag byte, non-zero reserved byte, length that
    /// runs past EOF) was found while reading an SSTable triplet. The
    /// offending scanner is closed; the error propagates to the caller
    /// (compaction discards partial output).
    #[error("corrupt sstable at {path}: {reason}")]
    CorruptSSTable {
        /// Path to the file where corruption was detected.
        path: String,
        /// Human-readable description of what failed to parse.
        reason: String,
    },

    /// An underlying disk I/O error. Fatal to the operation in progress;
    /// retryable at the caller's discretion.
    #[error("transient I/O error: {0}")]
    TransientIO(#[from] io::Error),

    /// The caller bypassed the slice/block boundary rules (e.g. by appending
    /// pre-serialized slices larger than `TARGET_MAX_SLICE_BYTES`) and the
    /// writer cannot honor the configured size bound.
    #[error("bounded resource exhausted: {0}")]
    BoundedResourceExhaustion(String),
}

/// Convenience alias used throughout the `sstable` crate.
pub type Result<T> = std::result::Result<T, SstError>;
