// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The training driver only ever talks to a `RecordStream`.
// `data::stream::ImageStream` is the implementation that reads
// AVDB files; tests plug in small in-memory streams.

use anyhow::Result;
use crate::domain::record::Record;

// ─── RecordStream ─────────────────────────────────────────────────────────────
/// A lazy source of batches.
///
/// Training streams loop forever and never return `None`.
/// Validation streams are finite: they yield every example once,
/// then `None` until `reset` is called.
pub trait RecordStream: Iterator<Item = Result<Record>> {
    /// Total number of examples in the underlying database
    /// (not the number of batches).
    fn size(&self) -> usize;

    /// Restart a finite stream from its first example.
    fn reset(&mut self);
}
