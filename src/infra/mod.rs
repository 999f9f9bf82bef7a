// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting concerns used by several other layers:
//
//   checkpoint.rs — Saving and restoring weights, optimiser state
//                   and the global step at full precision
//                   (NamedMpkGzFileRecorder). Keeps the newest N
//                   checkpoints of a run and writes the run's
//                   TrainConfig next to them.
//
//   metrics.rs    — Weighted running averages of the per-step
//                   metrics, formatted for the console.
//
//   logging.rs    — tracing setup (console + timestamped log
//                   file) and the coloured summary lines.
//
// Reference: Burn Book §5 (Checkpointing)
//            tracing-subscriber Layer docs

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Weighted metric aggregation
pub mod metrics;

/// Log sinks and coloured console output
pub mod logging;
