// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// Everything that touches burn tensors lives here.
//
//   model.rs          — Model trait, feeds/fetches, network traits
//   classification.rs — per-image class prediction (xe, acc)
//   segmentation.rs   — per-pixel prediction (xe, acc or dice)
//   zoo/              — concrete networks selectable with --net
//   schedule.rs       — exponential LR decay and solver choice
//   trainer.rs        — epoch loop, validation, checkpoints
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)

/// Model abstraction shared by all tasks
pub mod model;

pub mod classification;
pub mod segmentation;
pub mod zoo;

/// Learning rate schedule
pub mod schedule;

/// Training driver with validation and checkpointing
pub mod trainer;
