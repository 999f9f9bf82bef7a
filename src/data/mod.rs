// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything from an encoded database on disk to a stacked batch
// of f32 pixels:
//
//   AVDB file
//       │
//       ▼
//   Db               → offset index, optional cache, burn Dataset
//       │
//       ▼
//   ImageStream      → ShuffledDataset order, decode, colour conversion
//       │
//       ▼
//   Transform stages → imageops resize, flip, clip, rasterize
//       │
//       ▼
//   SampleBatcher    → NHWC image batch + labels / masks
//
// Only Burn's data traits are used here; tensors are built by
// `Model::feed_dict`.

/// Reads and writes the AVDB record format
pub mod db;

/// Per-sample resize / clip / flip / rasterize stages
pub mod transforms;

/// Loads the augmentation stage list from JSON
pub mod augments;

/// Stream configuration and the batching image stream
pub mod stream;

#[cfg(test)]
pub mod fixtures;
