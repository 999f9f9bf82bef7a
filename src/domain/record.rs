// ============================================================
// Layer 3 — Record Domain Types
// ============================================================
// A `Record` is what a stream yields per step: a batch of decoded
// images stacked into NHWC order, the per-example labels, and for
// segmentation a batch of label masks.
//
// Layout of `ImageBatch::data`:
//   index = ((n * height + y) * width + x) * channels + c
//
// This matches the `(batch, height, width, channels)` shape the
// models expect for their image input.

use serde::{Deserialize, Serialize};

/// Equally-shaped images stacked in NHWC order, 0..255 values.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBatch {
    pub batch:    usize,
    pub height:   usize,
    pub width:    usize,
    pub channels: usize,
    pub data:     Vec<f32>,
}

impl ImageBatch {
    pub fn dims(&self) -> [usize; 4] {
        [self.batch, self.height, self.width, self.channels]
    }
}

/// Per-batch metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    /// One label per example (class id for classification).
    pub labels: Vec<f32>,
}

/// One step's worth of data.
///
/// Classification streams leave `annotations` empty; segmentation
/// streams fill it with single-channel label masks.
#[derive(Debug, Clone)]
pub struct Record {
    pub meta:        Meta,
    pub images:      ImageBatch,
    pub annotations: Option<ImageBatch>,
}

impl Record {
    /// Number of examples in this record (used as the metrics weight).
    pub fn batch_size(&self) -> usize {
        self.images.batch
    }
}
