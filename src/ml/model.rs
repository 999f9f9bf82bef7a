// ============================================================
// Layer 5 — Model Contract
// ============================================================
// The training driver never sees a concrete network. It talks to
// a `Model`, which owns three things:
//
//   1. how to build the trainable graph       (build_graph)
//   2. how a Record becomes input tensors     (feed_dict)
//   3. which metric/loss tensors a step yields (train_fetch / eval_fetch)
//
// A graph is any Burn module on an autodiff backend. Training runs
// on `B`, validation runs on `graph.valid()`: the same weights on
// `B::InnerBackend` with dropout off and batch norm in eval mode.
//
//   Record ─feed_dict─▶ Feed ─fetch─▶ Fetches { metrics, losses, l2 }
//                                          │
//                                          ▼
//                       L = Σ losses + l2, report = metrics ++ [l2] ++ [L]
//
// Networks plug into the two concrete models through
// `Architecture` plus either `Classifier` or `Segmenter`.
//
// Reference: Burn Book §3 (Modules), §5 (Autodiff)

use anyhow::{ensure, Context, Result};
use burn::{
    module::AutodiffModule,
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::application::train_use_case::TrainConfig;
use crate::data::stream::StreamExtras;
use crate::domain::record::{ImageBatch, Record};

// ─── Feed / Fetches ───────────────────────────────────────────────────────────
/// Ground truth for one batch.
#[derive(Debug, Clone)]
pub enum Labels<B: Backend> {
    /// One class id per image, shape [N].
    Classes(Tensor<B, 1, Int>),
    /// One class id per pixel, shape [N, H, W, 1].
    Masks(Tensor<B, 4, Int>),
}

/// Input tensors for one step.
#[derive(Debug, Clone)]
pub struct Feed<B: Backend> {
    pub is_training: bool,
    /// Images in NHWC order, f32 pixel values.
    pub images:      Tensor<B, 4>,
    pub labels:      Labels<B>,
}

/// Scalar tensors produced by one step.
#[derive(Debug, Clone)]
pub struct Fetches<B: Backend> {
    /// One per name in `Model::metrics`.
    pub metrics:        Vec<Tensor<B, 1>>,
    /// One per name in `Model::losses`.
    pub losses:         Vec<Tensor<B, 1>>,
    /// Weight decay term, present when the model is regularised.
    pub regularization: Option<Tensor<B, 1>>,
    /// P(class 1) per image, for models that derive it.
    pub prob:           Option<Tensor<B, 1>>,
}

impl<B: Backend> Fetches<B> {
    /// L = Σ losses + regularisation
    pub fn total_loss(&self) -> Result<Tensor<B, 1>> {
        let mut terms = self.losses.iter().cloned().chain(self.regularization.clone());
        let first = terms.next().context("model produced no loss terms")?;
        Ok(terms.fold(first, |acc, t| acc + t))
    }

    /// Values in report order: metrics, then l2 if present, then L.
    pub fn report_values(&self) -> Result<Vec<f64>> {
        Ok(self.report_with_loss(&self.total_loss()?))
    }

    /// Same as `report_values` with an already built `total_loss`.
    pub fn report_with_loss(&self, total: &Tensor<B, 1>) -> Vec<f64> {
        let mut values: Vec<f64> = self.metrics.iter().cloned().map(scalar).collect();
        if let Some(l2) = &self.regularization {
            values.push(scalar(l2.clone()));
        }
        values.push(scalar(total.clone()));
        values
    }
}

/// Read a one-element tensor back to the host.
pub fn scalar<B: Backend>(t: Tensor<B, 1>) -> f64 {
    t.into_scalar().elem::<f64>()
}

// ─── Model ────────────────────────────────────────────────────────────────────
/// Lifecycle of a model's graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    Constructed,
    Built,
}

/// A trainable model as seen by the driver.
pub trait Model<B: AutodiffBackend> {
    type Graph: AutodiffModule<B>;

    /// Create the graph and fix the metric/loss name lists.
    /// Calling this twice is an error.
    fn build_graph(&mut self, device: &B::Device) -> Result<Self::Graph>;

    /// Names of the reported metrics (empty before `build_graph`).
    fn metrics(&self) -> &[String];

    /// Names of the loss terms summed into L.
    fn losses(&self) -> &[String];

    /// Whether the graph contributes a weight decay term.
    fn regularized(&self) -> bool;

    /// Convert a stream record into input tensors.
    fn feed_dict<BB: Backend>(
        &self,
        record:      &Record,
        is_training: bool,
        device:      &BB::Device,
    ) -> Result<Feed<BB>>;

    /// Forward pass with gradients tracked.
    fn train_fetch(&self, graph: &Self::Graph, feed: Feed<B>) -> Result<Fetches<B>>;

    /// Forward pass in evaluation mode.
    fn eval_fetch(
        &self,
        graph: &<Self::Graph as AutodiffModule<B>>::InnerModule,
        feed:  Feed<B::InnerBackend>,
    ) -> Result<Fetches<B::InnerBackend>>;

    /// Run once after the graph is built, before any checkpoint is
    /// restored (e.g. to load pretrained weights).
    fn init_session(&self, graph: Self::Graph) -> Result<Self::Graph> {
        Ok(graph)
    }

    /// Freeze the parameters that must not be updated. Default: train all.
    fn restrict_trainable(&self, graph: Self::Graph) -> Self::Graph {
        graph
    }

    /// Stream settings this model needs (transforms, annotations).
    fn extra_stream_config(&self, _is_training: bool) -> Result<StreamExtras> {
        Ok(StreamExtras::default())
    }
}

// ─── Networks ─────────────────────────────────────────────────────────────────
/// Factory for a network family, independent of backend.
pub trait Architecture {
    type Net<B: Backend>: Module<B>;

    fn name(&self) -> &str;

    /// `outputs` is the number of logits per image (classification)
    /// or per pixel (segmentation).
    fn init<B: Backend>(&self, outputs: usize, channels: usize, device: &B::Device) -> Self::Net<B>;
}

/// Image → class logits.
pub trait Classifier<B: Backend>: Module<B> {
    /// images: [N, C, H, W] → logits: [N, classes]
    fn inference(&self, images: Tensor<B, 4>, is_training: bool) -> Tensor<B, 2>;

    fn regularization(&self) -> Option<Tensor<B, 1>> {
        None
    }
}

/// Image → per-pixel logits.
pub trait Segmenter<B: Backend>: Module<B> {
    /// images: [N, C, H, W] → logits: [N, outputs, H, W]
    fn inference(&self, images: Tensor<B, 4>, is_training: bool) -> Tensor<B, 4>;

    fn regularization(&self) -> Option<Tensor<B, 1>> {
        None
    }
}

// ─── Shared Settings ──────────────────────────────────────────────────────────
/// The part of the run configuration a model depends on.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub classes:     usize,
    pub dice:        bool,
    pub channels:    usize,
    pub max_size:    u32,
    pub fix_width:   u32,
    pub fix_height:  u32,
    pub clip_stride: u32,
    pub clip_shift:  u32,
    pub augments:    Option<String>,
}

impl From<&TrainConfig> for ModelSettings {
    fn from(c: &TrainConfig) -> Self {
        Self {
            classes:     c.classes,
            dice:        c.dice,
            channels:    c.channels,
            max_size:    c.max_size,
            fix_width:   c.fix_width,
            fix_height:  c.fix_height,
            clip_stride: c.clip_stride,
            clip_shift:  c.clip_shift,
            augments:    c.augments.clone(),
        }
    }
}

// ─── Tensor Builders ──────────────────────────────────────────────────────────
/// NHWC f32 image tensor from a stacked batch.
pub fn image_tensor<B: Backend>(batch: &ImageBatch, device: &B::Device) -> Tensor<B, 4> {
    Tensor::from_data(TensorData::new(batch.data.clone(), batch.dims()), device)
}

/// NHWC → NCHW, the layout Burn's conv layers expect.
pub fn to_nchw<B: Backend>(images: Tensor<B, 4>) -> Tensor<B, 4> {
    images.permute([0, 3, 1, 2])
}

/// Convert float class ids to ints, checking each is in [0, classes).
pub fn class_ids(values: &[f32], classes: usize) -> Result<Vec<i32>> {
    values
        .iter()
        .map(|&v| {
            ensure!(
                v >= 0.0 && v.fract() == 0.0 && (v as usize) < classes,
                "label {} is not a class id in [0, {})",
                v, classes
            );
            Ok(v as i32)
        })
        .collect()
}
