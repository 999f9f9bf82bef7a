// ============================================================
// Layer 5 — Segmentation Model
// ============================================================
// One class id per pixel.
//
//   images [N,H,W,C] ─▶ NCHW ─▶ net.inference ─▶ logits [N, K, H, W]
//   masks  [N,H,W,1]
//
// Two heads, chosen by `--dice`:
//
//   softmax (K = classes)
//     xe  = mean per-pixel cross-entropy   (loss)
//     acc = mean per-pixel top-1 accuracy
//
//   dice (K = 1, classes must be 2)
//     p   = sigmoid(logits)
//     di  = -2 (Σ gt·p + ε) / (Σ gt + Σ p + ε),  ε = 1e-5   (loss)
//
// Stream pipeline: resize(max_size) → augments (training only)
//                  → clip(round=clip_stride) → rasterize,
// with annotations turned on. Geometric stages move image and mask
// together.

use anyhow::{bail, ensure, Result};
use burn::{
    module::AutodiffModule,
    prelude::*,
    tensor::{
        activation::sigmoid,
        backend::AutodiffBackend,
    },
};

use crate::data::{
    augments::load_augments,
    stream::StreamExtras,
    transforms::Transform,
};
use crate::domain::record::Record;
use crate::ml::classification::classification_heads;
use crate::ml::model::{
    class_ids, image_tensor, to_nchw, Architecture, Feed, Fetches, GraphState, Labels, Model,
    ModelSettings, Segmenter,
};

const DICE_EPSILON: f64 = 1e-5;

/// Soft dice loss; -1 for a perfect prediction, towards 0 for none.
pub fn dice_loss<B: Backend, const D: usize>(gt: Tensor<B, D>, prob: Tensor<B, D>) -> Tensor<B, 1> {
    let overlap = (gt.clone() * prob.clone()).sum();
    let total = gt.sum() + prob.sum();
    overlap.add_scalar(DICE_EPSILON).mul_scalar(-2.0) / total.add_scalar(DICE_EPSILON)
}

pub struct SegmentationModel<A> {
    arch:        A,
    settings:    ModelSettings,
    state:       GraphState,
    metrics:     Vec<String>,
    losses:      Vec<String>,
    regularized: bool,
}

impl<A: Architecture> SegmentationModel<A> {
    pub fn new(arch: A, settings: ModelSettings) -> Self {
        Self {
            arch,
            settings,
            state: GraphState::Constructed,
            metrics: Vec::new(),
            losses: Vec::new(),
            regularized: false,
        }
    }

    /// Logits per pixel: 1 with dice, `classes` otherwise.
    fn outputs(&self) -> usize {
        if self.settings.dice { 1 } else { self.settings.classes }
    }

    fn fetch<B: Backend, N: Segmenter<B>>(&self, net: &N, feed: Feed<B>) -> Result<Fetches<B>> {
        let Labels::Masks(masks) = feed.labels else {
            bail!("segmentation model fed per-image labels");
        };
        let logits = net.inference(to_nchw(feed.images), feed.is_training);
        let [n, k, h, w] = logits.dims();
        let [mn, mh, mw, _] = masks.dims();
        ensure!(
            (n, h, w) == (mn, mh, mw),
            "{} produced {}x{} maps for {}x{} masks",
            self.arch.name(), h, w, mh, mw
        );
        ensure!(k == self.outputs(), "{} produced {} channels, expected {}", self.arch.name(), k, self.outputs());

        let regularization = net.regularization();
        if self.settings.dice {
            let prob = sigmoid(logits).reshape([n, h, w]);
            let gt = masks.reshape([n, h, w]).float();
            let di = dice_loss(gt, prob);
            return Ok(Fetches { metrics: vec![di.clone()], losses: vec![di], regularization, prob: None });
        }

        let flat_logits = logits.permute([0, 2, 3, 1]).reshape([n * h * w, k]);
        let flat_labels = masks.reshape([n * h * w]);
        let (xe, acc) = classification_heads(flat_logits, flat_labels);
        Ok(Fetches { metrics: vec![xe.clone(), acc], losses: vec![xe], regularization, prob: None })
    }
}

impl<B, A> Model<B> for SegmentationModel<A>
where
    B: AutodiffBackend,
    A: Architecture,
    A::Net<B>: Segmenter<B> + AutodiffModule<B, InnerModule = A::Net<B::InnerBackend>>,
    A::Net<B::InnerBackend>: Segmenter<B::InnerBackend>,
{
    type Graph = A::Net<B>;

    fn build_graph(&mut self, device: &B::Device) -> Result<Self::Graph> {
        ensure!(self.state == GraphState::Constructed, "graph already built");
        if self.settings.dice {
            ensure!(self.settings.classes == 2, "dice loss needs exactly 2 classes");
            self.metrics = vec!["di".to_string()];
            self.losses = vec!["di".to_string()];
        } else {
            ensure!(self.settings.classes >= 2, "segmentation needs at least 2 classes");
            self.metrics = vec!["xe".to_string(), "acc".to_string()];
            self.losses = vec!["xe".to_string()];
        }
        let net = self.arch.init::<B>(self.outputs(), self.settings.channels, device);
        self.regularized = Segmenter::regularization(&net).is_some();
        self.state = GraphState::Built;
        tracing::info!(
            "Built {} for {} classes{}",
            self.arch.name(),
            self.settings.classes,
            if self.settings.dice { " (dice)" } else { "" }
        );
        Ok(net)
    }

    fn metrics(&self) -> &[String] {
        &self.metrics
    }

    fn losses(&self) -> &[String] {
        &self.losses
    }

    fn regularized(&self) -> bool {
        self.regularized
    }

    fn feed_dict<BB: Backend>(
        &self,
        record:      &Record,
        is_training: bool,
        device:      &BB::Device,
    ) -> Result<Feed<BB>> {
        let Some(masks) = &record.annotations else {
            bail!("segmentation record has no annotation masks");
        };
        ensure!(masks.channels == 1, "masks must have one channel, got {}", masks.channels);
        ensure!(
            (masks.batch, masks.height, masks.width)
                == (record.images.batch, record.images.height, record.images.width),
            "mask batch {:?} does not match image batch {:?}",
            masks.dims(), record.images.dims()
        );
        let ids = class_ids(&masks.data, self.settings.classes)?;
        let labels = Tensor::<BB, 1, Int>::from_ints(ids.as_slice(), device).reshape(masks.dims());
        Ok(Feed {
            is_training,
            images: image_tensor(&record.images, device),
            labels: Labels::Masks(labels),
        })
    }

    fn train_fetch(&self, graph: &Self::Graph, feed: Feed<B>) -> Result<Fetches<B>> {
        self.fetch(graph, feed)
    }

    fn eval_fetch(
        &self,
        graph: &<Self::Graph as AutodiffModule<B>>::InnerModule,
        feed:  Feed<B::InnerBackend>,
    ) -> Result<Fetches<B::InnerBackend>> {
        self.fetch(graph, feed)
    }

    fn extra_stream_config(&self, is_training: bool) -> Result<StreamExtras> {
        let s = &self.settings;
        let augments = load_augments(s.augments.as_deref(), is_training)?;
        let mut transforms = Vec::with_capacity(augments.len() + 3);
        transforms.push(Transform::Resize { max_size: s.max_size });
        transforms.extend(augments);
        transforms.push(Transform::Clip {
            shift:       if is_training { s.clip_shift } else { 0 },
            width:       s.fix_width,
            height:      s.fix_height,
            round:       s.clip_stride,
            border_type: None,
        });
        transforms.push(Transform::Rasterize);
        Ok(StreamExtras { transforms: Some(transforms), annotate: Some(vec![1]) })
    }
}
