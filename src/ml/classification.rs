// ============================================================
// Layer 5 — Classification Model
// ============================================================
// One class id per image.
//
//   images [N,H,W,C] ─▶ NCHW ─▶ net.inference ─▶ logits [N, classes]
//   labels [N]
//
//   xe  = mean softmax cross-entropy      (the only loss)
//   acc = mean(argmax(softmax) == label)  (reported, not optimised)
//
// Stream pipeline: resize(max_size) → augments (training only)
//                  → clip(round=clip_stride, replicate border)

use anyhow::{bail, ensure, Result};
use burn::{
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    prelude::*,
    tensor::{activation::softmax, backend::AutodiffBackend},
};

use crate::data::{
    augments::load_augments,
    stream::StreamExtras,
    transforms::{BorderType, Transform},
};
use crate::domain::record::Record;
use crate::ml::model::{
    class_ids, image_tensor, to_nchw, Architecture, Classifier, Feed, Fetches, GraphState,
    Labels, Model, ModelSettings,
};

/// Cross-entropy and top-1 accuracy for `[N, classes]` logits.
pub fn classification_heads<B: Backend>(
    logits: Tensor<B, 2>,
    labels: Tensor<B, 1, Int>,
) -> (Tensor<B, 1>, Tensor<B, 1>) {
    let xe = CrossEntropyLossConfig::new()
        .init(&logits.device())
        .forward(logits.clone(), labels.clone());
    let probs = softmax(logits, 1);
    // argmax(1) returns [N, 1]; squeeze before comparing with [N]
    let acc = probs.argmax(1).squeeze::<1>(1).equal(labels).float().mean();
    (xe, acc)
}

pub struct ClassificationModel<A> {
    arch:        A,
    settings:    ModelSettings,
    state:       GraphState,
    metrics:     Vec<String>,
    losses:      Vec<String>,
    regularized: bool,
}

impl<A: Architecture> ClassificationModel<A> {
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

    fn fetch<B: Backend, N: Classifier<B>>(&self, net: &N, feed: Feed<B>) -> Result<Fetches<B>> {
        let Labels::Classes(labels) = feed.labels else {
            bail!("classification model fed per-pixel labels");
        };
        let logits = net.inference(to_nchw(feed.images), feed.is_training);
        let [_, classes] = logits.dims();
        ensure!(
            classes == self.settings.classes,
            "{} produced {} logits, expected {}",
            self.arch.name(), classes, self.settings.classes
        );
        let prob = positive_probability(logits.clone());
        let (xe, acc) = classification_heads(logits, labels);
        Ok(Fetches {
            metrics:        vec![xe.clone(), acc],
            losses:         vec![xe],
            regularization: net.regularization(),
            prob:           Some(prob),
        })
    }
}

/// P(class 1) per image from `[N, classes]` logits.
pub fn positive_probability<B: Backend>(logits: Tensor<B, 2>) -> Tensor<B, 1> {
    let [n, classes] = logits.dims();
    let probs = softmax(logits, 1);
    if classes > 1 {
        probs.slice([0..n, 1..2]).reshape([n])
    } else {
        probs.reshape([n])
    }
}

impl<B, A> Model<B> for ClassificationModel<A>
where
    B: AutodiffBackend,
    A: Architecture,
    A::Net<B>: Classifier<B> + AutodiffModule<B, InnerModule = A::Net<B::InnerBackend>>,
    A::Net<B::InnerBackend>: Classifier<B::InnerBackend>,
{
    type Graph = A::Net<B>;

    fn build_graph(&mut self, device: &B::Device) -> Result<Self::Graph> {
        ensure!(self.state == GraphState::Constructed, "graph already built");
        ensure!(self.settings.classes >= 2, "classification needs at least 2 classes");
        let net = self.arch.init::<B>(self.settings.classes, self.settings.channels, device);
        self.regularized = Classifier::regularization(&net).is_some();
        self.metrics = vec!["xe".to_string(), "acc".to_string()];
        self.losses = vec!["xe".to_string()];
        self.state = GraphState::Built;
        tracing::info!("Built {} for {} classes", self.arch.name(), self.settings.classes);
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
        ensure!(
            record.meta.labels.len() == record.batch_size(),
            "record has {} labels for {} images",
            record.meta.labels.len(), record.batch_size()
        );
        let ids = class_ids(&record.meta.labels, self.settings.classes)?;
        Ok(Feed {
            is_training,
            images: image_tensor(&record.images, device),
            labels: Labels::Classes(Tensor::from_ints(ids.as_slice(), device)),
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
        let mut transforms = Vec::with_capacity(augments.len() + 2);
        transforms.push(Transform::Resize { max_size: s.max_size });
        transforms.extend(augments);
        transforms.push(Transform::Clip {
            shift:       if is_training { s.clip_shift } else { 0 },
            width:       s.fix_width,
            height:      s.fix_height,
            round:       s.clip_stride,
            border_type: Some(BorderType::Replicate),
        });
        Ok(StreamExtras { transforms: Some(transforms), annotate: None })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::train_use_case::TrainConfig;
    use crate::domain::record::{ImageBatch, Meta};
    use crate::ml::zoo::ConvNetConfig;
    use burn::backend::{Autodiff, NdArray};
    use std::io::Write;

    type B = Autodiff<NdArray>;

    fn settings(augments: Option<String>) -> ModelSettings {
        let cfg = TrainConfig {
            max_size: 1000,
            clip_stride: 16,
            augments,
            ..TrainConfig::default()
        };
        ModelSettings::from(&cfg)
    }

    fn record(labels: Vec<f32>) -> Record {
        let n = labels.len();
        Record {
            meta: Meta { labels },
            images: ImageBatch { batch: n, height: 8, width: 8, channels: 3, data: vec![1.0; n * 192] },
            annotations: None,
        }
    }

    #[test]
    fn test_training_pipeline_with_two_augments() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"type": "augment.flip", "horizontal": true}}, {{"type": "augment.add", "range": 10}}]"#
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let model = ClassificationModel::new(ConvNetConfig::new(), settings(Some(path)));

        let extras = Model::<B>::extra_stream_config(&model, true).unwrap();
        let transforms = extras.transforms.unwrap();
        assert_eq!(transforms.len(), 4);
        assert_eq!(transforms[0], Transform::Resize { max_size: 1000 });
        assert!(matches!(transforms[1], Transform::Flip { .. }));
        assert!(matches!(transforms[2], Transform::Add { .. }));
        assert!(matches!(
            transforms[3],
            Transform::Clip { round: 16, border_type: Some(BorderType::Replicate), .. }
        ));
        assert!(extras.annotate.is_none());
    }

    #[test]
    fn test_validation_pipeline_has_no_augments_or_shift() {
        let mut s = settings(Some("/not/read/for/validation.json".into()));
        s.clip_shift = 8;
        let model = ClassificationModel::new(ConvNetConfig::new(), s);
        let transforms = Model::<B>::extra_stream_config(&model, false)
            .unwrap()
            .transforms
            .unwrap();
        assert_eq!(transforms.len(), 2);
        assert!(matches!(transforms[1], Transform::Clip { shift: 0, .. }));
    }

    #[test]
    fn test_build_graph_once() {
        let device = Default::default();
        let mut model = ClassificationModel::new(ConvNetConfig::new().with_base_filters(4), settings(None));
        assert!(Model::<B>::metrics(&model).is_empty());
        Model::<B>::build_graph(&mut model, &device).unwrap();
        assert_eq!(Model::<B>::metrics(&model), ["xe", "acc"]);
        assert_eq!(Model::<B>::losses(&model), ["xe"]);
        assert!(!Model::<B>::regularized(&model));
        assert!(Model::<B>::build_graph(&mut model, &device).is_err());
    }

    #[test]
    fn test_train_fetch_produces_finite_loss() {
        let device = Default::default();
        let mut model = ClassificationModel::new(ConvNetConfig::new().with_base_filters(4), settings(None));
        let graph = Model::<B>::build_graph(&mut model, &device).unwrap();
        let feed = Model::<B>::feed_dict::<B>(&model, &record(vec![0.0, 1.0]), true, &device).unwrap();
        let fetches = Model::<B>::train_fetch(&model, &graph, feed).unwrap();
        let values = fetches.report_values().unwrap();
        assert_eq!(values.len(), 3);
        assert!(values.iter().all(|v| v.is_finite()));
        assert!((0.0..=1.0).contains(&values[1]));
    }

    #[test]
    fn test_feed_rejects_out_of_range_label() {
        let device = Default::default();
        let model = ClassificationModel::new(ConvNetConfig::new(), settings(None));
        assert!(Model::<B>::feed_dict::<NdArray>(&model, &record(vec![5.0]), false, &device).is_err());
    }

    #[test]
    fn test_heads_on_known_logits() {
        let device = Default::default();
        let logits = Tensor::<NdArray, 2>::from_floats([[5.0, 0.0], [5.0, 0.0]], &device);
        let labels = Tensor::<NdArray, 1, Int>::from_ints([0, 1], &device);
        let (xe, acc) = classification_heads(logits, labels);
        let acc: f64 = acc.into_scalar().elem();
        let xe: f64 = xe.into_scalar().elem();
        assert!((acc - 0.5).abs() < 1e-6);
        assert!(xe > 0.0);
    }

    #[test]
    fn test_positive_probability_takes_class_one() {
        let device = Default::default();
        let logits = Tensor::<NdArray, 2>::from_floats([[0.0, 0.0], [0.0, 100.0]], &device);
        let prob: Vec<f32> = positive_probability(logits).into_data().to_vec().unwrap();
        assert!((prob[0] - 0.5).abs() < 1e-5);
        assert!((prob[1] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_fetch_carries_positive_probability() {
        let device = Default::default();
        let mut model = ClassificationModel::new(ConvNetConfig::new().with_base_filters(4), settings(None));
        let graph = Model::<B>::build_graph(&mut model, &device).unwrap();
        let feed = Model::<B>::feed_dict::<B>(&model, &record(vec![0.0, 1.0]), false, &device).unwrap();
        let prob = Model::<B>::train_fetch(&model, &graph, feed).unwrap().prob.unwrap();
        assert_eq!(prob.dims(), [2]);
    }
}
