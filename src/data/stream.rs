// ============================================================
// Layer 4 — Image Stream Factory
// ============================================================
// Turns an AVDB database into a lazy sequence of batches.
//
//   Db (Dataset) ──▶ ShuffledDataset ──▶ decode ──▶ transforms
//                                                       │
//                                                       ▼
//                                   SampleBatcher ──▶ Record
//
// Training streams loop forever: the order is shuffled once at
// start and again each time it wraps. Validation streams walk the
// database once, then return `None` until `reset`.
//
// The last batch of a finite stream may be short; the driver
// weights metrics by the actual batch size.

use anyhow::{ensure, Context, Result};
use burn::data::{
    dataloader::batcher::Batcher,
    dataset::{transform::ShuffledDataset, Dataset},
};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::application::train_use_case::TrainConfig;
use crate::data::{
    db::{Db, RawRecord},
    transforms::{Plane, Sample, Transform},
};
use crate::domain::{
    record::{ImageBatch, Meta, Record},
    traits::RecordStream,
};
use crate::infra::logging::print_red;

/// Databases above this size trigger a warning when caching is on.
pub const CACHE_WARN_BYTES: u64 = 0x4000_0000;

/// Where training streams write their first few decoded samples.
pub const DUMP_DIR: &str = "picpac_dump";

fn default_dump_dir() -> PathBuf {
    PathBuf::from(DUMP_DIR)
}

// ─── Stream Configuration ─────────────────────────────────────────────────────
/// Everything an `ImageStream` needs to know.
///
/// Serialises to the same key names the stream settings have always
/// used, so a config can be written out next to a model and read back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub db:         PathBuf,
    #[serde(rename = "loop")]
    pub looping:    bool,
    pub shuffle:    bool,
    pub reshuffle:  bool,
    /// Accepted for compatibility; sampling is never stratified.
    pub stratify:   bool,
    /// Non-empty means every record carries a label mask.
    #[serde(default)]
    pub annotate:   Vec<u32>,
    pub channels:   usize,
    pub dtype:      String,
    pub batch:      usize,
    pub colorspace: String,
    pub cache:      bool,
    #[serde(default)]
    pub transforms: Vec<Transform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dump:       Option<usize>,
    #[serde(skip, default = "default_dump_dir")]
    pub dump_dir:   PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mixin:      Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mixin_group_reset: Option<u32>,
    /// Serve one mixin example after this many primary examples.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mixin_group_delta: Option<u32>,
    /// Fixed RNG seed for shuffling and augmentation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed:       Option<u64>,
}

impl StreamConfig {
    /// Base settings for a stream over `db`.
    pub fn new(db: impl Into<PathBuf>, is_training: bool, cfg: &TrainConfig) -> Self {
        Self {
            db:         db.into(),
            looping:    is_training,
            shuffle:    is_training,
            reshuffle:  is_training,
            stratify:   is_training,
            annotate:   Vec::new(),
            channels:   cfg.channels,
            dtype:      "float32".to_string(),
            batch:      cfg.batch,
            colorspace: cfg.colorspace.clone(),
            cache:      cfg.cache,
            transforms: Vec::new(),
            dump:       None,
            dump_dir:   default_dump_dir(),
            mixin:      None,
            mixin_group_reset: None,
            mixin_group_delta: None,
            seed:       None,
        }
    }

    /// Overlay model-provided settings. Keys the model sets win.
    pub fn merge(&mut self, extras: StreamExtras) {
        if let Some(transforms) = extras.transforms {
            self.transforms = transforms;
        }
        if let Some(annotate) = extras.annotate {
            self.annotate = annotate;
        }
    }
}

/// Stream settings a model contributes (see `Model::extra_stream_config`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamExtras {
    pub transforms: Option<Vec<Transform>>,
    pub annotate:   Option<Vec<u32>>,
}

// ─── Factory ──────────────────────────────────────────────────────────────────
/// Whether a database of `bytes` is too large to cache comfortably.
pub fn too_big_to_cache(bytes: u64, cache: bool) -> bool {
    cache && bytes > CACHE_WARN_BYTES
}

/// Resolve the full stream configuration for `path`.
pub fn stream_config(
    cfg:         &TrainConfig,
    path:        &str,
    is_training: bool,
    extras:      StreamExtras,
) -> Result<StreamConfig> {
    let db = Path::new(path);
    ensure!(db.is_file(), "Database '{}' does not exist", path);

    println!("CACHE: {}", cfg.cache);
    let bytes = fs::metadata(db)
        .with_context(|| format!("Cannot stat database '{path}'"))?
        .len();
    if too_big_to_cache(bytes, cfg.cache) {
        print_red("DB is probably too big to be cached, consider adding --cache 0");
    }

    let mut sc = StreamConfig::new(db, is_training, cfg);
    if is_training {
        if cfg.picpac_dump > 0 {
            sc.dump = Some(cfg.picpac_dump);
        }
        if let Some(mixin) = cfg.mixin.as_deref().filter(|m| !m.is_empty()) {
            print_red("mixin support is incomplete in new picpac.");
            ensure!(Path::new(mixin).is_file(), "Mixin database '{}' does not exist", mixin);
            sc.mixin = Some(PathBuf::from(mixin));
            sc.mixin_group_reset = Some(0);
            sc.mixin_group_delta = Some(1);
        }
    }
    sc.merge(extras);
    Ok(sc)
}

/// Open a stream over `path` for training or validation.
pub fn create_stream(
    cfg:         &TrainConfig,
    path:        &str,
    is_training: bool,
    extras:      StreamExtras,
) -> Result<ImageStream> {
    ImageStream::new(stream_config(cfg, path, is_training, extras)?)
}

// ─── Epoch Order ──────────────────────────────────────────────────────────────
/// One pass over a database, shuffled or in file order.
struct Epoch {
    db:     Arc<Db>,
    view:   Box<dyn Dataset<RawRecord>>,
    cursor: usize,
}

impl Epoch {
    fn new(db: Arc<Db>, shuffle: bool, rng: &mut StdRng) -> Self {
        let view = ordering(&db, shuffle, rng);
        Self { db, view, cursor: 0 }
    }

    fn restart(&mut self, reshuffle: bool, rng: &mut StdRng) {
        self.cursor = 0;
        if reshuffle {
            self.view = ordering(&self.db, true, rng);
        }
    }

    fn done(&self) -> bool {
        self.cursor >= self.view.len()
    }

    fn next(&mut self) -> Result<RawRecord> {
        let index = self.cursor;
        self.cursor += 1;
        self.view
            .get(index)
            .with_context(|| format!("Cannot read record {index} of {}", self.view.len()))
    }
}

fn ordering(db: &Arc<Db>, shuffle: bool, rng: &mut StdRng) -> Box<dyn Dataset<RawRecord>> {
    if shuffle {
        Box::new(ShuffledDataset::new(Arc::clone(db), rng))
    } else {
        Box::new(Arc::clone(db))
    }
}

// ─── SampleBatcher ────────────────────────────────────────────────────────────
/// Stacks prepared samples into one `Record`.
#[derive(Debug, Clone)]
pub struct SampleBatcher {
    annotate: bool,
}

impl SampleBatcher {
    pub fn new(annotate: bool) -> Self {
        Self { annotate }
    }
}

impl Batcher<Sample, Result<Record>> for SampleBatcher {
    fn batch(&self, items: Vec<Sample>) -> Result<Record> {
        let labels = items.iter().map(|s| s.label).collect();
        let images = stack(items.iter().map(|s| Some(&s.image)), false)?;
        let annotations = if self.annotate {
            Some(stack(items.iter().map(|s| s.annotation.as_ref()), true)?)
        } else {
            None
        };
        Ok(Record { meta: Meta { labels }, images, annotations })
    }
}

/// Every plane must have the same shape; variable-size images can
/// only be batched with `batch = 1` or a fixed-size clip. Masks are
/// rounded to whole class ids.
fn stack<'a>(planes: impl ExactSizeIterator<Item = Option<&'a Plane>>, mask: bool) -> Result<ImageBatch> {
    let batch = planes.len();
    let mut shape = None;
    let mut data = Vec::new();
    for (i, plane) in planes.enumerate() {
        let plane = plane.context("Sample lost its annotation")?;
        let (w, h) = plane.dimensions();
        let this = (h as usize, w as usize, plane.channels());
        let first = *shape.get_or_insert(this);
        ensure!(
            this == first,
            "image {} in batch is {:?}, expected {:?}; \
             set fix_width/fix_height to batch variable-size images",
            i, this, first
        );
        let values = plane.pixel_values();
        if mask {
            data.extend(values.into_iter().map(f32::round));
        } else {
            data.extend(values);
        }
    }
    let (height, width, channels) = shape.context("cannot stack an empty list of images")?;
    Ok(ImageBatch { batch, height, width, channels, data })
}

// ─── ImageStream ──────────────────────────────────────────────────────────────
pub struct ImageStream {
    config:      StreamConfig,
    epoch:       Epoch,
    mixin:       Option<Epoch>,
    since_mixin: usize,
    batcher:     SampleBatcher,
    bgr:         bool,
    rng:         StdRng,
    dumped:      usize,
}

impl ImageStream {
    pub fn new(config: StreamConfig) -> Result<Self> {
        ensure!(config.dtype == "float32", "Unsupported dtype '{}'", config.dtype);
        ensure!(config.batch >= 1, "batch must be at least 1");
        ensure!(
            matches!(config.channels, 1 | 3),
            "channels must be 1 or 3, got {}",
            config.channels
        );
        let bgr = match config.colorspace.to_ascii_uppercase().as_str() {
            "RGB" => false,
            "BGR" => true,
            other => anyhow::bail!("Unsupported colorspace '{other}'"),
        };
        if config.stratify {
            tracing::debug!("stratified sampling not supported, using plain shuffle");
        }

        let db = Arc::new(Db::open(&config.db, config.cache)?);
        ensure!(!db.is_empty(), "Database '{}' is empty", config.db.display());

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let size = db.len();
        let epoch = Epoch::new(db, config.shuffle, &mut rng);

        let mixin = match &config.mixin {
            Some(path) => {
                let db = Arc::new(Db::open(path, config.cache)?);
                ensure!(!db.is_empty(), "Mixin database '{}' is empty", path.display());
                if config.mixin_group_reset.is_some_and(|r| r > 0) {
                    tracing::warn!("mixin_group_reset is ignored");
                }
                Some(Epoch::new(db, true, &mut rng))
            }
            None => None,
        };

        tracing::info!(
            "Stream over '{}': {} records, batch {}, {} transforms{}",
            config.db.display(),
            size,
            config.batch,
            config.transforms.len(),
            if config.looping { ", looping" } else { "" },
        );

        let batcher = SampleBatcher::new(!config.annotate.is_empty());
        Ok(Self { config, epoch, mixin, since_mixin: 0, batcher, bgr, rng, dumped: 0 })
    }

    fn next_primary(&mut self) -> Option<Result<RawRecord>> {
        if self.epoch.done() {
            if !self.config.looping {
                return None;
            }
            self.epoch.restart(self.config.reshuffle, &mut self.rng);
        }
        Some(self.epoch.next())
    }

    /// Primary records, with one mixin record after every
    /// `mixin_group_delta` of them.
    fn next_raw(&mut self) -> Option<Result<RawRecord>> {
        if let Some(mixin) = self.mixin.as_mut() {
            let delta = self.config.mixin_group_delta.unwrap_or(1).max(1) as usize;
            if self.since_mixin >= delta {
                self.since_mixin = 0;
                if mixin.done() {
                    mixin.restart(true, &mut self.rng);
                }
                return Some(mixin.next());
            }
        }
        let raw = self.next_primary()?;
        self.since_mixin += 1;
        Some(raw)
    }

    fn prepare(&mut self, raw: RawRecord) -> Result<Sample> {
        let annotate = !self.config.annotate.is_empty();
        let image = Plane::decode(&raw.image, self.config.channels, self.bgr)?;
        let annotation = match (&raw.annotation, annotate) {
            (Some(bytes), true) => Some(Plane::decode_annotation(bytes)?),
            (None, true) => anyhow::bail!("Record has no annotation but the stream requires one"),
            (_, false) => None,
        };

        let mut sample = Sample { label: raw.label, image, annotation, rasterized: false };
        for stage in &self.config.transforms {
            stage.apply(&mut sample, &mut self.rng);
        }

        if annotate {
            ensure!(sample.rasterized, "Annotations requested but no rasterize stage configured");
            if let Some(ann) = &sample.annotation {
                ensure!(
                    ann.dimensions() == sample.image.dimensions(),
                    "Annotation is {:?}, image is {:?}",
                    ann.dimensions(), sample.image.dimensions()
                );
            }
        }

        self.dump(&sample);
        Ok(sample)
    }

    fn dump(&mut self, sample: &Sample) {
        let Some(limit) = self.config.dump else { return };
        if self.dumped >= limit {
            return;
        }
        let n = self.dumped;
        self.dumped += 1;
        let dir = self.config.dump_dir.as_path();
        let result = fs::create_dir_all(dir)
            .map_err(anyhow::Error::from)
            .and_then(|_| save_plane(&sample.image, &dir.join(format!("{n}.png"))))
            .and_then(|_| match &sample.annotation {
                Some(ann) => save_plane(ann, &dir.join(format!("{n}.mask.png"))),
                None => Ok(()),
            });
        if let Err(e) = result {
            tracing::warn!("Cannot dump sample {}: {:#}", n, e);
        }
    }
}

impl Iterator for ImageStream {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut samples = Vec::with_capacity(self.config.batch);
        while samples.len() < self.config.batch {
            let Some(raw) = self.next_raw() else { break };
            match raw.and_then(|raw| self.prepare(raw)) {
                Ok(sample) => samples.push(sample),
                Err(e) => return Some(Err(e)),
            }
        }
        if samples.is_empty() {
            return None;
        }
        Some(self.batcher.batch(samples))
    }
}

impl RecordStream for ImageStream {
    fn size(&self) -> usize {
        self.epoch.view.len()
    }

    fn reset(&mut self) {
        self.epoch.restart(self.config.reshuffle, &mut self.rng);
    }
}

fn save_plane(plane: &Plane, path: &Path) -> Result<()> {
    plane
        .to_dynamic()
        .save(path)
        .with_context(|| format!("Cannot write '{}'", path.display()))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fixtures::{write_classification_db, write_segmentation_db, write_uniform_db};

    fn config_for(path: &Path, is_training: bool, batch: usize) -> StreamConfig {
        let cfg = TrainConfig { batch, picpac_dump: 0, ..TrainConfig::default() };
        let mut sc = StreamConfig::new(path, is_training, &cfg);
        sc.seed = Some(7);
        sc
    }

    fn labels(stream: &mut ImageStream, batches: usize) -> Vec<f32> {
        (0..batches)
            .flat_map(|_| stream.next().unwrap().unwrap().meta.labels)
            .collect()
    }

    #[test]
    fn test_missing_db_is_fatal() {
        let cfg = TrainConfig::default();
        let err = stream_config(&cfg, "/no/such/db.avdb", true, StreamExtras::default());
        assert!(err.is_err());
    }

    #[test]
    fn test_training_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.avdb");
        write_classification_db(&path, 2, 8);
        let cfg = TrainConfig { picpac_dump: 20, ..TrainConfig::default() };
        let extras = StreamExtras { transforms: Some(vec![Transform::Rasterize]), annotate: None };

        let sc = stream_config(&cfg, path.to_str().unwrap(), true, extras).unwrap();
        assert!(sc.looping && sc.shuffle && sc.reshuffle);
        assert_eq!(sc.dump, Some(20));
        assert_eq!(sc.transforms, vec![Transform::Rasterize]);
        assert!(sc.annotate.is_empty());

        let sc = stream_config(&cfg, path.to_str().unwrap(), false, StreamExtras::default()).unwrap();
        assert!(!sc.looping && !sc.shuffle);
        assert_eq!(sc.dump, None);
    }

    #[test]
    fn test_cache_warning_threshold() {
        assert!(!too_big_to_cache(CACHE_WARN_BYTES, true));
        assert!(too_big_to_cache(CACHE_WARN_BYTES + 1, true));
        assert!(!too_big_to_cache(CACHE_WARN_BYTES + 1, false));
        assert!(!too_big_to_cache(1024, true));
    }

    #[test]
    fn test_validation_stream_is_finite_and_resets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("val.avdb");
        write_classification_db(&path, 5, 8);

        let mut stream = ImageStream::new(config_for(&path, false, 2)).unwrap();
        assert_eq!(stream.size(), 5);
        let sizes: Vec<usize> = stream.by_ref().map(|r| r.unwrap().batch_size()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(stream.next().is_none());

        stream.reset();
        let labels: Vec<f32> = stream
            .by_ref()
            .flat_map(|r| r.unwrap().meta.labels)
            .collect();
        assert_eq!(labels, vec![0.0, 1.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_training_stream_loops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.avdb");
        write_classification_db(&path, 3, 8);

        let mut stream = ImageStream::new(config_for(&path, true, 2)).unwrap();
        for _ in 0..10 {
            let record = stream.next().unwrap().unwrap();
            assert_eq!(record.batch_size(), 2);
            assert_eq!(record.images.dims(), [2, 8, 8, 3]);
        }
    }

    #[test]
    fn test_shuffled_epoch_visits_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.avdb");
        write_classification_db(&path, 6, 4);

        let mut stream = ImageStream::new(config_for(&path, true, 1)).unwrap();
        let mut first = labels(&mut stream, 6);
        first.sort_by(f32::total_cmp);
        assert_eq!(first, vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_mixin_interleaves_after_each_primary() {
        let dir = tempfile::tempdir().unwrap();
        let primary = dir.path().join("train.avdb");
        let extra = dir.path().join("mixin.avdb");
        write_classification_db(&primary, 4, 4);
        write_uniform_db(&extra, 2, 4, [50, 50, 50], 9.0);

        let cfg = TrainConfig {
            mixin: Some(extra.to_string_lossy().into_owned()),
            picpac_dump: 0,
            ..TrainConfig::default()
        };
        let mut sc = stream_config(&cfg, primary.to_str().unwrap(), true, StreamExtras::default()).unwrap();
        assert_eq!(sc.mixin_group_delta, Some(1));
        sc.seed = Some(3);
        let mut stream = ImageStream::new(sc).unwrap();
        let seen = labels(&mut stream, 8);
        for (i, label) in seen.iter().enumerate() {
            if i % 2 == 1 {
                assert_eq!(*label, 9.0, "position {i} should come from the mixin db");
            } else {
                assert!(*label == 0.0 || *label == 1.0, "position {i} should be primary");
            }
        }
    }

    #[test]
    fn test_mixin_group_delta_sets_cadence() {
        let dir = tempfile::tempdir().unwrap();
        let primary = dir.path().join("train.avdb");
        let extra = dir.path().join("mixin.avdb");
        write_classification_db(&primary, 4, 4);
        write_uniform_db(&extra, 1, 4, [50, 50, 50], 9.0);

        let mut sc = config_for(&primary, true, 1);
        sc.mixin = Some(extra);
        sc.mixin_group_delta = Some(2);
        let mut stream = ImageStream::new(sc).unwrap();
        let mixed: Vec<bool> = labels(&mut stream, 9).iter().map(|&l| l == 9.0).collect();
        assert_eq!(mixed, vec![false, false, true, false, false, true, false, false, true]);
    }

    #[test]
    fn test_mixin_is_training_only() {
        let dir = tempfile::tempdir().unwrap();
        let primary = dir.path().join("val.avdb");
        let extra = dir.path().join("mixin.avdb");
        write_classification_db(&primary, 2, 4);
        write_uniform_db(&extra, 2, 4, [50, 50, 50], 9.0);

        let cfg = TrainConfig {
            mixin: Some(extra.to_string_lossy().into_owned()),
            ..TrainConfig::default()
        };
        let sc = stream_config(&cfg, primary.to_str().unwrap(), false, StreamExtras::default()).unwrap();
        assert!(sc.mixin.is_none());
        let stream = ImageStream::new(sc).unwrap();
        let all: Vec<f32> = stream.flat_map(|r| r.unwrap().meta.labels).collect();
        assert_eq!(all, vec![0.0, 1.0]);
    }

    #[test]
    fn test_dump_writes_limit_then_stops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.avdb");
        write_classification_db(&path, 2, 4);
        let out = dir.path().join("dump");

        let mut sc = config_for(&path, true, 1);
        sc.dump = Some(3);
        sc.dump_dir = out.clone();
        let mut stream = ImageStream::new(sc).unwrap();
        labels(&mut stream, 5);

        let mut files: Vec<String> = fs::read_dir(&out)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        files.sort();
        assert_eq!(files, vec!["0.png", "1.png", "2.png"]);
        let written = image::open(out.join("0.png")).unwrap();
        assert_eq!((written.width(), written.height()), (4, 4));
    }

    #[test]
    fn test_bgr_colorspace_swaps_channels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("red.avdb");
        write_uniform_db(&path, 1, 2, [255, 0, 0], 0.0);

        let first_pixel = |colorspace: &str| {
            let mut sc = config_for(&path, false, 1);
            sc.colorspace = colorspace.to_string();
            let record = ImageStream::new(sc).unwrap().next().unwrap().unwrap();
            record.images.data[..3].to_vec()
        };
        assert_eq!(first_pixel("RGB"), vec![255.0, 0.0, 0.0]);
        assert_eq!(first_pixel("BGR"), vec![0.0, 0.0, 255.0]);
    }

    #[test]
    fn test_unknown_colorspace_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.avdb");
        write_classification_db(&path, 1, 4);
        let mut sc = config_for(&path, false, 1);
        sc.colorspace = "HSV".to_string();
        assert!(ImageStream::new(sc).is_err());
    }

    #[test]
    fn test_segmentation_stream_yields_masks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.avdb");
        write_segmentation_db(&path, 2, 8);

        let mut sc = config_for(&path, false, 2);
        sc.annotate = vec![1];
        sc.transforms = vec![Transform::Rasterize];
        let mut stream = ImageStream::new(sc).unwrap();
        let record = stream.next().unwrap().unwrap();
        let masks = record.annotations.unwrap();
        assert_eq!(masks.dims(), [2, 8, 8, 1]);
        assert_eq!(masks.data[0], 0.0);
        assert_eq!(masks.data[7], 1.0);
    }

    #[test]
    fn test_annotation_without_rasterize_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.avdb");
        write_segmentation_db(&path, 1, 8);

        let mut sc = config_for(&path, false, 1);
        sc.annotate = vec![1];
        let mut stream = ImageStream::new(sc).unwrap();
        assert!(stream.next().unwrap().is_err());
    }

    #[test]
    fn test_single_channel_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gray.avdb");
        write_classification_db(&path, 1, 4);

        let mut sc = config_for(&path, false, 1);
        sc.channels = 1;
        let mut stream = ImageStream::new(sc).unwrap();
        let record = stream.next().unwrap().unwrap();
        assert_eq!(record.images.dims(), [1, 4, 4, 1]);
        assert!((record.images.data[0] - 20.0).abs() < 1e-3);
    }

    #[test]
    fn test_batcher_stacks_in_nhwc_order() {
        let plane = |raw: Vec<f32>| Plane::Luma(image::ImageBuffer::from_raw(2, 1, raw).unwrap());
        let sample = |label, image| Sample { label, image, annotation: None, rasterized: false };
        let batcher = SampleBatcher::new(false);
        let record = batcher
            .batch(vec![sample(0.0, plane(vec![0.0, 1.0])), sample(1.0, plane(vec![0.5, 0.25]))])
            .unwrap();
        assert_eq!(record.images.dims(), [2, 1, 2, 1]);
        assert_eq!(record.images.data, vec![0.0, 255.0, 127.5, 63.75]);
        assert_eq!(record.meta.labels, vec![0.0, 1.0]);
        assert!(record.annotations.is_none());
    }

    #[test]
    fn test_batcher_rejects_mixed_shapes() {
        let a = Plane::Luma(image::ImageBuffer::new(4, 4));
        let b = Plane::Luma(image::ImageBuffer::new(5, 4));
        let sample = |image| Sample { label: 0.0, image, annotation: None, rasterized: false };
        assert!(SampleBatcher::new(false).batch(vec![sample(a), sample(b)]).is_err());
    }

    #[test]
    fn test_config_uses_stream_key_names() {
        let cfg = TrainConfig::default();
        let sc = StreamConfig::new("db.avdb", true, &cfg);
        let json = serde_json::to_value(&sc).unwrap();
        assert_eq!(json["loop"], true);
        assert_eq!(json["dtype"], "float32");
        assert!(json.get("dump_dir").is_none());
    }
}
