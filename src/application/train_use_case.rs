// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates a training run in order:
//
//   Step 1: Check the configuration        (db is required)
//   Step 2: Pick the network and task      (Layer 5 - ml::zoo)
//   Step 3: Run the training driver        (Layer 5 - ml::trainer)
//             streams come from            (Layer 4 - data::stream)
//             checkpoints go through       (Layer 6 - infra)
//
// Reference: Rust Book §13 (Iterators and Closures)
//            Burn Book §5 (Training)

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

use crate::data::stream::create_stream;
use crate::ml::{
    classification::ClassificationModel,
    model::{Model, ModelSettings},
    segmentation::SegmentationModel,
    trainer::{train, TrainBackend, TrainReport},
    zoo::{ConvNetConfig, FcnConfig, ResNetV2Config},
};

/// Network selected with `--net`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetKind {
    #[default]
    Conv,
    Fcn,
    #[serde(rename = "resnet-v2-18")]
    ResnetV2_18,
    #[serde(rename = "resnet-v2-18-cifar")]
    ResnetV2_18Cifar,
}

impl NetKind {
    pub fn is_segmentation(self) -> bool {
        matches!(self, NetKind::Fcn)
    }
}

// ─── Training Configuration ──────────────────────────────────────────────────
// Every option of a training run. Serialisable so the run can be
// recorded next to its checkpoints. Path options use None for
// "not configured".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    // model
    pub classes:     usize,
    pub dice:        bool,
    pub net:         NetKind,

    // data
    pub db:          Option<String>,
    pub val_db:      Option<String>,
    pub mixin:       Option<String>,
    pub channels:    usize,
    pub cache:       bool,
    pub augments:    Option<String>,
    pub colorspace:  String,
    pub picpac_dump: usize,
    pub batch:       usize,
    pub max_size:    u32,
    pub fix_width:   u32,
    pub fix_height:  u32,
    pub clip_stride: u32,
    pub clip_shift:  u32,

    // checkpoints
    pub model:       Option<String>,
    pub resume:      Option<String>,
    pub max_to_keep: usize,

    // schedule
    pub epoch_steps: Option<usize>,
    pub max_epochs:  usize,
    pub ckpt_epochs: usize,
    pub val_epochs:  usize,

    // optimiser
    pub lr:          f64,
    pub decay_rate:  f64,
    pub decay_steps: f64,
    pub adam:        bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            classes:     2,
            dice:        false,
            net:         NetKind::Conv,
            db:          None,
            val_db:      None,
            mixin:       None,
            channels:    3,
            cache:       true,
            augments:    Some("augments.json".to_string()),
            colorspace:  "RGB".to_string(),
            picpac_dump: 20,
            batch:       1,
            max_size:    200_000,
            fix_width:   0,
            fix_height:  0,
            clip_stride: 16,
            clip_shift:  0,
            model:       Some("model".to_string()),
            resume:      None,
            max_to_keep: 100,
            epoch_steps: None,
            max_epochs:  500,
            ckpt_epochs: 10,
            val_epochs:  10,
            lr:          0.01,
            decay_rate:  0.95,
            decay_steps: 500.0,
            adam:        true,
        }
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Run the whole training loop and return what it did.
    pub fn execute(&self) -> Result<TrainReport> {
        let cfg = &self.config;

        // ── Step 1: Configuration ────────────────────────────────────────────
        ensure!(
            cfg.db.as_deref().is_some_and(|p| !p.is_empty()),
            "No training database configured (--db)"
        );
        ensure!(cfg.batch > 0, "--batch must be positive");

        // ── Step 2: Model ────────────────────────────────────────────────────
        let settings = ModelSettings::from(cfg);
        let task = if cfg.net.is_segmentation() { "segmentation" } else { "classification" };
        tracing::info!("Network: {:?} ({}), classes: {}", cfg.net, task, cfg.classes);
        match cfg.net {
            NetKind::Conv => self.fit(ClassificationModel::new(ConvNetConfig::new(), settings)),
            NetKind::ResnetV2_18 => {
                self.fit(ClassificationModel::new(ResNetV2Config::resnet_v2_18(), settings))
            }
            NetKind::ResnetV2_18Cifar => {
                self.fit(ClassificationModel::new(ResNetV2Config::resnet_v2_18_cifar(), settings))
            }
            NetKind::Fcn => self.fit(SegmentationModel::new(FcnConfig::new(), settings)),
        }
    }

    // ── Step 3: Driver ───────────────────────────────────────────────────────
    fn fit<M: Model<TrainBackend>>(&self, mut model: M) -> Result<TrainReport> {
        let cfg = &self.config;
        let device = Default::default();
        train::<TrainBackend, _, _, _>(cfg, &mut model, device, |path, is_training, extras| {
            create_stream(cfg, path, is_training, extras)
        })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fixtures::{write_classification_db, write_segmentation_db};

    #[test]
    fn test_defaults() {
        let cfg = TrainConfig::default();
        assert_eq!(cfg.classes, 2);
        assert_eq!(cfg.augments.as_deref(), Some("augments.json"));
        assert_eq!(cfg.model.as_deref(), Some("model"));
        assert_eq!(cfg.clip_stride, 16);
        assert_eq!(cfg.decay_steps, 500.0);
        assert!(cfg.adam && cfg.cache && !cfg.dice);
        assert!(cfg.db.is_none() && cfg.epoch_steps.is_none());
    }

    #[test]
    fn test_config_json_round_trip() {
        let cfg = TrainConfig { net: NetKind::ResnetV2_18Cifar, ..TrainConfig::default() };
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"resnet-v2-18-cifar\""));
        let back: TrainConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn test_missing_db_is_fatal() {
        let uc = TrainUseCase::new(TrainConfig { db: Some(String::new()), ..TrainConfig::default() });
        let err = uc.execute().unwrap_err();
        assert!(err.to_string().contains("--db"));
    }

    #[test]
    fn test_nonexistent_db_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let uc = TrainUseCase::new(TrainConfig {
            db:       Some(dir.path().join("absent.avdb").to_string_lossy().into_owned()),
            model:    None,
            augments: None,
            ..TrainConfig::default()
        });
        assert!(uc.execute().is_err());
    }

    #[test]
    fn test_segmentation_run_without_model_dir() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("seg.avdb");
        write_segmentation_db(&db, 2, 8);
        let uc = TrainUseCase::new(TrainConfig {
            net:         NetKind::Fcn,
            db:          Some(db.to_string_lossy().into_owned()),
            model:       None,
            augments:    None,
            picpac_dump: 0,
            clip_stride: 8,
            max_epochs:  1,
            ..TrainConfig::default()
        });
        let report = uc.execute().unwrap();
        assert_eq!(report.epochs, 1);
        assert_eq!(report.steps, 2);
        assert!(report.checkpoints.is_empty());
        assert!(report.validated.is_empty());
    }

    #[test]
    fn test_explicit_epoch_steps() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("cls.avdb");
        write_classification_db(&db, 4, 8);
        let uc = TrainUseCase::new(TrainConfig {
            db:          Some(db.to_string_lossy().into_owned()),
            model:       None,
            augments:    None,
            picpac_dump: 0,
            clip_stride: 8,
            epoch_steps: Some(3),
            max_epochs:  2,
            adam:        false,
            ..TrainConfig::default()
        });
        assert_eq!(uc.execute().unwrap().steps, 6);
    }
}
