// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores a training snapshot at full precision with
// Burn's NamedMpkGzFileRecorder.
//
// Layout of a model directory:
//
//   model/
//     10.mpk.gz        ← weights after epoch 10
//     10-optim.mpk.gz  ← optimiser state (Adam moments / momentum)
//     10.state.json    ← epoch and global step
//     20.mpk.gz
//     ...
//     checkpoint.json  ← epochs still on disk, newest last
//     config.json      ← TrainConfig of the run that wrote them
//
// Only the newest `max_to_keep` checkpoints written in this run
// are kept; older ones are deleted as new ones arrive. A value of
// 0 keeps everything. Checkpoints left over from earlier runs are
// never touched.
//
// A checkpoint can be restored by passing its path with or
// without the `.mpk.gz` extension (`model/10` or `model/10.mpk.gz`).

use anyhow::{ensure, Context, Result};
use burn::{
    module::AutodiffModule,
    optim::Optimizer,
    prelude::*,
    record::{FileRecorder, FullPrecisionSettings, NamedMpkGzFileRecorder, Recorder},
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use crate::application::train_use_case::TrainConfig;

type CheckpointRecorder = NamedMpkGzFileRecorder<FullPrecisionSettings>;

/// Contents of `checkpoint.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointIndex {
    pub latest: Option<usize>,
    pub epochs: Vec<usize>,
}

/// Counters stored with each checkpoint (`<epoch>.state.json`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingState {
    pub epoch: usize,
    pub step:  usize,
}

/// Everything `restore` brings back.
pub struct Restored<M, O> {
    pub graph: M,
    pub optim: O,
    pub state: TrainingState,
}

/// Create the model directory if needed.
///
/// An existing directory is fine; an existing file at the same path
/// is an error.
pub fn ensure_model_dir(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    match fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(e) => Err(e)
            .with_context(|| format!("Cannot create model directory '{}'", path.display())),
    }
}

/// Writes numbered checkpoints into one directory and prunes old ones.
pub struct CheckpointManager {
    dir:         PathBuf,
    max_to_keep: usize,
    kept:        VecDeque<usize>,
}

impl CheckpointManager {
    /// The directory must already exist (see `ensure_model_dir`).
    pub fn new(dir: impl Into<PathBuf>, max_to_keep: usize) -> Self {
        Self { dir: dir.into(), max_to_keep, kept: VecDeque::new() }
    }

    /// Epochs saved by this manager that are still on disk.
    pub fn kept(&self) -> Vec<usize> {
        self.kept.iter().copied().collect()
    }

    /// Checkpoint path for `epoch`, without the recorder extension.
    pub fn base_path(&self, epoch: usize) -> PathBuf {
        self.dir.join(epoch.to_string())
    }

    /// Save weights, optimiser state and counters for `state.epoch`.
    /// Returns the weights file.
    pub fn save<B, M, O>(&mut self, graph: &M, optim: &O, state: TrainingState) -> Result<PathBuf>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let epoch = state.epoch;
        if let Some(&last) = self.kept.back() {
            ensure!(epoch > last, "checkpoint epoch {} is not after {}", epoch, last);
        }

        let base = self.base_path(epoch);
        let recorder = CheckpointRecorder::new();
        Recorder::<B>::record(&recorder, graph.clone().into_record(), base.clone())
            .with_context(|| format!("Failed to save checkpoint to '{}'", base.display()))?;
        Recorder::<B>::record(&recorder, optim.to_record(), optim_base(&base))
            .with_context(|| format!("Failed to save optimiser state for '{}'", base.display()))?;
        let state_path = state_file(&base);
        fs::write(&state_path, serde_json::to_string_pretty(&state)?)
            .with_context(|| format!("Cannot write '{}'", state_path.display()))?;
        self.kept.push_back(epoch);

        while self.max_to_keep > 0 && self.kept.len() > self.max_to_keep {
            if let Some(old) = self.kept.pop_front() {
                remove_checkpoint::<B>(&self.base_path(old));
            }
        }
        self.write_index()?;

        let file = with_recorder_ext::<B>(&base);
        tracing::debug!("Saved checkpoint: epoch {} step {} -> {}", epoch, state.step, file.display());
        Ok(file)
    }

    /// Load weights, optimiser state and counters from `path` into
    /// `graph` and `optim`.
    pub fn restore<B, M, O>(
        graph:  M,
        optim:  O,
        path:   impl AsRef<Path>,
        device: &B::Device,
    ) -> Result<Restored<M, O>>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let base = strip_recorder_ext::<B>(path.as_ref());
        let file = with_recorder_ext::<B>(&base);
        ensure!(file.is_file(), "Checkpoint '{}' does not exist", file.display());

        let recorder = CheckpointRecorder::new();
        let record = Recorder::<B>::load(&recorder, base.clone(), device).with_context(|| {
            format!("Cannot load checkpoint '{}'. Was it written by the same network?", file.display())
        })?;
        let optim_record = Recorder::<B>::load(&recorder, optim_base(&base), device).with_context(|| {
            format!("Cannot load optimiser state for '{}'. Was it written with the same solver?",
                file.display())
        })?;
        let state_path = state_file(&base);
        let json = fs::read_to_string(&state_path)
            .with_context(|| format!("Cannot read '{}'", state_path.display()))?;
        let state: TrainingState = serde_json::from_str(&json)
            .with_context(|| format!("Malformed '{}'", state_path.display()))?;

        tracing::info!("Restored '{}' (epoch {}, step {})", file.display(), state.epoch, state.step);
        Ok(Restored {
            graph: graph.load_record(record),
            optim: optim.load_record(optim_record),
            state,
        })
    }

    /// Save the run configuration next to the checkpoints.
    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        let path = self.dir.join("config.json");
        let json = serde_json::to_string_pretty(cfg)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }

    fn write_index(&self) -> Result<()> {
        let index = CheckpointIndex { latest: self.kept.back().copied(), epochs: self.kept() };
        let path = self.dir.join("checkpoint.json");
        fs::write(&path, serde_json::to_string_pretty(&index)?)
            .with_context(|| format!("Cannot write '{}'", path.display()))
    }
}

fn recorder_ext<B: Backend>() -> String {
    <CheckpointRecorder as FileRecorder<B>>::file_extension().to_string()
}

fn with_recorder_ext<B: Backend>(base: &Path) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(".");
    name.push(recorder_ext::<B>());
    PathBuf::from(name)
}

fn strip_recorder_ext<B: Backend>(path: &Path) -> PathBuf {
    let suffix = format!(".{}", recorder_ext::<B>());
    match path.to_str().and_then(|s| s.strip_suffix(&suffix)) {
        Some(base) => PathBuf::from(base),
        None => path.to_path_buf(),
    }
}

// The recorder replaces the extension, so sibling names must not
// contain a dot before it.
fn optim_base(base: &Path) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push("-optim");
    PathBuf::from(name)
}

fn state_file(base: &Path) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(".state.json");
    PathBuf::from(name)
}

fn remove_checkpoint<B: Backend>(base: &Path) {
    let files = [with_recorder_ext::<B>(base), with_recorder_ext::<B>(&optim_base(base)), state_file(base)];
    for file in files {
        if let Err(e) = fs::remove_file(&file) {
            tracing::warn!("Cannot remove old checkpoint file '{}': {}", file.display(), e);
        }
    }
}
