// ============================================================
// Layer 5 — Training Driver
// ============================================================
// Epoch loop with periodic validation and checkpointing.
//
//   build graph ─▶ model dir ─▶ optimiser ─▶ streams ─▶ init / resume
//        │                                       (weights, optimiser, step)
//        ▼
//   for epoch in 1..=max_epochs
//       epoch_steps × { next record → feed → fetch → backward → step }
//       "train epoch=.."                               (green)
//       epoch % val_epochs  == 0 → full pass over val   (red)
//       epoch % ckpt_epochs == 0 → <model>/<epoch>.mpk.gz (+ optimiser, step)
//
// Summary lines print the 0-based epoch that just finished;
// checkpoints are named by the count of finished epochs.
//
// Training runs on the autodiff backend `B`; validation runs on
// `graph.valid()`, i.e. `B::InnerBackend` without gradient tracking.
//
// Reference: Burn Book §5, Kingma & Ba (2015) Adam

use anyhow::{ensure, Context, Result};
use burn::{
    module::AutodiffModule,
    optim::{momentum::MomentumConfig, AdamConfig, GradientsParams, Optimizer, SgdConfig},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;

use crate::application::train_use_case::TrainConfig;
use crate::data::stream::StreamExtras;
use crate::domain::{record::Record, traits::RecordStream};
use crate::infra::{
    checkpoint::{ensure_model_dir, CheckpointManager, TrainingState},
    logging::{summary_green, summary_red},
    metrics::Metrics,
};
use crate::ml::model::{scalar, Model};
use crate::ml::schedule::{ExponentialDecay, Solver};

#[cfg(not(feature = "wgpu"))]
pub type TrainBackend = burn::backend::Autodiff<burn::backend::NdArray>;
#[cfg(feature = "wgpu")]
pub type TrainBackend = burn::backend::Autodiff<burn::backend::Wgpu>;

// ─── Epoch Plan ───────────────────────────────────────────────────────────────
/// What happens after a given epoch finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EpochActions {
    pub validate:   bool,
    pub checkpoint: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochPlan {
    pub max_epochs:     usize,
    pub val_epochs:     usize,
    pub ckpt_epochs:    usize,
    pub has_validation: bool,
    pub has_model_dir:  bool,
}

impl EpochPlan {
    /// `epoch` counts finished epochs (1 after the first).
    /// A period of 0 disables the action.
    pub fn actions(&self, epoch: usize) -> EpochActions {
        let every = |period: usize| period > 0 && epoch % period == 0;
        EpochActions {
            validate:   self.has_validation && every(self.val_epochs),
            checkpoint: self.has_model_dir && every(self.ckpt_epochs),
        }
    }
}

/// Running maximum of the last validation metric, starting at 0.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Best(f64);

impl Best {
    pub fn observe(&mut self, value: f64) -> f64 {
        if value > self.0 {
            self.0 = value;
        }
        self.0
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

/// Steps per epoch when not configured: one pass over the database.
pub fn default_epoch_steps(size: usize, batch: usize) -> usize {
    size.div_ceil(batch.max(1))
}

/// Reported metric names: model metrics, `l2` if regularised, then `L`.
pub fn report_names<B: AutodiffBackend, M: Model<B>>(model: &M) -> Vec<String> {
    let mut names = model.metrics().to_vec();
    if model.regularized() {
        names.push("l2".to_string());
    }
    names.push("L".to_string());
    names
}

/// What a finished run did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainReport {
    pub epochs:      usize,
    /// Steps taken in this run.
    pub steps:       usize,
    /// Step counter driving the schedule, including resumed steps.
    pub global_step: usize,
    pub best:        f64,
    pub validated:   Vec<usize>,
    pub checkpoints: Vec<usize>,
}

fn progress_bar(len: Option<u64>) -> ProgressBar {
    let (bar, template) = match len {
        Some(n) => (ProgressBar::new(n), "{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} {msg}"),
        None => (ProgressBar::new_spinner(), "{spinner:.red} [{elapsed_precise}] {pos} {msg}"),
    };
    bar.set_style(
        ProgressStyle::default_bar()
            .template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    bar
}

// ─── Training Context ─────────────────────────────────────────────────────────
/// Graph, optimiser and step counter for one run.
pub struct TrainingContext<B: AutodiffBackend, M: Model<B>, O> {
    graph:    Option<M::Graph>,
    optim:    O,
    schedule: ExponentialDecay,
    lr_scale: f64,
    step:     usize,
    device:   B::Device,
}

impl<B, M, O> TrainingContext<B, M, O>
where
    B: AutodiffBackend,
    M: Model<B>,
    O: Optimizer<M::Graph, B>,
{
    pub fn new(graph: M::Graph, optim: O, schedule: ExponentialDecay, solver: Solver, device: B::Device) -> Self {
        Self { graph: Some(graph), optim, schedule, lr_scale: solver.lr_scale(), step: 0, device }
    }

    pub fn graph(&self) -> Result<&M::Graph> {
        self.graph.as_ref().context("graph lost after a failed step")
    }

    pub fn step(&self) -> usize {
        self.step
    }

    /// Replace the graph with `f(graph)`.
    pub fn map_graph(&mut self, f: impl FnOnce(M::Graph) -> Result<M::Graph>) -> Result<()> {
        let graph = self.graph.take().context("graph lost after a failed step")?;
        self.graph = Some(f(graph)?);
        Ok(())
    }

    /// Continue from a checkpoint: weights, optimiser state and step.
    pub fn resume(self, path: &str) -> Result<Self> {
        let graph = self.graph.context("graph lost after a failed step")?;
        let restored = CheckpointManager::restore::<B, _, _>(graph, self.optim, path, &self.device)?;
        Ok(Self {
            graph: Some(restored.graph),
            optim: restored.optim,
            step:  restored.state.step,
            ..self
        })
    }

    /// Write the current graph, optimiser and step as `epoch`.
    pub fn save(&self, ckpt: &mut CheckpointManager, epoch: usize) -> Result<std::path::PathBuf> {
        let state = TrainingState { epoch, step: self.step };
        ckpt.save::<B, _, _>(self.graph()?, &self.optim, state)
    }

    /// Scheduled learning rate at the current step (before solver scaling).
    pub fn learning_rate(&self) -> f64 {
        self.schedule.at(self.step)
    }

    /// One optimisation step; returns the reported metric values.
    pub fn train_step(&mut self, model: &M, record: &Record) -> Result<Vec<f64>> {
        let feed = model.feed_dict::<B>(record, true, &self.device)?;
        let fetches = model.train_fetch(self.graph()?, feed)?;
        let loss = fetches.total_loss()?;
        let values = fetches.report_with_loss(&loss);

        let lr = self.learning_rate() * self.lr_scale;
        let graph = self.graph.take().context("graph lost after a failed step")?;
        let grads = GradientsParams::from_grads(loss.backward(), &graph);
        self.graph = Some(self.optim.step(lr, graph, grads));
        self.step += 1;
        Ok(values)
    }

    /// Full pass over `stream` in evaluation mode.
    pub fn validate<S: RecordStream>(
        &self,
        model:  &M,
        stream: &mut S,
        names:  &[String],
    ) -> Result<Metrics> {
        let inner = self.graph()?.valid();
        let mut metrics = Metrics::new(names.to_vec());
        stream.reset();
        let bar = progress_bar(None);
        let mut prob = (0.0, 0usize);
        for record in stream.by_ref() {
            let record = record?;
            let feed = model.feed_dict::<B::InnerBackend>(&record, false, &self.device)?;
            let fetches = model.eval_fetch(&inner, feed)?;
            if let Some(p) = fetches.prob.as_ref().filter(|_| tracing::enabled!(tracing::Level::DEBUG)) {
                prob.0 += scalar(p.clone().sum());
                prob.1 += record.batch_size();
            }
            let values = fetches.report_values()?;
            let text = metrics.update(&values, record.batch_size() as f64)?;
            bar.set_message(text);
            bar.inc(1);
        }
        bar.finish_and_clear();
        if prob.1 > 0 {
            tracing::debug!("mean P(class 1) over {} images: {:.4}", prob.1, prob.0 / prob.1 as f64);
        }
        Ok(metrics)
    }
}

// ─── Driver ───────────────────────────────────────────────────────────────────
/// Train `model` as configured by `cfg`.
///
/// `open_stream(path, is_training, extras)` builds the data streams;
/// the application passes `data::stream::create_stream`.
pub fn train<B, M, S, F>(
    cfg:         &TrainConfig,
    model:       &mut M,
    device:      B::Device,
    open_stream: F,
) -> Result<TrainReport>
where
    B: AutodiffBackend,
    M: Model<B>,
    S: RecordStream,
    F: FnMut(&str, bool, StreamExtras) -> Result<S>,
{
    let graph = model.build_graph(&device)?;
    let model_dir = cfg.model.as_deref().filter(|m| !m.is_empty());
    if let Some(dir) = model_dir {
        ensure_model_dir(dir)?;
    }

    let schedule = ExponentialDecay::new(cfg.lr, cfg.decay_rate, cfg.decay_steps);
    match Solver::from_flag(cfg.adam) {
        Solver::Adam => {
            println!("Using Adam optimizer, reducing LR by 100x");
            let optim = AdamConfig::new().with_epsilon(1e-8).init();
            let ctx = TrainingContext::<B, M, _>::new(graph, optim, schedule, Solver::Adam, device);
            run(cfg, model, ctx, model_dir, open_stream)
        }
        Solver::Momentum => {
            let momentum = MomentumConfig::new().with_momentum(0.9).with_dampening(0.0);
            let optim = SgdConfig::new().with_momentum(Some(momentum)).init();
            let ctx = TrainingContext::<B, M, _>::new(graph, optim, schedule, Solver::Momentum, device);
            run(cfg, model, ctx, model_dir, open_stream)
        }
    }
}

fn run<B, M, O, S, F>(
    cfg:             &TrainConfig,
    model:           &mut M,
    mut ctx:         TrainingContext<B, M, O>,
    model_dir:       Option<&str>,
    mut open_stream: F,
) -> Result<TrainReport>
where
    B: AutodiffBackend,
    M: Model<B>,
    O: Optimizer<M::Graph, B>,
    S: RecordStream,
    F: FnMut(&str, bool, StreamExtras) -> Result<S>,
{
    let names = report_names::<B, M>(model);
    for loss in model.losses() {
        println!("LOSS: {loss}");
    }
    tracing::debug!("Reporting metrics: {}", names.join(" "));

    let mut ckpt = model_dir.map(|dir| CheckpointManager::new(dir, cfg.max_to_keep));
    if let Some(c) = &ckpt {
        c.save_config(cfg)?;
    }

    // ── Streams ───────────────────────────────────────────────────────────────
    let db = cfg
        .db
        .as_deref()
        .filter(|p| !p.is_empty())
        .context("No training database configured (--db)")?;
    let mut train_stream = open_stream(db, true, model.extra_stream_config(true)?)?;
    let mut val_stream = match cfg.val_db.as_deref().filter(|p| !p.is_empty()) {
        Some(path) => Some(open_stream(path, false, model.extra_stream_config(false)?)?),
        None => None,
    };
    let epoch_steps = cfg
        .epoch_steps
        .unwrap_or_else(|| default_epoch_steps(train_stream.size(), cfg.batch));
    ensure!(epoch_steps > 0, "epoch_steps must be positive");

    // ── Session init / resume ─────────────────────────────────────────────────
    ctx.map_graph(|graph| model.init_session(graph))?;
    if let Some(path) = cfg.resume.as_deref().filter(|p| !p.is_empty()) {
        ctx = ctx.resume(path)?;
    }
    ctx.map_graph(|graph| Ok(model.restrict_trainable(graph)))?;
    let start_step = ctx.step();

    let plan = EpochPlan {
        max_epochs:     cfg.max_epochs,
        val_epochs:     cfg.val_epochs,
        ckpt_epochs:    cfg.ckpt_epochs,
        has_validation: val_stream.is_some(),
        has_model_dir:  ckpt.is_some(),
    };
    let mut best = Best::default();
    let mut report = TrainReport::default();
    let global_start = Instant::now();

    for epoch in 1..=plan.max_epochs {
        // ── Training steps ───────────────────────────────────────────────────
        let start = Instant::now();
        let mut metrics = Metrics::new(names.clone());
        let bar = progress_bar(Some(epoch_steps as u64));
        let mut text = String::new();
        for _ in 0..epoch_steps {
            let record = train_stream
                .next()
                .context("training stream ended unexpectedly")??;
            let values = ctx.train_step(model, &record)?;
            text = metrics.update(&values, record.batch_size() as f64)?;
            bar.set_message(text.clone());
            bar.inc(1);
        }
        bar.finish_and_clear();
        let now = Instant::now();
        summary_green(&format!(
            "train epoch={} step={} {} elapsed={:.3} time={:.3}",
            epoch - 1,
            ctx.step(),
            text,
            (now - global_start).as_secs_f64(),
            (now - start).as_secs_f64(),
        ));

        let actions = plan.actions(epoch);

        // ── Validation ───────────────────────────────────────────────────────
        if let (true, Some(val)) = (actions.validate, val_stream.as_mut()) {
            let lr = ctx.learning_rate();
            let metrics = ctx.validate(model, val, &names)?;
            if let Some(&last) = metrics.avg().and_then(|avg| avg.last()) {
                best.observe(last);
            }
            summary_red(&format!(
                "valid epoch={} step={} {} lr={:.4} best={:.3}",
                epoch - 1,
                ctx.step(),
                metrics.report(),
                lr,
                best.value(),
            ));
            report.validated.push(epoch);
        }

        // ── Checkpoint ───────────────────────────────────────────────────────
        if let (true, Some(c)) = (actions.checkpoint, ckpt.as_mut()) {
            let path = ctx.save(c, epoch)?;
            println!("saved to {}.", path.display());
            report.checkpoints.push(epoch);
        }
        report.epochs = epoch;
    }

    report.global_step = ctx.step();
    report.steps = ctx.step() - start_step;
    report.best = best.value();
    tracing::info!("Training complete: {} epochs, {} steps", report.epochs, report.steps);
    Ok(report)
}
