// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `train` and `import`, and all
// their flags. Long names are snake_case (`--val_db`,
// `--max_epochs`). Boolean flags take an explicit value
// (`--cache 0`, `--adam false`); a bare `--dice` means true.
// An empty path (`--model ''`) means "not configured".
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{builder::BoolishValueParser, ArgAction, Args, Subcommand, ValueEnum};

use crate::application::train_use_case::{NetKind, TrainConfig};

/// The top-level subcommands available to the user
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a classification or segmentation model
    Train(TrainArgs),

    /// Build a database from a list of images
    Import(ImportArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetArg {
    Conv,
    Fcn,
    #[value(name = "resnet-v2-18")]
    ResnetV2_18,
    #[value(name = "resnet-v2-18-cifar")]
    ResnetV2_18Cifar,
}

impl From<NetArg> for NetKind {
    fn from(n: NetArg) -> Self {
        match n {
            NetArg::Conv => NetKind::Conv,
            NetArg::Fcn => NetKind::Fcn,
            NetArg::ResnetV2_18 => NetKind::ResnetV2_18,
            NetArg::ResnetV2_18Cifar => NetKind::ResnetV2_18Cifar,
        }
    }
}

/// All arguments for the `train` command.
#[derive(Args, Debug)]
#[command(rename_all = "snake_case")]
pub struct TrainArgs {
    /// Network architecture
    #[arg(long, value_enum, default_value_t = NetArg::Conv)]
    pub net: NetArg,

    /// Number of classes
    #[arg(long, default_value_t = 2)]
    pub classes: usize,

    /// Use dice loss (segmentation, 2 classes only)
    #[arg(long, default_value_t = false, num_args = 0..=1, default_missing_value = "true",
          action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub dice: bool,

    /// Training database
    #[arg(long)]
    pub db: Option<String>,

    /// Validation database
    #[arg(long)]
    pub val_db: Option<String>,

    /// Secondary database mixed into training
    #[arg(long)]
    pub mixin: Option<String>,

    #[arg(long, default_value_t = 3)]
    pub channels: usize,

    /// Keep the whole database in memory
    #[arg(long, default_value_t = true, num_args = 0..=1, default_missing_value = "true",
          action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub cache: bool,

    /// JSON list of training-only augment stages
    #[arg(long, default_value = "augments.json")]
    pub augments: String,

    /// RGB or BGR
    #[arg(long, default_value = "RGB")]
    pub colorspace: String,

    /// Number of training samples written to picpac_dump/
    #[arg(long, default_value_t = 20)]
    pub picpac_dump: usize,

    #[arg(long, default_value_t = 1)]
    pub batch: usize,

    #[arg(long, default_value_t = 200_000)]
    pub max_size: u32,

    #[arg(long, default_value_t = 0)]
    pub fix_width: u32,

    #[arg(long, default_value_t = 0)]
    pub fix_height: u32,

    #[arg(long, default_value_t = 16)]
    pub clip_stride: u32,

    #[arg(long, default_value_t = 0)]
    pub clip_shift: u32,

    /// Checkpoint directory
    #[arg(long, default_value = "model")]
    pub model: String,

    /// Checkpoint to resume from
    #[arg(long)]
    pub resume: Option<String>,

    #[arg(long, default_value_t = 100)]
    pub max_to_keep: usize,

    /// Steps per epoch (default: one pass over the database)
    #[arg(long)]
    pub epoch_steps: Option<usize>,

    #[arg(long, default_value_t = 500)]
    pub max_epochs: usize,

    #[arg(long, default_value_t = 10)]
    pub ckpt_epochs: usize,

    #[arg(long, default_value_t = 10)]
    pub val_epochs: usize,

    /// Initial learning rate
    #[arg(long, default_value_t = 0.01)]
    pub lr: f64,

    #[arg(long, default_value_t = 0.95)]
    pub decay_rate: f64,

    #[arg(long, default_value_t = 500.0)]
    pub decay_steps: f64,

    /// Adam instead of momentum SGD
    #[arg(long, default_value_t = true, num_args = 0..=1, default_missing_value = "true",
          action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub adam: bool,
}

fn configured(path: String) -> Option<String> {
    Some(path).filter(|p| !p.is_empty())
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
/// The application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            classes:     a.classes,
            dice:        a.dice,
            net:         a.net.into(),
            db:          a.db.and_then(configured),
            val_db:      a.val_db.and_then(configured),
            mixin:       a.mixin.and_then(configured),
            channels:    a.channels,
            cache:       a.cache,
            augments:    configured(a.augments),
            colorspace:  a.colorspace,
            picpac_dump: a.picpac_dump,
            batch:       a.batch,
            max_size:    a.max_size,
            fix_width:   a.fix_width,
            fix_height:  a.fix_height,
            clip_stride: a.clip_stride,
            clip_shift:  a.clip_shift,
            model:       configured(a.model),
            resume:      a.resume.and_then(configured),
            max_to_keep: a.max_to_keep,
            epoch_steps: a.epoch_steps,
            max_epochs:  a.max_epochs,
            ckpt_epochs: a.ckpt_epochs,
            val_epochs:  a.val_epochs,
            lr:          a.lr,
            decay_rate:  a.decay_rate,
            decay_steps: a.decay_steps,
            adam:        a.adam,
        }
    }
}

/// All arguments for the `import` command
#[derive(Args, Debug)]
pub struct ImportArgs {
    /// List file: `<image> <label> [<annotation>]` per line
    #[arg(long)]
    pub list: String,

    /// Output database
    #[arg(long)]
    pub db: String,
}
