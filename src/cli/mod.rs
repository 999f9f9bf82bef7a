// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction, parsed with `clap`.
// All work is delegated to Layer 2 (application).
//
// Two commands are supported:
//   1. `train`  — trains a model on an image database
//   2. `import` — builds a database from a list file
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, ImportArgs, TrainArgs};

use crate::infra::logging;

#[derive(Parser, Debug)]
#[command(
    name = "aardvark",
    version = "0.1.0",
    about = "Train image classification and segmentation models on burn."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Dispatch to the matching use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)  => run_train(args),
            Commands::Import(args) => run_import(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    let log = logging::init_with_file(&logging::program_name())?;
    tracing::info!("Logging to '{}'", log.display());

    let use_case = TrainUseCase::new(args.into());
    let report = use_case.execute()?;

    println!("Training complete: {} epochs, {} steps.", report.epochs, report.steps);
    Ok(())
}

fn run_import(args: ImportArgs) -> Result<()> {
    use crate::application::import_use_case::ImportUseCase;

    logging::init_console()?;
    let count = ImportUseCase::new(&args.list, &args.db).execute()?;
    println!("Imported {} records into {}.", count, args.db);
    Ok(())
}
