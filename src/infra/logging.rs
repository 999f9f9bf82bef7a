// ============================================================
// Layer 6 — Logging and Console Output
// ============================================================
// Two sinks are installed for a training run:
//
//   console  → INFO and up (override with RUST_LOG)
//   file     → DEBUG and up, no colours,
//              ./<program>-<YYYYmmdd-HHMMSS>.log
//
// Epoch summaries are printed in colour on stdout and also sent
// to the `aardvark::summary` target, which only the file sink
// records, so the log file keeps a plain-text history of every
// train/valid line without echoing it twice on the console.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use colored::Colorize;
use std::{fs::File, path::PathBuf, sync::Mutex};
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

/// Target for epoch summary lines (file sink only).
pub const SUMMARY_TARGET: &str = "aardvark::summary";

/// `<program>-<YYYYmmdd-HHMMSS>.log`
pub fn log_file_name(program: &str, now: DateTime<Local>) -> String {
    format!("{}-{}.log", program, now.format("%Y%m%d-%H%M%S"))
}

/// Base name of the running executable.
pub fn program_name() -> String {
    std::env::args()
        .next()
        .as_deref()
        .map(std::path::Path::new)
        .and_then(|p| p.file_stem())
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| "aardvark".to_string())
}

fn console_filter() -> Result<EnvFilter> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("aardvark=info"))
        .add_directive(format!("{SUMMARY_TARGET}=off").parse()?);
    Ok(filter)
}

/// Console-only logging (used by commands that do not train).
pub fn init_console() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(console_filter()?)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Cannot install logger: {e}"))
}

/// Console plus a timestamped log file in the working directory.
/// Returns the log file path.
pub fn init_with_file(program: &str) -> Result<PathBuf> {
    let path = PathBuf::from(log_file_name(program, Local::now()));
    let file = File::create(&path)
        .with_context(|| format!("Cannot create log file '{}'", path.display()))?;

    let console = fmt::layer().with_target(false).with_filter(console_filter()?);
    let to_file = fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .with_filter(EnvFilter::new("aardvark=debug").add_directive(LevelFilter::WARN.into()));

    tracing_subscriber::registry()
        .with(console)
        .with(to_file)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Cannot install logger: {e}"))?;
    Ok(path)
}

// ─── Coloured Console Lines ───────────────────────────────────────────────────
pub fn print_green(text: &str) {
    println!("{}", text.bright_green());
}

pub fn print_red(text: &str) {
    println!("{}", text.bright_red());
}

/// Print a training summary line and record it in the log file.
pub fn summary_green(text: &str) {
    print_green(text);
    tracing::info!(target: SUMMARY_TARGET, "{}", text);
}

/// Print a validation summary line and record it in the log file.
pub fn summary_red(text: &str) {
    print_red(text);
    tracing::info!(target: SUMMARY_TARGET, "{}", text);
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_log_file_name_format() {
        let now = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap();
        assert_eq!(log_file_name("train", now), "train-20240307-090501.log");
    }

    #[test]
    fn test_program_name_is_not_empty() {
        assert!(!program_name().is_empty());
    }
}
