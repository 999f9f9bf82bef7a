// ============================================================
// Layer 4 — Augmentation Loader
// ============================================================
// Reads the list of augmentation stages that training streams
// splice in between `resize` and `clip`. The file is a JSON array
// of transform objects, for example:
//
//   [{"type": "augment.flip", "horizontal": true},
//    {"type": "augment.add", "range": 20}]
//
// Validation streams never augment, so nothing is read for them.

use anyhow::{Context, Result};
use std::{fs, path::Path};

use crate::data::transforms::Transform;

/// Load augmentation stages for a stream.
///
/// Returns an empty list when `is_training` is false or no path is
/// configured. A configured path that cannot be read or parsed is
/// an error.
pub fn load_augments(path: Option<&str>, is_training: bool) -> Result<Vec<Transform>> {
    if !is_training {
        return Ok(Vec::new());
    }
    let Some(path) = path.filter(|p| !p.is_empty()) else {
        return Ok(Vec::new());
    };

    let text = fs::read_to_string(Path::new(path))
        .with_context(|| format!("Cannot read augments file '{path}'"))?;
    let augments: Vec<Transform> = serde_json::from_str(&text)
        .with_context(|| format!("Invalid augments in '{path}'"))?;

    println!("Using augments:");
    println!("{}", serde_json::to_string(&augments)?);
    tracing::debug!("Loaded {} augment stages from '{}'", augments.len(), path);
    Ok(augments)
}
