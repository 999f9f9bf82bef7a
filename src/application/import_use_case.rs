// ============================================================
// Layer 2 — ImportUseCase
// ============================================================
// Builds an AVDB database from a plain-text list file:
//
//   <image> <label> [<annotation>]
//
// one example per line, whitespace separated. Relative paths are
// resolved against the list file's directory. Blank lines and
// lines starting with '#' are skipped.
//
// Records are written to `<db>.tmp`, which replaces `<db>` only once
// every entry has been written. A failed import leaves `<db>` as it was.

use anyhow::{bail, Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::data::db::{DbWriter, RawRecord};

/// One parsed line of a list file.
#[derive(Debug, Clone, PartialEq)]
pub struct ListEntry {
    pub image:      PathBuf,
    pub label:      f32,
    pub annotation: Option<PathBuf>,
}

/// Parse a list file's contents; `base` resolves relative paths.
pub fn parse_list(text: &str, base: &Path) -> Result<Vec<ListEntry>> {
    let mut entries = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let (image, label, annotation) = match fields.as_slice() {
            [image, label] => (image, label, None),
            [image, label, annotation] => (image, label, Some(base.join(annotation))),
            _ => bail!("line {}: expected '<image> <label> [<annotation>]'", lineno + 1),
        };
        let label: f32 = label
            .parse()
            .with_context(|| format!("line {}: bad label '{}'", lineno + 1, label))?;
        entries.push(ListEntry { image: base.join(image), label, annotation });
    }
    Ok(entries)
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    let bytes = fs::read(path).with_context(|| format!("Cannot read '{}'", path.display()))?;
    image::guess_format(&bytes)
        .with_context(|| format!("'{}' is not a recognised image", path.display()))?;
    Ok(bytes)
}

pub struct ImportUseCase {
    list: PathBuf,
    db:   PathBuf,
}

impl ImportUseCase {
    pub fn new(list: impl Into<PathBuf>, db: impl Into<PathBuf>) -> Self {
        Self { list: list.into(), db: db.into() }
    }

    /// Write every listed example to the database; returns the count.
    pub fn execute(&self) -> Result<usize> {
        let text = fs::read_to_string(&self.list)
            .with_context(|| format!("Cannot read list file '{}'", self.list.display()))?;
        let base = self.list.parent().unwrap_or_else(|| Path::new("."));
        let entries = parse_list(&text, base)?;
        tracing::info!("Importing {} examples into '{}'", entries.len(), self.db.display());

        let tmp = staging_path(&self.db);
        let count = match write_entries(&entries, &tmp) {
            Ok(count) => count,
            Err(e) => {
                if let Err(rm) = fs::remove_file(&tmp) {
                    tracing::warn!("Cannot remove '{}': {}", tmp.display(), rm);
                }
                return Err(e);
            }
        };
        fs::rename(&tmp, &self.db).with_context(|| {
            format!("Cannot move '{}' to '{}'", tmp.display(), self.db.display())
        })?;
        tracing::info!("Wrote {} records", count);
        Ok(count)
    }
}

fn staging_path(db: &Path) -> PathBuf {
    let mut name = db.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

fn write_entries(entries: &[ListEntry], out: &Path) -> Result<usize> {
    let mut writer = DbWriter::create(out)?;
    for entry in entries {
        let annotation = entry.annotation.as_deref().map(read_image).transpose()?;
        writer.append(&RawRecord {
            label: entry.label,
            image: read_image(&entry.image)?,
            annotation,
        })?;
    }
    writer.finish()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::data::dataset::Dataset;
    use crate::data::{
        db::Db,
        fixtures::{png_mask, png_rgb},
    };

    #[test]
    fn test_parse_list() {
        let text = "# header\na.png 1\n\nb.png 0 b_mask.png\n";
        let entries = parse_list(text, Path::new("/data")).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].image, PathBuf::from("/data/a.png"));
        assert_eq!(entries[0].label, 1.0);
        assert_eq!(entries[1].annotation, Some(PathBuf::from("/data/b_mask.png")));
    }

    #[test]
    fn test_parse_list_rejects_bad_lines() {
        assert!(parse_list("only_image.png", Path::new(".")).is_err());
        assert!(parse_list("a.png cat", Path::new(".")).is_err());
    }

    #[test]
    fn test_import_writes_records() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.png"), png_rgb(4, 4, 10)).unwrap();
        fs::write(dir.path().join("b.png"), png_rgb(4, 4, 200)).unwrap();
        fs::write(dir.path().join("b_mask.png"), png_mask(4, 4)).unwrap();
        let list = dir.path().join("train.list");
        fs::write(&list, "a.png 0\nb.png 1 b_mask.png\n").unwrap();

        let out = dir.path().join("train.avdb");
        let count = ImportUseCase::new(&list, &out).execute().unwrap();
        assert_eq!(count, 2);

        let db = Db::open(&out, false).unwrap();
        assert_eq!(db.len(), 2);
        let second = db.read(1).unwrap();
        assert_eq!(second.label, 1.0);
        assert!(second.annotation.is_some());
        assert!(db.read(0).unwrap().annotation.is_none());
    }

    #[test]
    fn test_import_rejects_non_image() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"not an image").unwrap();
        let list = dir.path().join("train.list");
        fs::write(&list, "a.txt 0\n").unwrap();
        assert!(ImportUseCase::new(&list, dir.path().join("x.avdb")).execute().is_err());
    }

    #[test]
    fn test_failed_import_leaves_no_partial_db() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.png"), png_rgb(4, 4, 10)).unwrap();
        fs::write(dir.path().join("b.png"), png_rgb(4, 4, 20)).unwrap();
        fs::write(dir.path().join("c.txt"), b"not an image").unwrap();
        let list = dir.path().join("train.list");
        fs::write(&list, "a.png 0\nb.png 1\nc.txt 0\n").unwrap();

        let out = dir.path().join("train.avdb");
        assert!(ImportUseCase::new(&list, &out).execute().is_err());
        assert!(!out.exists());
        assert!(!dir.path().join("train.avdb.tmp").exists());
    }

    #[test]
    fn test_failed_import_keeps_previous_db() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.png"), png_rgb(4, 4, 10)).unwrap();
        let out = dir.path().join("train.avdb");
        let good = dir.path().join("good.list");
        fs::write(&good, "a.png 0\n").unwrap();
        assert_eq!(ImportUseCase::new(&good, &out).execute().unwrap(), 1);

        let bad = dir.path().join("bad.list");
        fs::write(&bad, "a.png 0\na.png 1\nmissing.png 0\n").unwrap();
        assert!(ImportUseCase::new(&bad, &out).execute().is_err());

        let db = Db::open(&out, false).unwrap();
        assert_eq!(db.len(), 1);
    }
}
