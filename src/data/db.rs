// ============================================================
// Layer 4 — AVDB Record Database
// ============================================================
// A flat, append-only file of encoded training examples.
//
// File layout (all integers little-endian):
//
//   "AVDB"            4-byte magic
//   u32 version       currently 1
//   record*           until end of file
//
// Each record:
//
//   f32 label                  class id (ignored for segmentation)
//   u32 image_len, bytes       encoded image (PNG, JPEG, ...)
//   u32 annotation_len, bytes  encoded label image, len 0 = none
//
// `Db::open` scans the file once to build an offset index so
// records can be read in any order. With `cache` on, every record
// is kept in memory after the scan and the file is not reopened.
//
// `Db` is a burn `Dataset<RawRecord>`, so the stream can shuffle it
// with the dataset transforms.

use anyhow::{anyhow, ensure, Context, Result};
use burn::data::dataset::Dataset;
use std::{
    fs::File,
    io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

pub const MAGIC: &[u8; 4] = b"AVDB";
pub const VERSION: u32 = 1;

/// One encoded example as stored on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub label:      f32,
    pub image:      Vec<u8>,
    pub annotation: Option<Vec<u8>>,
}

// ─── Writer ───────────────────────────────────────────────────────────────────
pub struct DbWriter {
    out:   BufWriter<File>,
    path:  PathBuf,
    count: usize,
}

impl DbWriter {
    /// Create (or truncate) a database file and write its header.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .with_context(|| format!("Cannot create database '{}'", path.display()))?;
        let mut out = BufWriter::new(file);
        out.write_all(MAGIC)?;
        out.write_all(&VERSION.to_le_bytes())?;
        Ok(Self { out, path, count: 0 })
    }

    pub fn append(&mut self, record: &RawRecord) -> Result<()> {
        ensure!(!record.image.is_empty(), "record {} has an empty image", self.count);
        self.out.write_all(&record.label.to_le_bytes())?;
        write_blob(&mut self.out, &record.image)?;
        write_blob(&mut self.out, record.annotation.as_deref().unwrap_or(&[]))?;
        self.count += 1;
        Ok(())
    }

    /// Flush to disk and return the number of records written.
    pub fn finish(mut self) -> Result<usize> {
        self.out
            .flush()
            .with_context(|| format!("Cannot flush database '{}'", self.path.display()))?;
        Ok(self.count)
    }
}

fn write_blob<W: Write>(out: &mut W, bytes: &[u8]) -> Result<()> {
    let len = u32::try_from(bytes.len()).context("blob larger than 4 GiB")?;
    out.write_all(&len.to_le_bytes())?;
    out.write_all(bytes)?;
    Ok(())
}

// ─── Reader ───────────────────────────────────────────────────────────────────
pub struct Db {
    path:    PathBuf,
    offsets: Vec<u64>,
    reader:  Option<Mutex<BufReader<File>>>,
    cached:  Option<Vec<RawRecord>>,
}

impl Db {
    pub fn open(path: impl AsRef<Path>, cache: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .with_context(|| format!("Cannot open database '{}'", path.display()))?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader
            .read_exact(&mut magic)
            .with_context(|| format!("'{}' is too short to be a database", path.display()))?;
        ensure!(&magic == MAGIC, "'{}' is not an AVDB database", path.display());
        let version = read_u32(&mut reader)?;
        ensure!(
            version == VERSION,
            "'{}' has unsupported version {} (expected {})",
            path.display(), version, VERSION
        );

        let mut offsets = Vec::new();
        let mut cached = cache.then(Vec::new);
        loop {
            let offset = reader.stream_position()?;
            let Some(label) = read_label(&mut reader)? else { break };
            offsets.push(offset);
            match cached.as_mut() {
                Some(records) => {
                    let image = read_blob(&mut reader)?;
                    let annotation = read_blob(&mut reader)?;
                    records.push(RawRecord {
                        label,
                        image,
                        annotation: (!annotation.is_empty()).then_some(annotation),
                    });
                }
                None => {
                    skip_blob(&mut reader)?;
                    skip_blob(&mut reader)?;
                }
            }
        }
        tracing::debug!("Indexed {} records in '{}'", offsets.len(), path.display());

        let reader = if cached.is_some() { None } else { Some(Mutex::new(reader)) };
        Ok(Self { path, offsets, reader, cached })
    }

    pub fn read(&self, index: usize) -> Result<RawRecord> {
        ensure!(index < self.len(), "record {} out of range (db has {})", index, self.len());
        if let Some(records) = &self.cached {
            return Ok(records[index].clone());
        }
        let reader = self
            .reader
            .as_ref()
            .with_context(|| format!("database '{}' has no open reader", self.path.display()))?;
        let mut reader = reader
            .lock()
            .map_err(|_| anyhow!("reader of '{}' poisoned", self.path.display()))?;
        reader.seek(SeekFrom::Start(self.offsets[index]))?;
        let label = read_label(&mut *reader)?
            .with_context(|| format!("record {} truncated", index))?;
        let image = read_blob(&mut *reader)?;
        let annotation = read_blob(&mut *reader)?;
        Ok(RawRecord { label, image, annotation: (!annotation.is_empty()).then_some(annotation) })
    }
}

impl Dataset<RawRecord> for Db {
    fn get(&self, index: usize) -> Option<RawRecord> {
        match self.read(index) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("Cannot read record {} of '{}': {:#}", index, self.path.display(), e);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.offsets.len()
    }
}

/// Read a record's leading label, or `None` at a clean end of file.
fn read_label<R: Read>(reader: &mut R) -> Result<Option<f32>> {
    let mut buf = [0u8; 4];
    match reader.read_exact(&mut buf) {
        Ok(()) => Ok(Some(f32::from_le_bytes(buf))),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).context("truncated length field")?;
    Ok(u32::from_le_bytes(buf))
}

fn read_blob<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let len = read_u32(reader)? as usize;
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).context("truncated record body")?;
    Ok(bytes)
}

fn skip_blob<R: Read + Seek>(reader: &mut R) -> Result<()> {
    let len = read_u32(reader)?;
    reader.seek(SeekFrom::Current(len as i64))?;
    Ok(())
}
