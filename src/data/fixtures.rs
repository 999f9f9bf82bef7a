// Test-only helpers for building small image databases on disk.

use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use std::{io::Cursor, path::Path};

use crate::data::db::{DbWriter, RawRecord};

pub fn png_rgb(width: u32, height: u32, value: u8) -> Vec<u8> {
    png_color(width, height, [value; 3])
}

pub fn png_color(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    encode(DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(rgb))))
}

/// `count` uniform `rgb` images that all carry `label`.
pub fn write_uniform_db(path: &Path, count: usize, size: u32, rgb: [u8; 3], label: f32) {
    let mut w = DbWriter::create(path).expect("create db");
    for _ in 0..count {
        let record = RawRecord { label, image: png_color(size, size, rgb), annotation: None };
        w.append(&record).expect("append");
    }
    w.finish().expect("finish");
}

/// A label image whose left half is class 0 and right half class 1.
pub fn png_mask(width: u32, height: u32) -> Vec<u8> {
    let mask = GrayImage::from_fn(width, height, |x, _| Luma([u8::from(x >= width / 2)]));
    encode(DynamicImage::ImageLuma8(mask))
}

fn encode(img: DynamicImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("png encoding");
    bytes
}

/// `count` square RGB images with alternating labels 0/1.
pub fn write_classification_db(path: &Path, count: usize, size: u32) {
    let mut w = DbWriter::create(path).expect("create db");
    for i in 0..count {
        let label = (i % 2) as f32;
        let record = RawRecord {
            label,
            image: png_rgb(size, size, if i % 2 == 0 { 20 } else { 220 }),
            annotation: None,
        };
        w.append(&record).expect("append");
    }
    w.finish().expect("finish");
}

/// `count` square RGB images each with a two-class mask.
pub fn write_segmentation_db(path: &Path, count: usize, size: u32) {
    let mut w = DbWriter::create(path).expect("create db");
    for i in 0..count {
        let record = RawRecord {
            label: 0.0,
            image: png_rgb(size, size, (i * 40 % 255) as u8),
            annotation: Some(png_mask(size, size)),
        };
        w.append(&record).expect("append");
    }
    w.finish().expect("finish");
}
