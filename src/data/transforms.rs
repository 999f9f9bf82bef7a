// ============================================================
// Layer 4 — Transform Stages
// ============================================================
// Declarative per-sample processing applied by the stream after
// decoding and before batching. Stage lists are plain JSON, e.g.
//
//   [{"type": "resize", "max_size": 400},
//    {"type": "augment.flip", "horizontal": true},
//    {"type": "clip", "round": 16, "border_type": "replicate"}]
//
// Geometric stages (resize, flip, clip) move the image and the
// annotation together so masks stay aligned. Photometric stages
// (augment.add) touch the image only. `rasterize` turns the
// annotation into a single-channel class-id mask.
//
// Pixels live in `image` f32 buffers normalised to [0, 1], the
// range `imageops` works in. The batcher scales them back to the
// 0..255 range the models are trained on.

use anyhow::{Context, Result};
use image::{
    imageops::{self, FilterType},
    DynamicImage, ImageBuffer, Luma, Pixel, Rgb32FImage,
};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Single-channel f32 image.
pub type LumaF32Image = ImageBuffer<Luma<f32>, Vec<f32>>;

/// How `clip` fills pixels that fall outside the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BorderType {
    /// Fill with zeros.
    Constant,
    /// Repeat the nearest edge pixel.
    Replicate,
}

fn default_round() -> u32 { 1 }

/// One stage of the per-sample pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Transform {
    /// Shrink so the longer side is at most `max_size`.
    #[serde(rename = "resize")]
    Resize { max_size: u32 },

    /// Crop (or pad) to `width`×`height`; a zero dimension keeps the
    /// image's own size rounded down to a multiple of `round`.
    /// The crop window is centred and moved by up to ±`shift` pixels.
    #[serde(rename = "clip")]
    Clip {
        #[serde(default)]
        shift: u32,
        #[serde(default)]
        width: u32,
        #[serde(default)]
        height: u32,
        #[serde(default = "default_round")]
        round: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        border_type: Option<BorderType>,
    },

    /// Render the annotation into a one-channel label mask.
    #[serde(rename = "rasterize")]
    Rasterize,

    /// Random mirror along the enabled axes (probability 0.5 each).
    #[serde(rename = "augment.flip")]
    Flip {
        #[serde(default)]
        horizontal: bool,
        #[serde(default)]
        vertical: bool,
    },

    /// Add a uniform random offset in [-range, range] (0..255 units)
    /// to every pixel.
    #[serde(rename = "augment.add")]
    Add { range: f32 },
}

// ─── Plane ────────────────────────────────────────────────────────────────────
/// One decoded image or label mask.
#[derive(Debug, Clone, PartialEq)]
pub enum Plane {
    Luma(LumaF32Image),
    Rgb(Rgb32FImage),
}

impl Plane {
    /// Decode an encoded image into `channels` (1 or 3) channels.
    /// `bgr` swaps the first and last colour channel.
    pub fn decode(bytes: &[u8], channels: usize, bgr: bool) -> Result<Self> {
        let img = image::load_from_memory(bytes).context("Cannot decode image")?;
        Ok(Self::from_dynamic(&img, channels, bgr))
    }

    /// Decode a label image, keeping colour only if it has any.
    pub fn decode_annotation(bytes: &[u8]) -> Result<Self> {
        let img = image::load_from_memory(bytes).context("Cannot decode annotation")?;
        let channels = if img.color().has_color() { 3 } else { 1 };
        Ok(Self::from_dynamic(&img, channels, false))
    }

    fn from_dynamic(img: &DynamicImage, channels: usize, bgr: bool) -> Self {
        if channels == 1 {
            return Plane::Luma(img.to_luma32f());
        }
        let mut rgb = img.to_rgb32f();
        if bgr {
            rgb.pixels_mut().for_each(|px| px.0.swap(0, 2));
        }
        Plane::Rgb(rgb)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Plane::Luma(img) => img.dimensions(),
            Plane::Rgb(img) => img.dimensions(),
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            Plane::Luma(_) => 1,
            Plane::Rgb(_) => 3,
        }
    }

    /// Row-major HWC values scaled to 0..255.
    pub fn pixel_values(&self) -> Vec<f32> {
        let raw = match self {
            Plane::Luma(img) => img.as_raw(),
            Plane::Rgb(img) => img.as_raw(),
        };
        raw.iter().map(|v| v * 255.0).collect()
    }

    /// 8-bit copy for writing to disk.
    pub fn to_dynamic(&self) -> DynamicImage {
        match self {
            Plane::Rgb(img) => DynamicImage::ImageRgb32F(img.clone()).to_rgb8().into(),
            Plane::Luma(img) => {
                let (w, h) = img.dimensions();
                DynamicImage::ImageLuma8(ImageBuffer::from_fn(w, h, |x, y| {
                    Luma([(img.get_pixel(x, y).0[0] * 255.0).round().clamp(0.0, 255.0) as u8])
                }))
            }
        }
    }

    fn resize(&self, width: u32, height: u32, filter: FilterType) -> Self {
        match self {
            Plane::Luma(img) => Plane::Luma(imageops::resize(img, width, height, filter)),
            Plane::Rgb(img) => Plane::Rgb(imageops::resize(img, width, height, filter)),
        }
    }

    fn flip(&self, horizontal: bool, vertical: bool) -> Self {
        match self {
            Plane::Luma(img) => Plane::Luma(flipped(img, horizontal, vertical)),
            Plane::Rgb(img) => Plane::Rgb(flipped(img, horizontal, vertical)),
        }
    }

    fn crop(&self, window: Window, border: BorderType) -> Self {
        match self {
            Plane::Luma(img) => Plane::Luma(cropped(img, window, border)),
            Plane::Rgb(img) => Plane::Rgb(cropped(img, window, border)),
        }
    }

    fn offset(&mut self, delta: f32) {
        match self {
            Plane::Luma(img) => img.iter_mut().for_each(|v| *v += delta),
            Plane::Rgb(img) => img.iter_mut().for_each(|v| *v += delta),
        }
    }

    /// Collapse to one channel and snap to whole class ids.
    fn to_label_mask(&self) -> Self {
        let mut mask = match self {
            Plane::Luma(img) => img.clone(),
            Plane::Rgb(img) => imageops::grayscale(img),
        };
        mask.iter_mut().for_each(|v| *v = (*v * 255.0).round() / 255.0);
        Plane::Luma(mask)
    }
}

/// A sample moving through the pipeline.
#[derive(Debug, Clone)]
pub struct Sample {
    pub label:      f32,
    pub image:      Plane,
    pub annotation: Option<Plane>,
    /// Set once `rasterize` has produced the label mask.
    pub rasterized: bool,
}

impl Transform {
    /// Apply this stage to `sample` in place.
    pub fn apply<R: Rng + ?Sized>(&self, sample: &mut Sample, rng: &mut R) {
        match *self {
            Transform::Resize { max_size } => {
                let (w, h) = sample.image.dimensions();
                let longer = h.max(w);
                if max_size == 0 || longer <= max_size {
                    return;
                }
                let scale = f64::from(max_size) / f64::from(longer);
                let nh = ((f64::from(h) * scale).round() as u32).max(1);
                let nw = ((f64::from(w) * scale).round() as u32).max(1);
                sample.image = sample.image.resize(nw, nh, FilterType::Triangle);
                if let Some(ann) = sample.annotation.as_mut() {
                    *ann = ann.resize(nw, nh, FilterType::Nearest);
                }
            }
            Transform::Clip { shift, width, height, round, border_type } => {
                let (w, h) = sample.image.dimensions();
                let th = clip_extent(h, height, round);
                let tw = clip_extent(w, width, round);
                let mut y = (i64::from(h) - i64::from(th)) / 2;
                let mut x = (i64::from(w) - i64::from(tw)) / 2;
                if shift > 0 {
                    let s = i64::from(shift);
                    y += rng.gen_range(-s..=s);
                    x += rng.gen_range(-s..=s);
                }
                let window = Window { x, y, width: tw, height: th };
                let border = border_type.unwrap_or(BorderType::Constant);
                sample.image = sample.image.crop(window, border);
                if let Some(ann) = sample.annotation.as_mut() {
                    *ann = ann.crop(window, border);
                }
            }
            Transform::Rasterize => {
                if let Some(ann) = sample.annotation.as_mut() {
                    *ann = ann.to_label_mask();
                    sample.rasterized = true;
                }
            }
            Transform::Flip { horizontal, vertical } => {
                let fh = horizontal && rng.gen_bool(0.5);
                let fv = vertical && rng.gen_bool(0.5);
                if fh || fv {
                    sample.image = sample.image.flip(fh, fv);
                    if let Some(ann) = sample.annotation.as_mut() {
                        *ann = ann.flip(fh, fv);
                    }
                }
            }
            Transform::Add { range } => {
                if range > 0.0 {
                    let delta = rng.gen_range(-range..=range);
                    sample.image.offset(delta / 255.0);
                }
            }
        }
    }
}

/// Target size of one clip dimension.
fn clip_extent(size: u32, fixed: u32, round: u32) -> u32 {
    if fixed > 0 {
        return fixed;
    }
    if round <= 1 {
        return size;
    }
    // Never round an image away entirely; pad up to one stride instead.
    (size / round * round).max(round)
}

/// Crop window in source coordinates; may extend past the image.
#[derive(Debug, Clone, Copy)]
struct Window {
    x:      i64,
    y:      i64,
    width:  u32,
    height: u32,
}

fn flipped<P>(img: &ImageBuffer<P, Vec<f32>>, horizontal: bool, vertical: bool) -> ImageBuffer<P, Vec<f32>>
where
    P: Pixel<Subpixel = f32> + 'static,
{
    match (horizontal, vertical) {
        (true, true) => imageops::rotate180(img),
        (true, false) => imageops::flip_horizontal(img),
        (false, true) => imageops::flip_vertical(img),
        (false, false) => img.clone(),
    }
}

fn cropped<P>(img: &ImageBuffer<P, Vec<f32>>, window: Window, border: BorderType) -> ImageBuffer<P, Vec<f32>>
where
    P: Pixel<Subpixel = f32> + 'static,
{
    let (w, h) = img.dimensions();
    let inside = window.x >= 0
        && window.y >= 0
        && window.x + i64::from(window.width) <= i64::from(w)
        && window.y + i64::from(window.height) <= i64::from(h);
    if inside {
        return imageops::crop_imm(img, window.x as u32, window.y as u32, window.width, window.height)
            .to_image();
    }
    match border {
        BorderType::Constant => {
            let mut out = ImageBuffer::new(window.width, window.height);
            imageops::replace(&mut out, img, -window.x, -window.y);
            out
        }
        BorderType::Replicate => {
            let clamp = |v: i64, size: u32| v.clamp(0, i64::from(size) - 1) as u32;
            ImageBuffer::from_fn(window.width, window.height, |x, y| {
                *img.get_pixel(clamp(window.x + i64::from(x), w), clamp(window.y + i64::from(y), h))
            })
        }
    }
}
