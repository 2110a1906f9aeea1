//! Segmentation models for local background removal.
//!
//! A [`SegmentationModel`] turns an RGBA image into a per-pixel foreground
//! mask. Models are produced by a [`ModelLoader`], which lets the heavy
//! loading step run asynchronously and lets callers plug in their own model.
//! [`BorderColorSegmenter`] is the built-in model: it treats pixels close to
//! the mean border colour as background, which works well for product shots
//! and portraits on plain backdrops.

use async_trait::async_trait;
use image::RgbaImage;
use std::sync::Arc;
use tracing::debug;

/// Per-pixel foreground mask, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationMask {
    width: u32,
    height: u32,
    foreground: Vec<bool>,
}

impl SegmentationMask {
    pub fn new(width: u32, height: u32, foreground: Vec<bool>) -> Result<Self, String> {
        let expected = width as usize * height as usize;
        if foreground.len() != expected {
            return Err(format!(
                "mask has {} entries, expected {width}x{height} = {expected}",
                foreground.len()
            ));
        }
        Ok(Self {
            width,
            height,
            foreground,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_foreground(&self, x: u32, y: u32) -> bool {
        self.foreground[(y * self.width + x) as usize]
    }

    pub fn foreground_count(&self) -> usize {
        self.foreground.iter().filter(|&&f| f).count()
    }
}

/// A loaded segmentation model.
///
/// `segment` runs on a blocking thread. Models that keep per-call scratch
/// buffers free them in `release_scratch`, which the local executor calls
/// after every segmentation whether it succeeded or not.
pub trait SegmentationModel: Send + Sync {
    fn name(&self) -> &str;

    fn segment(&self, image: &RgbaImage) -> Result<SegmentationMask, String>;

    fn release_scratch(&self) {}
}

/// Produces a model. Called at most once per load of the shared model slot.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn SegmentationModel>, String>;
}

/// Make background pixels fully transparent.
pub fn apply_mask(image: &mut RgbaImage, mask: &SegmentationMask) -> Result<(), String> {
    if image.dimensions() != (mask.width(), mask.height()) {
        return Err(format!(
            "mask is {}x{} but the image is {}x{}",
            mask.width(),
            mask.height(),
            image.width(),
            image.height()
        ));
    }
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        if !mask.is_foreground(x, y) {
            pixel[3] = 0;
        }
    }
    Ok(())
}

/// Foreground = colour distance from the mean border colour above `tolerance`.
#[derive(Debug, Clone)]
pub struct BorderColorSegmenter {
    tolerance: f32,
}

impl BorderColorSegmenter {
    pub fn new(tolerance: f32) -> Self {
        Self { tolerance }
    }

    fn border_mean(image: &RgbaImage) -> [f32; 3] {
        let (w, h) = image.dimensions();
        let mut sum = [0f64; 3];
        let mut n = 0f64;
        for (x, y, p) in image.enumerate_pixels() {
            if x == 0 || y == 0 || x == w - 1 || y == h - 1 {
                for c in 0..3 {
                    sum[c] += p[c] as f64;
                }
                n += 1.0;
            }
        }
        [
            (sum[0] / n) as f32,
            (sum[1] / n) as f32,
            (sum[2] / n) as f32,
        ]
    }
}

impl SegmentationModel for BorderColorSegmenter {
    fn name(&self) -> &str {
        "border-color"
    }

    fn segment(&self, image: &RgbaImage) -> Result<SegmentationMask, String> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Err("image has no pixels".to_string());
        }
        let bg = Self::border_mean(image);
        let limit = self.tolerance * self.tolerance;
        let foreground = image
            .pixels()
            .map(|p| {
                let d: f32 = (0..3)
                    .map(|c| {
                        let diff = p[c] as f32 - bg[c];
                        diff * diff
                    })
                    .sum();
                // Already-transparent pixels stay background.
                p[3] > 0 && d > limit
            })
            .collect();
        let mask = SegmentationMask::new(w, h, foreground)?;
        debug!(
            "Segmented {}x{} px, {} foreground",
            w,
            h,
            mask.foreground_count()
        );
        Ok(mask)
    }
}

/// Loader for [`BorderColorSegmenter`].
#[derive(Debug, Clone)]
pub struct BuiltinLoader {
    tolerance: f32,
}

impl BuiltinLoader {
    pub fn new(tolerance: f32) -> Self {
        Self { tolerance }
    }
}

#[async_trait]
impl ModelLoader for BuiltinLoader {
    async fn load(&self) -> Result<Arc<dyn SegmentationModel>, String> {
        Ok(Arc::new(BorderColorSegmenter::new(self.tolerance)))
    }
}
