//! Resize, crop and flip pipeline applied when a sample is loaded.

use crate::types::{DatasetError, DatasetResult, LabeledImage};
use image::imageops::FilterType;
use image::DynamicImage;
use rand::Rng;

#[derive(Debug, Clone, PartialEq)]
pub struct TransformPipeline {
    /// Resize every image to this (width, height) first.
    pub resize: (u32, u32),
    /// Crop window taken after resizing; random when `random_crop` is set, centered otherwise.
    pub crop: Option<(u32, u32)>,
    pub random_crop: bool,
    /// Probability of a horizontal flip.
    pub flip_horizontal_prob: f32,
    /// 1 (luma) or 3 (RGB).
    pub channels: usize,
}

impl Default for TransformPipeline {
    fn default() -> Self {
        Self {
            resize: (256, 256),
            crop: None,
            random_crop: false,
            flip_horizontal_prob: 0.0,
            channels: 3,
        }
    }
}

impl TransformPipeline {
    /// Training-time pipeline: random crop plus a coin-flip mirror.
    pub fn train(resize: (u32, u32), crop: (u32, u32), channels: usize) -> Self {
        Self {
            resize,
            crop: Some(crop),
            random_crop: true,
            flip_horizontal_prob: 0.5,
            channels,
        }
    }

    /// Deterministic pipeline for evaluation and export.
    pub fn eval(resize: (u32, u32), crop: (u32, u32), channels: usize) -> Self {
        Self {
            resize,
            crop: Some(crop),
            random_crop: false,
            flip_horizontal_prob: 0.0,
            channels,
        }
    }

    pub fn apply(
        &self,
        img: DynamicImage,
        label: usize,
        rng: &mut dyn rand::RngCore,
    ) -> DatasetResult<LabeledImage> {
        if self.channels != 1 && self.channels != 3 {
            return Err(DatasetError::Channels(self.channels));
        }
        let (rw, rh) = self.resize;
        let mut img = img.resize_exact(rw, rh, FilterType::Triangle);
        if let Some((cw, ch)) = self.crop {
            if cw > rw || ch > rh {
                return Err(DatasetError::Shape(format!(
                    "crop {cw}x{ch} larger than resized image {rw}x{rh}"
                )));
            }
            let (x, y) = if self.random_crop {
                (rng.random_range(0..=rw - cw), rng.random_range(0..=rh - ch))
            } else {
                ((rw - cw) / 2, (rh - ch) / 2)
            };
            img = img.crop_imm(x, y, cw, ch);
        }
        if self.flip_horizontal_prob > 0.0 && rng.random_range(0.0..1.0) < self.flip_horizontal_prob
        {
            img = img.fliph();
        }
        Ok(to_labeled(&img, self.channels, label))
    }
}

/// Pixel bytes to CHW floats in [-1, 1].
pub fn to_labeled(img: &DynamicImage, channels: usize, label: usize) -> LabeledImage {
    let (width, height) = (img.width(), img.height());
    let plane = width as usize * height as usize;
    let raw: Vec<u8> = if channels == 1 {
        img.to_luma8().into_raw()
    } else {
        img.to_rgb8().into_raw()
    };
    let mut chw = vec![0.0f32; plane * channels];
    for (i, px) in raw.chunks(channels).enumerate() {
        for (c, v) in px.iter().enumerate() {
            chw[c * plane + i] = *v as f32 / 127.5 - 1.0;
        }
    }
    LabeledImage {
        chw,
        channels,
        width,
        height,
        label,
    }
}

#[cfg(test)]
mod aug_tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn gradient(w: u32, h: u32) -> DynamicImage {
        let mut img = RgbImage::new(w, h);
        for (x, _y, p) in img.enumerate_pixels_mut() {
            *p = Rgb([(x * 255 / (w - 1)) as u8, 0, 255]);
        }
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn scales_to_unit_range() {
        let sample = to_labeled(&gradient(4, 2), 3, 7);
        assert_eq!(sample.shape(), [3, 2, 4]);
        assert_eq!(sample.label, 7);
        assert!((sample.chw[0] + 1.0).abs() < 1e-6);
        assert!((sample.chw[3] - 1.0).abs() < 1e-6);
        // Blue plane is saturated everywhere.
        assert!(sample.chw[16..].iter().all(|v| (*v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn flip_always_mirrors_columns() {
        let pipeline = TransformPipeline {
            resize: (4, 2),
            crop: None,
            random_crop: false,
            flip_horizontal_prob: 1.0,
            channels: 3,
        };
        let mut rng = StdRng::seed_from_u64(3);
        let sample = pipeline.apply(gradient(4, 2), 0, &mut rng).expect("apply");
        assert!((sample.chw[0] - 1.0).abs() < 1e-6);
        assert!((sample.chw[3] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn center_crop_is_deterministic() {
        let pipeline = TransformPipeline::eval((8, 8), (4, 4), 1);
        let mut rng = StdRng::seed_from_u64(1);
        let a = pipeline.apply(gradient(8, 8), 1, &mut rng).expect("apply");
        let b = pipeline.apply(gradient(8, 8), 1, &mut rng).expect("apply");
        assert_eq!(a, b);
        assert_eq!(a.shape(), [1, 4, 4]);
    }

    #[test]
    fn rejects_oversized_crop() {
        let pipeline = TransformPipeline::eval((4, 4), (8, 8), 3);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            pipeline.apply(gradient(4, 4), 0, &mut rng),
            Err(DatasetError::Shape(_))
        ));
    }
}
