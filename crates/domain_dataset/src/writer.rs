//! Rendering [-1, 1] CHW data back to image files.

use crate::types::{DatasetError, DatasetResult};
use image::{DynamicImage, GrayImage, RgbImage};
use std::fs;
use std::path::Path;

fn to_byte(v: f32) -> u8 {
    ((v.clamp(-1.0, 1.0) + 1.0) * 127.5).round() as u8
}

pub fn chw_to_image(
    chw: &[f32],
    channels: usize,
    width: u32,
    height: u32,
) -> DatasetResult<DynamicImage> {
    let plane = width as usize * height as usize;
    if chw.len() != plane * channels {
        return Err(DatasetError::Shape(format!(
            "{} values cannot fill {channels}x{height}x{width}",
            chw.len()
        )));
    }
    match channels {
        1 => {
            let raw: Vec<u8> = chw.iter().map(|v| to_byte(*v)).collect();
            GrayImage::from_raw(width, height, raw)
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(|| DatasetError::Shape("luma buffer size".to_string()))
        }
        3 => {
            let mut raw = vec![0u8; plane * 3];
            for i in 0..plane {
                for c in 0..3 {
                    raw[i * 3 + c] = to_byte(chw[c * plane + i]);
                }
            }
            RgbImage::from_raw(width, height, raw)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| DatasetError::Shape("rgb buffer size".to_string()))
        }
        other => Err(DatasetError::Channels(other)),
    }
}

/// Save, creating parent directories; format follows the extension.
pub fn save_image(img: &DynamicImage, path: impl AsRef<Path>) -> DatasetResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| DatasetError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    img.save(path).map_err(|source| DatasetError::Image {
        path: path.to_path_buf(),
        source,
    })
}

/// Lay out rows of images into one RGB canvas; row `r` holds `rows[r]` left to right.
pub fn grid(rows: &[Vec<DynamicImage>]) -> DatasetResult<DynamicImage> {
    let cell_w = rows
        .iter()
        .flatten()
        .map(|img| img.width())
        .max()
        .unwrap_or(0);
    let cell_h = rows
        .iter()
        .flatten()
        .map(|img| img.height())
        .max()
        .unwrap_or(0);
    let cols = rows.iter().map(Vec::len).max().unwrap_or(0) as u32;
    if cell_w == 0 || cell_h == 0 || cols == 0 {
        return Err(DatasetError::Shape("grid has no images".to_string()));
    }
    let mut canvas = RgbImage::new(cell_w * cols, cell_h * rows.len() as u32);
    for (r, row) in rows.iter().enumerate() {
        for (c, img) in row.iter().enumerate() {
            image::imageops::replace(
                &mut canvas,
                &img.to_rgb8(),
                (c as u32 * cell_w) as i64,
                (r as u32 * cell_h) as i64,
            );
        }
    }
    Ok(DynamicImage::ImageRgb8(canvas))
}

#[cfg(feature = "burn-runtime")]
pub use tensor_io::*;

#[cfg(feature = "burn-runtime")]
mod tensor_io {
    use super::*;
    use burn::tensor::{backend::Backend, Tensor};

    /// Split an `[N, C, H, W]` tensor into N images.
    pub fn tensor_to_images<B: Backend>(tensor: Tensor<B, 4>) -> DatasetResult<Vec<DynamicImage>> {
        let [n, c, h, w] = tensor.dims();
        let values = tensor
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| DatasetError::Other(format!("tensor readback failed: {e:?}")))?;
        let per = c * h * w;
        (0..n)
            .map(|i| chw_to_image(&values[i * per..(i + 1) * per], c, w as u32, h as u32))
            .collect()
    }

    /// Write a batch as one horizontal strip (a single image for N = 1).
    pub fn save_tensor<B: Backend>(tensor: Tensor<B, 4>, path: impl AsRef<Path>) -> DatasetResult<()> {
        let images = tensor_to_images(tensor)?;
        let img = if images.len() == 1 {
            images.into_iter().next().ok_or_else(|| DatasetError::Shape("empty batch".into()))?
        } else {
            grid(&[images])?
        };
        save_image(&img, path)
    }

    /// One grid row per tensor, one column per example.
    pub fn save_grid<B: Backend>(rows: Vec<Tensor<B, 4>>, path: impl AsRef<Path>) -> DatasetResult<()> {
        let rows = rows
            .into_iter()
            .map(tensor_to_images)
            .collect::<DatasetResult<Vec<_>>>()?;
        save_image(&grid(&rows)?, path)
    }
}
