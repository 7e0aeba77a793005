use burn::prelude::*;
use image::{imageops::FilterType, DynamicImage, GrayImage, RgbImage};
use std::path::Path;

use crate::error::{BicycleError, Result};

/// Pixels of a side-by-side pair image after splitting, resizing and
/// normalisation, both in `[channels, height, width]` order.
#[derive(Debug, Clone)]
pub struct PixelPair {
    pub source: Vec<f32>,
    pub target: Vec<f32>,
}

/// Load an image holding the source on its left half and the target on its
/// right half.
pub fn load_pair<P: AsRef<Path>>(
    path: P,
    [channels, height, width]: [usize; 3],
    flip: bool,
) -> Result<PixelPair> {
    let image = image::open(path)?;
    let (w, h) = (image.width(), image.height());
    let half = w / 2;

    let prepare = |part: DynamicImage| {
        let part = part.resize_exact(width as u32, height as u32, FilterType::CatmullRom);
        let part = if flip { part.fliph() } else { part };
        image_to_chw(&part, channels)
    };

    let source = prepare(image.crop_imm(0, 0, half, h))?;
    let target = prepare(image.crop_imm(half, 0, w - half, h))?;

    Ok(PixelPair { source, target })
}

/// Channel-major pixel values scaled from `[0, 255]` to `[-1, 1]`.
pub fn image_to_chw(image: &DynamicImage, channels: usize) -> Result<Vec<f32>> {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let interleaved = match channels {
        1 => image.to_luma8().into_raw(),
        3 => image.to_rgb8().into_raw(),
        n => {
            return Err(BicycleError::InvalidConfig(format!(
                "only 1 or 3 channel images are supported, got {n}"
            )))
        }
    };

    let mut planar = vec![0.0; interleaved.len()];
    for (i, value) in interleaved.into_iter().enumerate() {
        let channel = i % channels;
        let pixel = i / channels;
        planar[channel * width * height + pixel] = (value as f32 / 255.0 - 0.5) / 0.5;
    }

    Ok(planar)
}

/// Write `[rows, channels, height, width]` as one image with the rows stacked
/// vertically. Values are min-max normalised over the whole grid.
pub fn save_grid<B: Backend, Q: AsRef<Path>>(grid: Tensor<B, 4>, path: Q) -> Result<()> {
    let [rows, channels, height, width] = grid.dims();
    let total_height = rows * height;

    // [R, C, H, W] -> [R, H, W, C] -> [R * H, W, C]
    let pixels = grid
        .permute([0, 2, 3, 1])
        .reshape([total_height, width, channels])
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| BicycleError::Data(format!("{e:?}")))?;

    let (min, max) = pixels
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });
    let range = (max - min).max(1e-5);
    let bytes = pixels
        .iter()
        .map(|v| (((v - min) / range) * 255.0 + 0.5).clamp(0.0, 255.0) as u8)
        .collect::<Vec<_>>();

    let (w, h) = (width as u32, total_height as u32);
    let invalid = || BicycleError::Data("grid buffer does not match its shape".into());
    match channels {
        1 => GrayImage::from_raw(w, h, bytes).ok_or_else(invalid)?.save(path)?,
        3 => RgbImage::from_raw(w, h, bytes).ok_or_else(invalid)?.save(path)?,
        n => {
            return Err(BicycleError::InvalidConfig(format!(
                "cannot write a {n} channel image"
            )))
        }
    }

    Ok(())
}
