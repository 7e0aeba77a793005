use burn::prelude::*;
use std::path::Path;

use crate::{
    error::Result, latent::interpolation_sweep, model::generator::Generator, utils::save_grid,
};

/// Build the qualitative sample grid for a validation batch.
///
/// Each row holds the source image followed by `samples` generated images,
/// one per interpolated latent value, laid out left to right. The result is
/// `[rows, channels, height, width * (samples + 1)]` with one row per
/// validation item.
pub fn sample_grid<B: Backend>(
    generator: &Generator<B>,
    source: Tensor<B, 4>,
    latent_dim: usize,
    samples: usize,
) -> Tensor<B, 4> {
    let device = source.device();
    let [rows, _, _, _] = source.dims();
    let latent = interpolation_sweep::<B>(samples, latent_dim, &device);

    let grid_rows = (0..rows)
        .map(|row| {
            let real_a = source.clone().narrow(0, row, 1);
            let repeated = real_a.clone().repeat_dim(0, samples);
            let fake_b = generator.forward(repeated, latent.clone());

            let mut columns = vec![real_a];
            columns.extend((0..samples).map(|i| fake_b.clone().narrow(0, i, 1)));
            Tensor::cat(columns, 3)
        })
        .collect::<Vec<_>>();

    Tensor::cat(grid_rows, 0)
}

/// Generate the sample grid for `source` and write it to `path`.
pub fn save_samples<B: Backend, P: AsRef<Path>>(
    generator: &Generator<B>,
    source: Tensor<B, 4>,
    latent_dim: usize,
    path: P,
) -> Result<()> {
    let [samples, _, _, _] = source.dims();
    let grid = sample_grid(generator, source, latent_dim, samples);

    save_grid(grid, path)
}
