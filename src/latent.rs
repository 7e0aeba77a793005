//! Latent code sampling: standard-normal draws, the reparameterization trick
//! and the fixed interpolation sweep used for qualitative samples.

use burn::{prelude::*, tensor::TensorData};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Source of every random latent draw in a run. Seeded once so that two runs
/// with the same seed see the same noise.
#[derive(Debug, Clone)]
pub struct LatentSampler {
    rng: StdRng,
}

impl LatentSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// A fresh `[batch_size, latent_dim]` draw from N(0, I). Every row is
    /// sampled independently and nothing is cached between calls.
    pub fn standard_normal<B: Backend>(
        &mut self,
        batch_size: usize,
        latent_dim: usize,
        device: &B::Device,
    ) -> Tensor<B, 2> {
        let values = (0..batch_size * latent_dim)
            .map(|_| self.rng.sample::<f32, _>(StandardNormal))
            .collect::<Vec<_>>();

        Tensor::from_data(TensorData::new(values, [batch_size, latent_dim]), device)
    }
}

/// `z = eps * exp(logvar / 2) + mu` with `eps` drawn from `sampler`.
///
/// The result stays attached to the graph of `mu` and `logvar`.
pub fn reparameterize<B: Backend>(
    mu: Tensor<B, 2>,
    logvar: Tensor<B, 2>,
    sampler: &mut LatentSampler,
) -> Tensor<B, 2> {
    let [batch_size, latent_dim] = mu.dims();
    let noise = sampler.standard_normal(batch_size, latent_dim, &mu.device());

    reparameterize_with_noise(mu, logvar, noise)
}

/// Reparameterization with caller supplied noise.
pub fn reparameterize_with_noise<B: Backend>(
    mu: Tensor<B, 2>,
    logvar: Tensor<B, 2>,
    noise: Tensor<B, 2>,
) -> Tensor<B, 2> {
    let std = logvar.div_scalar(2.0).exp();

    noise * std + mu
}

/// `count` evenly spaced values covering `[-1, 1]`, endpoints included.
pub fn interpolation_values(count: usize) -> Vec<f32> {
    match count {
        0 => Vec::new(),
        1 => vec![-1.0],
        _ => {
            let step = 2.0 / (count - 1) as f64;
            (0..count).map(|i| (-1.0 + step * i as f64) as f32).collect()
        }
    }
}

/// `[count, latent_dim]` codes where row `i` repeats the `i`-th interpolation
/// value across every latent dimension.
pub fn interpolation_sweep<B: Backend>(
    count: usize,
    latent_dim: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    let values = interpolation_values(count)
        .into_iter()
        .flat_map(|v| std::iter::repeat_n(v, latent_dim))
        .collect::<Vec<_>>();

    Tensor::from_data(TensorData::new(values, [count, latent_dim]), device)
}
