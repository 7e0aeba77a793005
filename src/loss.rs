use burn::{
    nn::loss::{MseLoss, Reduction},
    prelude::*,
};

use crate::model::discriminator::PatchScores;

pub const REAL_LABEL: f32 = 1.0;
pub const FAKE_LABEL: f32 = 0.0;

/// Weights of the composite encoder/generator objective.
#[derive(Config, Debug)]
pub struct LossWeights {
    #[config(default = 10.0)]
    pub pixel: f64,
    #[config(default = 0.01)]
    pub kl: f64,
    #[config(default = 0.5)]
    pub latent: f64,
}

/// Mean squared error of both score maps against a constant label, averaged
/// over the two scales.
pub fn adversarial_loss<B: Backend>(scores: PatchScores<B>, label: f32) -> Tensor<B, 1> {
    let mse = MseLoss::new();
    let fine_target = scores.fine.ones_like().mul_scalar(label);
    let coarse_target = scores.coarse.ones_like().mul_scalar(label);

    let fine = mse.forward(scores.fine, fine_target, Reduction::Mean);
    let coarse = mse.forward(scores.coarse, coarse_target, Reduction::Mean);

    (fine + coarse).div_scalar(2.0)
}

/// Least-squares discriminator objective: real images pushed to 1,
/// generated images to 0. `fake` must come from detached images.
pub fn discriminator_loss<B: Backend>(real: PatchScores<B>, fake: PatchScores<B>) -> Tensor<B, 1> {
    let real_loss = adversarial_loss(real, REAL_LABEL);
    let fake_loss = adversarial_loss(fake, FAKE_LABEL);

    (real_loss + fake_loss).div_scalar(2.0)
}

/// Mean absolute error between a generated and a target image.
pub fn pixel_loss<B: Backend>(generated: Tensor<B, 4>, target: Tensor<B, 4>) -> Tensor<B, 1> {
    generated.sub(target).abs().mean()
}

/// Closed form KL divergence from N(mu, exp(logvar)) to N(0, I), summed over
/// the batch and latent dimensions.
pub fn kl_divergence<B: Backend>(mu: Tensor<B, 2>, logvar: Tensor<B, 2>) -> Tensor<B, 1> {
    let kl = mu.powf_scalar(2.0) + logvar.clone().exp() - logvar - 1.0;

    kl.sum().mul_scalar(0.5)
}

/// Mean absolute error between the re-encoded mean and the latent the image
/// was generated from.
pub fn latent_loss<B: Backend>(encoded_mu: Tensor<B, 2>, sampled: Tensor<B, 2>) -> Tensor<B, 1> {
    encoded_mu.sub(sampled).abs().mean()
}
