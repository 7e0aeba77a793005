use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        LeakyRelu, LeakyReluConfig, Linear, LinearConfig, PaddingConfig2d,
    },
    prelude::*,
};

use crate::model::layers::ResidualBlock;

/// Residual encoder mapping an image to the mean and log-variance of a
/// diagonal Gaussian over the latent space.
#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    in_layer: Conv2d<B>,
    res_layer_1: ResidualBlock<B>,
    res_layer_2: ResidualBlock<B>,
    res_layer_3: ResidualBlock<B>,
    pool: AdaptiveAvgPool2d,
    fc_mu: Linear<B>,
    fc_logvar: Linear<B>,
    lrelu: LeakyRelu,
}
impl<B: Backend> Encoder<B> {
    /// Returns `(mu, logvar)`, both `[batch, latent_dim]`.
    pub fn forward(&self, input: Tensor<B, 4>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let output = self.in_layer.forward(input);

        let output = self.res_layer_1.forward(output);
        let output = self.res_layer_2.forward(output);
        let output = self.res_layer_3.forward(output);
        let output = self.lrelu.forward(output);

        let output = self.pool.forward(output);
        let output: Tensor<B, 2> = output.flatten(1, 3);

        let mu = self.fc_mu.forward(output.clone());
        let logvar = self.fc_logvar.forward(output);

        (mu, logvar)
    }
}

#[derive(Config, Debug)]
pub struct EncoderConfig {
    pub channels: usize,
    pub latent_dim: usize,
    #[config(default = 64)]
    pub filters: usize,
}
impl EncoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Encoder<B> {
        let f = self.filters;

        let in_layer = Conv2dConfig::new([self.channels, f], [4, 4])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);

        let res_layer_1 = ResidualBlock::new([f, 2 * f], device);
        let res_layer_2 = ResidualBlock::new([2 * f, 3 * f], device);
        let res_layer_3 = ResidualBlock::new([3 * f, 4 * f], device);

        let pool = AdaptiveAvgPool2dConfig::new([1, 1]).init();
        let fc_mu = LinearConfig::new(4 * f, self.latent_dim).init(device);
        let fc_logvar = LinearConfig::new(4 * f, self.latent_dim).init(device);
        let lrelu = LeakyReluConfig::new().with_negative_slope(0.2).init();

        Encoder {
            in_layer,
            res_layer_1,
            res_layer_2,
            res_layer_3,
            pool,
            fc_mu,
            fc_logvar,
            lrelu,
        }
    }
}
