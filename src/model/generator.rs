use burn::{
    module::Module,
    nn::conv::{ConvTranspose2d, ConvTranspose2dConfig},
    prelude::*,
};

use crate::model::layers::{conv_initializer, DownBlock, UpBlock};

/// U-Net generator conditioned on a latent code. The code is broadcast over
/// the spatial grid and concatenated to the source channels before the first
/// downsampling.
#[derive(Module, Debug)]
pub struct Generator<B: Backend> {
    downs: Vec<DownBlock<B>>,
    ups: Vec<UpBlock<B>>,
    out_layer: ConvTranspose2d<B>,
}
impl<B: Backend> Generator<B> {
    /// `source`: `[batch, channels, height, width]`, `latent`: `[batch, latent_dim]`.
    pub fn forward(&self, source: Tensor<B, 4>, latent: Tensor<B, 2>) -> Tensor<B, 4> {
        let [batch_size, _, height, width] = source.dims();
        let [_, latent_dim] = latent.dims();

        let latent = latent
            .reshape([batch_size, latent_dim, 1, 1])
            .repeat_dim(2, height)
            .repeat_dim(3, width);
        let mut output = Tensor::cat(vec![source, latent], 1);

        let mut skips = Vec::with_capacity(self.downs.len());
        for down in &self.downs {
            output = down.forward(output);
            skips.push(output.clone());
        }

        // the innermost activation is `output` itself, not a skip
        for (up, skip) in self.ups.iter().zip(skips.into_iter().rev().skip(1)) {
            output = up.forward(output, skip);
        }

        let out = self.out_layer.forward(output);

        burn::tensor::activation::tanh(out)
    }
}

#[derive(Config, Debug)]
pub struct GeneratorConfig {
    pub channels: usize,
    pub latent_dim: usize,
    #[config(default = 64)]
    pub filters: usize,
    /// Number of halvings between the input and the bottleneck.
    #[config(default = 7)]
    pub depth: usize,
}
impl GeneratorConfig {
    fn filters_at(&self, level: usize) -> usize {
        self.filters * (1 << level.min(3))
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Generator<B> {
        let depth = self.depth.max(2);

        let mut downs = Vec::with_capacity(depth);
        let mut in_channels = self.channels + self.latent_dim;
        for level in 0..depth {
            let out_channels = self.filters_at(level);
            // no norm on the outermost layer or on the 1x1 bottleneck
            let normalize = level != 0 && level != depth - 1;
            downs.push(DownBlock::new([in_channels, out_channels], normalize, device));
            in_channels = out_channels;
        }

        let mut ups = Vec::with_capacity(depth - 1);
        for step in 0..depth - 1 {
            let level = depth - 1 - step;
            let in_channels = if step == 0 {
                self.filters_at(level)
            } else {
                2 * self.filters_at(level)
            };
            ups.push(UpBlock::new([in_channels, self.filters_at(level - 1)], device));
        }

        let out_layer = ConvTranspose2dConfig::new([2 * self.filters_at(0), self.channels], [4, 4])
            .with_stride([2, 2])
            .with_padding([1, 1])
            .with_initializer(conv_initializer())
            .init(device);

        Generator {
            downs,
            ups,
            out_layer,
        }
    }
}
