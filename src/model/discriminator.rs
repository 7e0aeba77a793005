use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        PaddingConfig2d,
    },
    prelude::*,
};

use crate::model::layers::{conv_initializer, DownBlock};

/// Realism score maps produced by one discriminator call.
#[derive(Clone, Debug)]
pub struct PatchScores<B: Backend> {
    /// `[batch, 1, height / 4, width / 4]`
    pub fine: Tensor<B, 4>,
    /// `[batch, 1, height / 8, width / 8]`
    pub coarse: Tensor<B, 4>,
}

/// Patch discriminator scoring at two scales. Both heads read from one
/// shared trunk: the fine head after two halvings, the coarse head after three.
#[derive(Module, Debug)]
pub struct Discriminator<B: Backend> {
    disc_layer_1: DownBlock<B>,
    disc_layer_2: DownBlock<B>,
    disc_layer_3: DownBlock<B>,
    fine_head: Conv2d<B>,
    coarse_head: Conv2d<B>,
}
impl<B: Backend> Discriminator<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> PatchScores<B> {
        let output = self.disc_layer_1.forward(input);
        let output = self.disc_layer_2.forward(output);
        let fine = self.fine_head.forward(output.clone());

        let output = self.disc_layer_3.forward(output);
        let coarse = self.coarse_head.forward(output);

        PatchScores { fine, coarse }
    }
}

#[derive(Config, Debug)]
pub struct DiscriminatorConfig {
    pub channels: usize,
    #[config(default = 64)]
    pub filters: usize,
}
impl DiscriminatorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Discriminator<B> {
        let f = self.filters;

        let disc_layer_1 = DownBlock::new([self.channels, f], false, device);
        let disc_layer_2 = DownBlock::new([f, 2 * f], true, device);
        let disc_layer_3 = DownBlock::new([2 * f, 4 * f], true, device);

        let head = |channels: usize| {
            Conv2dConfig::new([channels, 1], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_initializer(conv_initializer())
                .init(device)
        };

        Discriminator {
            disc_layer_1,
            disc_layer_2,
            disc_layer_3,
            fine_head: head(2 * f),
            coarse_head: head(4 * f),
        }
    }
}
