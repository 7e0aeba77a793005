pub mod discriminator;
pub mod encoder;
pub mod generator;
mod layers;

use burn::prelude::*;

use crate::{
    error::BicycleError,
    model::{
        discriminator::{Discriminator, DiscriminatorConfig},
        encoder::{Encoder, EncoderConfig},
        generator::{Generator, GeneratorConfig},
    },
};

/// Downsampling factors of the two discriminator heads.
pub const PATCH_FACTORS: [usize; 2] = [4, 8];

/// Spatial sizes `[height, width]` of the fine and coarse score maps.
pub fn patch_shapes(height: usize, width: usize) -> [[usize; 2]; 2] {
    PATCH_FACTORS.map(|factor| [height / factor, width / factor])
}

#[derive(Config, Debug)]
pub struct ModelConfig {
    #[config(default = 3)]
    pub channels: usize,
    #[config(default = 128)]
    pub img_height: usize,
    #[config(default = 128)]
    pub img_width: usize,
    #[config(default = 8)]
    pub latent_dim: usize,
    #[config(default = 64)]
    pub generator_filters: usize,
    #[config(default = 7)]
    pub generator_depth: usize,
    #[config(default = 64)]
    pub encoder_filters: usize,
    #[config(default = 64)]
    pub discriminator_filters: usize,
}
impl ModelConfig {
    pub fn image_shape(&self) -> [usize; 3] {
        [self.channels, self.img_height, self.img_width]
    }

    /// Reject shapes the networks cannot divide evenly.
    pub fn validate(&self) -> crate::Result<()> {
        if self.latent_dim == 0 {
            return Err(BicycleError::InvalidConfig("latent_dim must be positive".into()));
        }
        // image decoding and grid writing handle grayscale and RGB only
        if !matches!(self.channels, 1 | 3) {
            return Err(BicycleError::InvalidConfig(format!(
                "channels must be 1 or 3, got {}",
                self.channels
            )));
        }
        if self.generator_depth < 2 {
            return Err(BicycleError::InvalidConfig(format!(
                "generator depth must be at least 2, got {}",
                self.generator_depth
            )));
        }

        // the encoder halves four times, the coarse patch head three times
        let divisor = (1usize << self.generator_depth).max(16);
        for (name, size) in [("height", self.img_height), ("width", self.img_width)] {
            if size == 0 || size % divisor != 0 {
                return Err(BicycleError::InvalidConfig(format!(
                    "image {name} {size} must be a positive multiple of {divisor}"
                )));
            }
        }

        Ok(())
    }

    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig::new(self.channels, self.latent_dim)
            .with_filters(self.generator_filters)
            .with_depth(self.generator_depth)
    }

    pub fn encoder_config(&self) -> EncoderConfig {
        EncoderConfig::new(self.channels, self.latent_dim).with_filters(self.encoder_filters)
    }

    pub fn discriminator_config(&self) -> DiscriminatorConfig {
        DiscriminatorConfig::new(self.channels).with_filters(self.discriminator_filters)
    }

    pub fn init_generator<B: Backend>(&self, device: &B::Device) -> Generator<B> {
        self.generator_config().init(device)
    }

    pub fn init_encoder<B: Backend>(&self, device: &B::Device) -> Encoder<B> {
        self.encoder_config().init(device)
    }

    pub fn init_discriminator<B: Backend>(&self, device: &B::Device) -> Discriminator<B> {
        self.discriminator_config().init(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_shapes_use_fixed_factors() {
        assert_eq!(patch_shapes(128, 128), [[32, 32], [16, 16]]);
        assert_eq!(patch_shapes(64, 32), [[16, 8], [8, 4]]);
    }

    #[test]
    fn default_config_is_valid() {
        ModelConfig::new().validate().unwrap();
    }

    #[test]
    fn rejects_sizes_the_generator_cannot_halve() {
        let config = ModelConfig::new().with_img_height(96);
        assert!(matches!(
            config.validate(),
            Err(BicycleError::InvalidConfig(_))
        ));

        let config = ModelConfig::new()
            .with_img_height(16)
            .with_img_width(16)
            .with_generator_depth(3);
        config.validate().unwrap();

        let config = config.with_img_width(8);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_latent_dim() {
        assert!(ModelConfig::new().with_latent_dim(0).validate().is_err());
    }

    #[test]
    fn accepts_only_grayscale_or_rgb() {
        ModelConfig::new().with_channels(1).validate().unwrap();
        for channels in [0, 2, 4] {
            assert!(matches!(
                ModelConfig::new().with_channels(channels).validate(),
                Err(BicycleError::InvalidConfig(_))
            ));
        }
    }
}
