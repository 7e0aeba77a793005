use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        pool::{AvgPool2d, AvgPool2dConfig},
        BatchNorm, BatchNormConfig, Initializer, LeakyRelu, LeakyReluConfig, PaddingConfig2d,
        Relu,
    },
    prelude::*,
};

/// Convolution weights of freshly initialised generator and discriminator layers.
pub fn conv_initializer() -> Initializer {
    Initializer::Normal {
        mean: 0.0,
        std: 0.02,
    }
}

/// Strided 4x4 convolution halving the spatial size. Shared by the U-Net
/// contracting path and the patch discriminator trunk.
#[derive(Module, Debug)]
pub struct DownBlock<B: Backend> {
    conv: Conv2d<B>,
    bn: Option<BatchNorm<B, 2>>,
    lrelu: LeakyRelu,
}
impl<B: Backend> DownBlock<B> {
    pub fn new(channels: [usize; 2], normalize: bool, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new(channels, [4, 4])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_initializer(conv_initializer())
            .init(device);
        let bn = normalize.then(|| {
            BatchNormConfig::new(channels[1])
                .with_momentum(0.8)
                .init(device)
        });
        let lrelu = LeakyReluConfig::new().with_negative_slope(0.2).init();

        Self { conv, bn, lrelu }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.conv.forward(input);
        let output = match &self.bn {
            Some(bn) => bn.forward(output),
            None => output,
        };
        self.lrelu.forward(output)
    }
}

/// Transposed 4x4 convolution doubling the spatial size, followed by the
/// U-Net skip concatenation.
#[derive(Module, Debug)]
pub struct UpBlock<B: Backend> {
    deconv: ConvTranspose2d<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
}
impl<B: Backend> UpBlock<B> {
    pub fn new(channels: [usize; 2], device: &B::Device) -> Self {
        let deconv = ConvTranspose2dConfig::new(channels, [4, 4])
            .with_stride([2, 2])
            .with_padding([1, 1])
            .with_initializer(conv_initializer())
            .init(device);
        let bn = BatchNormConfig::new(channels[1])
            .with_momentum(0.8)
            .init(device);

        Self {
            deconv,
            bn,
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>, skip: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.deconv.forward(input);
        let output = self.bn.forward(output);
        let output = self.relu.forward(output);

        Tensor::cat(vec![output, skip], 1)
    }
}

/// Pre-activation residual block that halves the spatial size. The shortcut
/// is average pooled and projected so both paths agree in shape.
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    bn1: BatchNorm<B, 2>,
    conv1: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    pool: AvgPool2d,
    shortcut: Conv2d<B>,
    lrelu: LeakyRelu,
}
impl<B: Backend> ResidualBlock<B> {
    pub fn new(channels: [usize; 2], device: &B::Device) -> Self {
        let bn1 = BatchNormConfig::new(channels[0]).init(device);
        let conv1 = Conv2dConfig::new([channels[0], channels[0]], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let bn2 = BatchNormConfig::new(channels[0]).init(device);
        let conv2 = Conv2dConfig::new(channels, [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let pool = AvgPool2dConfig::new([2, 2]).with_strides([2, 2]).init();
        let shortcut = Conv2dConfig::new(channels, [1, 1]).init(device);
        let lrelu = LeakyReluConfig::new().with_negative_slope(0.2).init();

        Self {
            bn1,
            conv1,
            bn2,
            conv2,
            pool,
            shortcut,
            lrelu,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.bn1.forward(input.clone());
        let output = self.lrelu.forward(output);
        let output = self.conv1.forward(output);
        let output = self.bn2.forward(output);
        let output = self.lrelu.forward(output);
        let output = self.conv2.forward(output);
        let output = self.pool.forward(output);

        let shortcut = self.shortcut.forward(self.pool.forward(input));

        output.add(shortcut)
    }
}
