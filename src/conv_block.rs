use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d, Relu};
use burn::prelude::*;

/// Feature extraction stage: `conv -> batch norm -> relu -> max pool`.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    /// Input channel: in_channels.
    /// Output channel: out_channels.
    pub conv: Conv2d<B>,

    /// Normalizes each of the out_channels feature maps.
    pub norm: BatchNorm<B, 2>,

    pub activation: Relu,

    pub pool: MaxPool2d,
}

#[derive(Config, Debug)]
pub struct ConvBlockConfig {
    pub in_channels: usize,

    pub out_channels: usize,

    /// Side of the square convolution kernel.
    #[config(default = 5)]
    pub kernel_size: usize,

    #[config(default = 1)]
    pub stride: usize,

    /// Zero padding added on every side of the input.
    ///
    /// With `kernel_size = 5` and `stride = 1`, a padding of 2 keeps the spatial size.
    #[config(default = 2)]
    pub padding: usize,

    /// Side and stride of the max pooling window.
    #[config(default = 2)]
    pub pool_size: usize,
}

impl ConvBlockConfig {
    /// Returns the initialized block.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvBlock<B> {
        debug_assert_ne!(self.stride, 0);
        debug_assert_ne!(self.pool_size, 0);

        let conv = Conv2dConfig::new(
            [self.in_channels, self.out_channels],
            [self.kernel_size, self.kernel_size],
        )
        .with_stride([self.stride, self.stride])
        .with_padding(PaddingConfig2d::Explicit(self.padding, self.padding))
        .with_bias(true)
        .init(device);
        let norm = BatchNormConfig::new(self.out_channels).init(device);
        let pool = MaxPool2dConfig::new([self.pool_size, self.pool_size])
            .with_strides([self.pool_size, self.pool_size])
            .init();

        ConvBlock {
            conv,
            norm,
            activation: Relu::new(),
            pool,
        }
    }

    /// Spatial size `[height, width]` of the block output for an input of `[height, width]`.
    pub fn output_size(&self, height: usize, width: usize) -> [usize; 2] {
        let conv = |size: usize| (size + 2 * self.padding - self.kernel_size) / self.stride + 1;
        let pool = |size: usize| (size - self.pool_size) / self.pool_size + 1;
        [pool(conv(height)), pool(conv(width))]
    }
}

impl<B: Backend> ConvBlock<B> {
    /// # Shapes
    ///
    /// - input: `[batch_size, in_channels, height, width]`
    /// - output: `[batch_size, out_channels, height', width']`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.norm.forward(x);
        let x = self.activation.forward(x);
        self.pool.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestBackend = burn::backend::NdArray<f32>;

    #[test]
    fn output_size_halves_with_default_padding() {
        let config = ConvBlockConfig::new(1, 16);
        assert_eq!(config.output_size(28, 28), [14, 14]);
        assert_eq!(config.output_size(14, 14), [7, 7]);
    }

    #[test]
    fn output_size_without_padding() {
        let config = ConvBlockConfig::new(1, 8).with_padding(0);
        // 28 - 5 + 1 = 24, pooled to 12
        assert_eq!(config.output_size(28, 20), [12, 8]);
    }

    #[test]
    fn forward_shape() {
        let device = Default::default();
        let block: ConvBlock<TestBackend> = ConvBlockConfig::new(1, 16).init(&device);
        let x = Tensor::<TestBackend, 4>::ones([3, 1, 28, 28], &device);
        let y = block.forward(x);
        assert_eq!(y.dims(), [3, 16, 14, 14]);
    }

    #[test]
    fn output_is_non_negative() {
        let device = Default::default();
        let block: ConvBlock<TestBackend> = ConvBlockConfig::new(2, 4).init(&device);
        let x = Tensor::<TestBackend, 4>::random(
            [2, 2, 8, 8],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );
        let min: f32 = block.forward(x).min().into_scalar().elem();
        assert!(min >= 0.0);
    }
}
