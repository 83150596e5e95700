use crate::conv_block::{ConvBlock, ConvBlockConfig};
use burn::{
    nn::{Linear, LinearConfig, loss::CrossEntropyLossConfig},
    prelude::*,
    train::ClassificationOutput,
};

/// Two convolutional stages followed by a linear classification head.
#[derive(Config, Debug)]
pub struct ConvNetConfig {
    #[config(default = 10)]
    pub num_classes: usize,

    /// Channels of the input images (1 for grayscale).
    #[config(default = 1)]
    pub in_channels: usize,

    #[config(default = 16)]
    pub layer1_channels: usize,

    #[config(default = 32)]
    pub layer2_channels: usize,

    #[config(default = 5)]
    pub kernel_size: usize,

    #[config(default = 28)]
    pub height: usize,

    #[config(default = 28)]
    pub width: usize,
}

impl ConvNetConfig {
    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvNet<B> {
        let layer1 = self.layer1().init(device);
        let layer2 = self.layer2().init(device);
        let fc = LinearConfig::new(self.fc_input_size(), self.num_classes)
            .with_bias(true)
            .init(device);
        ConvNet { layer1, layer2, fc }
    }

    pub fn layer1(&self) -> ConvBlockConfig {
        ConvBlockConfig::new(self.in_channels, self.layer1_channels)
            .with_kernel_size(self.kernel_size)
            .with_padding(self.kernel_size / 2)
    }

    pub fn layer2(&self) -> ConvBlockConfig {
        ConvBlockConfig::new(self.layer1_channels, self.layer2_channels)
            .with_kernel_size(self.kernel_size)
            .with_padding(self.kernel_size / 2)
    }

    /// Number of features entering the classification head.
    ///
    /// For the default 28x28 images this is `32 * 7 * 7`.
    pub fn fc_input_size(&self) -> usize {
        let [h, w] = self.layer1().output_size(self.height, self.width);
        let [h, w] = self.layer2().output_size(h, w);
        self.layer2_channels * h * w
    }
}

#[derive(Module, Debug)]
pub struct ConvNet<B: Backend> {
    pub layer1: ConvBlock<B>,
    pub layer2: ConvBlock<B>,
    pub fc: Linear<B>,
}

impl<B: Backend> ConvNet<B> {
    /// # Shapes
    ///
    /// - images: `[batch_size, in_channels, height, width]`
    /// - output: `[batch_size, num_classes]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _channels, _height, _width] = images.dims();
        let [fc_input_size, num_classes] = self.fc.weight.dims();

        let x = self.layer1.forward(images);
        let x = self.layer2.forward(x);

        // flatten channels and spatial dims
        let x = x.reshape([batch_size, fc_input_size]);
        let x = self.fc.forward(x);
        debug_assert_eq!([batch_size, num_classes], x.dims());

        x
    }

    /// Forward pass plus the cross-entropy loss against integer class labels.
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let [batch_size, _channels, _height, _width] = images.dims();
        assert_eq!([batch_size], targets.dims());

        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestBackend = burn::backend::NdArray<f32>;

    #[test]
    fn default_head_size() {
        let config = ConvNetConfig::new();
        assert_eq!(config.fc_input_size(), 7 * 7 * 32);
    }

    #[test]
    fn head_size_follows_image_size() {
        let config = ConvNetConfig::new().with_height(12).with_width(8);
        // 12x8 -> 6x4 -> 3x2
        assert_eq!(config.fc_input_size(), 32 * 3 * 2);
    }

    #[test]
    fn parameter_shapes() {
        let device = Default::default();
        let model: ConvNet<TestBackend> = ConvNetConfig::new().init(&device);
        assert_eq!(model.layer1.conv.weight.dims(), [16, 1, 5, 5]);
        assert_eq!(model.layer2.conv.weight.dims(), [32, 16, 5, 5]);
        assert_eq!(model.fc.weight.dims(), [7 * 7 * 32, 10]);
    }
}
