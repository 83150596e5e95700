use super::dataset::{HEIGHT, MnistItem, WIDTH};
use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;

#[derive(Clone, Default)]
pub struct MnistBatcher {}

#[derive(Clone, Debug)]
pub struct MnistBatch<B: Backend> {
    /// The input feature is the brightness, scaled into `[0, 1]` (`value / 255`).
    ///
    /// # Shape
    /// [batch_size, 1, HEIGHT, WIDTH]
    pub images: Tensor<B, 4>,
    /// # Shape
    /// [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, MnistItem, MnistBatch<B>> for MnistBatcher {
    fn batch(&self, items: Vec<MnistItem>, device: &B::Device) -> MnistBatch<B> {
        let batch_size = items.len();
        let (items_image, items_label): (Vec<_>, Vec<_>) = items
            .into_iter()
            .map(|item| (item.image, item.label))
            .unzip();

        let pixels: Vec<_> = items_image.into_iter().flatten().collect();
        debug_assert_eq!(pixels.len(), batch_size * HEIGHT * WIDTH);
        let images = TensorData::new(pixels, [batch_size, 1, HEIGHT, WIDTH])
            .convert::<B::FloatElem>();
        let images = Tensor::<B, 4>::from_data(images, device) / 255;

        let labels: Vec<i64> = items_label.into_iter().map(i64::from).collect();
        let targets = TensorData::new(labels, [batch_size]).convert::<B::IntElem>();
        let targets = Tensor::<B, 1, Int>::from_data(targets, device);

        MnistBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mnist::dataset::tests::{idx_images, idx_labels};
    use crate::mnist::dataset::MnistDataset;
    use burn_dataset::Dataset;

    type TestBackend = burn::backend::NdArray<f32>;

    #[test]
    fn batch_shapes_and_scaling() {
        let mut white = [0u8; WIDTH * HEIGHT];
        white.fill(255);
        let mut dot = [0u8; WIDTH * HEIGHT];
        dot[WIDTH + 1] = 51;
        let dataset =
            MnistDataset::from_idx(&idx_images(&[white, dot])[..], &idx_labels(&[0, 7])[..])
                .unwrap();
        let items: Vec<_> = (0..dataset.len()).filter_map(|i| dataset.get(i)).collect();

        let device = Default::default();
        let batch: MnistBatch<TestBackend> = MnistBatcher::default().batch(items, &device);

        assert_eq!(batch.images.dims(), [2, 1, HEIGHT, WIDTH]);
        assert_eq!(batch.targets.dims(), [2]);

        let images = batch.images.into_data().to_vec::<f32>().unwrap();
        assert!(images[..WIDTH * HEIGHT].iter().all(|&v| v == 1.0));
        let dot = &images[WIDTH * HEIGHT..];
        assert!((dot[WIDTH + 1] - 0.2).abs() < 1e-6);
        assert_eq!(dot.iter().filter(|&&v| v != 0.0).count(), 1);

        let targets = batch.targets.into_data().to_vec::<i64>().unwrap();
        assert_eq!(targets, vec![0, 7]);
    }
}
