pub mod artifacts;
pub mod backend;
pub mod cli;
pub mod conv_block;
pub mod convnet;
pub mod mnist;
pub mod training;

pub mod prelude {
    pub use crate::artifacts::Artifacts;
    pub use crate::conv_block::{ConvBlock, ConvBlockConfig};
    pub use crate::convnet::{ConvNet, ConvNetConfig};
    pub use crate::mnist::{MnistBatch, MnistBatcher, MnistDataset, MnistItem};
    pub use crate::training::{Evaluation, TrainingConfig};
}
