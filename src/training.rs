use crate::artifacts::Artifacts;
use crate::convnet::{ConvNet, ConvNetConfig};
use crate::mnist::{MnistBatch, MnistBatcher, MnistItem};
use anyhow::{Result, ensure};
use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::data::dataset::Dataset;
use burn::prelude::*;
use burn::{
    optim::{Adam, AdamConfig, GradientsParams, Optimizer, adaptor::OptimizerAdaptor},
    tensor::backend::AutodiffBackend,
};
use std::sync::Arc;

#[derive(Config)]
pub struct TrainingConfig {
    pub optimizer: AdamConfig,
    #[config(default = 5)]
    pub num_epochs: usize,
    #[config(default = 100)]
    pub batch_size: usize,
    #[config(default = 2)]
    pub num_workers: usize,
    #[config(default = 1e-3)]
    pub lr: f64,
    #[config(default = 0)]
    pub seed: u64,
    /// Print the training loss every `log_interval` batches.
    #[config(default = 100)]
    pub log_interval: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self::new(optimizer_config())
    }
}

impl TrainingConfig {
    /// Rejects settings that would stall or break the training loop.
    ///
    /// Configs can be loaded from user files, so this runs before any training.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.num_epochs > 0, "num_epochs must be positive");
        ensure!(self.batch_size > 0, "batch_size must be positive");
        ensure!(self.log_interval > 0, "log_interval must be positive");
        ensure!(
            self.lr.is_finite() && self.lr > 0.0,
            "lr must be positive, found {}",
            self.lr
        );
        Ok(())
    }
}

pub fn optimizer_config() -> AdamConfig {
    AdamConfig::new()
        .with_beta_1(0.9)
        .with_beta_2(0.999)
        .with_epsilon(1e-8)
}

/// Adam over the network parameters, as saved in and restored from the artifacts.
pub type ConvNetOptimizer<AutoB> = OptimizerAdaptor<Adam, ConvNet<AutoB>, AutoB>;

pub type Dataloader<B> = Arc<dyn DataLoader<B, MnistBatch<B>>>;

/// Shuffled loader over the training split.
pub fn train_dataloader<AutoB: AutodiffBackend>(
    training_config: &TrainingConfig,
    dataset: impl Dataset<MnistItem> + 'static,
    device: &AutoB::Device,
) -> Dataloader<AutoB> {
    DataLoaderBuilder::new(MnistBatcher::default())
        .set_device(device.clone())
        .batch_size(training_config.batch_size)
        .shuffle(training_config.seed)
        .num_workers(training_config.num_workers)
        .build(dataset)
}

/// Loader over the test split, in dataset order.
pub fn test_dataloader<B: Backend>(
    training_config: &TrainingConfig,
    dataset: impl Dataset<MnistItem> + 'static,
    device: &B::Device,
) -> Dataloader<B> {
    DataLoaderBuilder::new(MnistBatcher::default())
        .set_device(device.clone())
        .batch_size(training_config.batch_size)
        .num_workers(training_config.num_workers)
        .build(dataset)
}

/// Loss and accuracy accumulated over batches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    pub loss_sum: f64,
    pub batches: usize,
    pub correct: usize,
    pub total: usize,
}

impl Evaluation {
    pub fn update(&mut self, loss: f64, correct: usize, batch_size: usize) {
        self.loss_sum += loss;
        self.batches += 1;
        self.correct += correct;
        self.total += batch_size;
    }

    /// Mean of the per-batch losses.
    pub fn loss(&self) -> f64 {
        if self.batches == 0 {
            f64::NAN
        } else {
            self.loss_sum / self.batches as f64
        }
    }

    /// Percentage of correctly classified items.
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            100.0 * self.correct as f64 / self.total as f64
        }
    }
}

/// Number of rows whose highest logit is at the target class.
///
/// # Shapes
///
/// - logits: `[batch_size, num_classes]`
/// - targets: `[batch_size]`
pub fn num_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let [batch_size, _num_classes] = logits.dims();
    let predicted = logits.argmax(1).reshape([batch_size]);
    let correct: i64 = predicted.equal(targets).int().sum().into_scalar().elem();
    correct as usize
}

/// Trains for `training_config.num_epochs` epochs, resuming from the model and optimizer
/// found in `artifacts`, and saving both after each epoch.
pub fn train<AutoB: AutodiffBackend>(
    training_config: &TrainingConfig,
    model_config: &ConvNetConfig,
    training_device: &AutoB::Device,
    artifacts: &Artifacts,
    dataset_train: impl Dataset<MnistItem> + 'static,
) -> Result<ConvNet<AutoB>> {
    training_config.validate()?;
    AutoB::seed(training_config.seed);

    // load (or init and save) model and optim
    let mut model = artifacts.load_or_save_model::<AutoB>(model_config, training_device)?;
    let mut optim =
        artifacts.load_or_save_optim::<AutoB>(&training_config.optimizer, training_device)?;
    log::info!("Model has {} parameters", model.num_params());

    let dataloader_train = train_dataloader::<AutoB>(training_config, dataset_train, training_device);

    println!("Starting training...");
    for epoch in 1..training_config.num_epochs + 1 {
        let (trained, summary) = epoch_train(
            Arc::clone(&dataloader_train),
            model,
            &mut optim,
            training_config,
            epoch,
        );
        model = trained;

        println!("{}", epoch_line(epoch, training_config.num_epochs, &summary));

        // save assets
        artifacts.save_model::<AutoB>(&model)?;
        artifacts.save_optim::<AutoB>(&optim)?;
    }
    println!("Training finished.");

    Ok(model)
}

/// Runs one pass over the training loader: one optimizer step per batch.
pub fn epoch_train<AutoB, O>(
    dataloader_train: Dataloader<AutoB>,
    mut model: ConvNet<AutoB>,
    optim: &mut O,
    training_config: &TrainingConfig,
    epoch: usize,
) -> (ConvNet<AutoB>, Evaluation)
where
    AutoB: AutodiffBackend,
    O: Optimizer<ConvNet<AutoB>, AutoB>,
{
    let total_steps = num_steps(dataloader_train.num_items(), training_config.batch_size);
    let mut summary = Evaluation::default();

    for (step, batch) in dataloader_train.iter().enumerate() {
        let step = step + 1;
        let [batch_size] = batch.targets.dims();

        let output = model.forward_classification(batch.images, batch.targets);
        let loss: f64 = output.loss.clone().into_scalar().elem();
        let correct = num_correct(output.output, output.targets);
        summary.update(loss, correct, batch_size);

        // gradients are returned per backward pass, there is nothing to zero
        let grads = output.loss.backward();
        let grads = GradientsParams::from_grads(grads, &model);
        model = optim.step(training_config.lr, model, grads);

        if is_log_step(step, training_config.log_interval) {
            println!(
                "{}",
                progress_line(epoch, training_config.num_epochs, step, total_steps, loss)
            );
        }
    }

    (model, summary)
}

/// Evaluates the model over the whole loader.
///
/// Meant for a model on a backend without autodiff (see [`AutodiffModule::valid`]),
/// so batch normalization uses its running statistics.
///
/// [`AutodiffModule::valid`]: burn::module::AutodiffModule::valid
pub fn evaluate<B: Backend>(dataloader: Dataloader<B>, model: &ConvNet<B>) -> Evaluation {
    let mut evaluation = Evaluation::default();

    for batch in dataloader.iter() {
        let [batch_size] = batch.targets.dims();
        let output = model.forward_classification(batch.images, batch.targets);
        let loss: f64 = output.loss.into_scalar().elem();
        let correct = num_correct(output.output, output.targets);
        evaluation.update(loss, correct, batch_size);
    }

    evaluation
}

/// Evaluates the model on the test split and prints the accuracy.
pub fn test_model<B: Backend>(
    training_config: &TrainingConfig,
    model: &ConvNet<B>,
    dataset_test: impl Dataset<MnistItem> + 'static,
    device: &B::Device,
) -> Evaluation {
    let dataloader_test = test_dataloader::<B>(training_config, dataset_test, device);
    let evaluation = evaluate(dataloader_test, model);

    log::info!("Test loss: {:.4}", evaluation.loss());
    println!("{}", accuracy_line(&evaluation));

    evaluation
}

/// Number of batches in one pass, counting a partial last batch.
pub fn num_steps(num_items: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        0
    } else {
        num_items.div_ceil(batch_size)
    }
}

/// Whether the 1-based `step` prints a progress line. A zero interval never prints.
pub fn is_log_step(step: usize, log_interval: usize) -> bool {
    step.checked_rem(log_interval) == Some(0)
}

pub fn progress_line(
    epoch: usize,
    num_epochs: usize,
    step: usize,
    total_steps: usize,
    loss: f64,
) -> String {
    format!("Epoch [{epoch}/{num_epochs}], Step [{step}/{total_steps}], Loss: {loss:.4}")
}

pub fn epoch_line(epoch: usize, num_epochs: usize, summary: &Evaluation) -> String {
    format!(
        "Epoch [{epoch}/{num_epochs}], Avg Loss: {:.4}, Avg Acc: {:.2} %",
        summary.loss(),
        summary.accuracy(),
    )
}

pub fn accuracy_line(evaluation: &Evaluation) -> String {
    format!(
        "Test Accuracy of the model on the {} test images: {} %",
        evaluation.total,
        evaluation.accuracy()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestBackend = burn::backend::NdArray<f32>;

    #[test]
    fn counts_argmax_matches() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::from_floats(
            [[0.1, 2.0, -1.0], [3.0, 0.0, 0.5], [0.0, 0.2, 0.1]],
            &device,
        );
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([1, 2, 1], &device);
        assert_eq!(num_correct(logits, targets), 2);
    }

    #[test]
    fn evaluation_averages() {
        let mut evaluation = Evaluation::default();
        assert_eq!(evaluation.accuracy(), 0.0);
        assert!(evaluation.loss().is_nan());

        evaluation.update(1.0, 3, 4);
        evaluation.update(0.5, 4, 4);
        assert_eq!(evaluation.total, 8);
        assert!((evaluation.loss() - 0.75).abs() < 1e-12);
        assert!((evaluation.accuracy() - 87.5).abs() < 1e-12);
    }

    #[test]
    fn default_hyperparameters() {
        let config = TrainingConfig::default();
        assert_eq!(config.num_epochs, 5);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.lr, 0.001);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_settings() {
        let config = TrainingConfig::default;
        assert!(config().with_log_interval(0).validate().is_err());
        assert!(config().with_batch_size(0).validate().is_err());
        assert!(config().with_num_epochs(0).validate().is_err());
        assert!(config().with_lr(0.0).validate().is_err());
        assert!(config().with_lr(f64::NAN).validate().is_err());
    }

    #[test]
    fn steps_count_partial_batches() {
        assert_eq!(num_steps(60_000, 100), 600);
        assert_eq!(num_steps(20, 8), 3);
        assert_eq!(num_steps(0, 8), 0);
        assert_eq!(num_steps(10, 0), 0);
    }

    #[test]
    fn logs_every_interval() {
        let logged: Vec<usize> = (1..=600).filter(|&step| is_log_step(step, 100)).collect();
        assert_eq!(logged, [100, 200, 300, 400, 500, 600]);
        assert!((1..=10).all(|step| !is_log_step(step, 0)));
    }

    #[test]
    fn console_lines() {
        assert_eq!(
            progress_line(1, 5, 100, num_steps(60_000, 100), 0.123456),
            "Epoch [1/5], Step [100/600], Loss: 0.1235"
        );
        assert_eq!(
            progress_line(2, 5, 3, num_steps(20, 8), 2.0),
            "Epoch [2/5], Step [3/3], Loss: 2.0000"
        );

        let mut evaluation = Evaluation::default();
        evaluation.update(0.1, 9, 10);
        evaluation.update(0.3, 10, 10);
        assert_eq!(
            epoch_line(3, 5, &evaluation),
            "Epoch [3/5], Avg Loss: 0.2000, Avg Acc: 95.00 %"
        );
        assert_eq!(
            accuracy_line(&evaluation),
            "Test Accuracy of the model on the 20 test images: 95 %"
        );
    }
}
