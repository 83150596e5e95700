use anyhow::{Result, anyhow};
use burn::module::AutodiffModule;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn_convnet::backend::{MainAutoBackend, MainBackend, MainDevice};
use burn_convnet::cli::AppArgs;
use burn_convnet::prelude::*;
use burn_convnet::training;

pub fn launch<B, AutoB>(app_args: &AppArgs) -> Result<()>
where
    B: Backend + MainDevice,
    AutoB: AutodiffBackend<InnerBackend = B> + MainDevice,
{
    let artifacts = Artifacts::new(&app_args.artifacts_path);
    artifacts.create(app_args.remove_artifacts && app_args.training())?;

    // configs: explicit file, else artifacts directory, else defaults
    let training_config: TrainingConfig = artifacts
        .load_training_config::<TrainingConfig>(app_args.training_config.as_deref())?
        .unwrap_or_default();
    training_config.validate()?;
    artifacts.save_training_config(&training_config)?;
    let model_config: ConvNetConfig = artifacts
        .load_model_config::<ConvNetConfig>(app_args.model_config.as_deref())?
        .unwrap_or_else(ConvNetConfig::new);
    artifacts.save_model_config(&model_config)?;

    let trained = if app_args.training() {
        let train_device = AutoB::main_device();
        let model = training::train::<AutoB>(
            &training_config,
            &model_config,
            &train_device,
            &artifacts,
            MnistDataset::train(&app_args.data_dir)?,
        )?;
        Some(model.valid())
    } else {
        None
    };

    if app_args.evaluation() {
        let infer_device = B::main_device();
        let model = match trained {
            Some(model) => model,
            None => artifacts
                .load_model::<B>(&model_config, &infer_device)?
                .ok_or_else(|| {
                    anyhow!(
                        "no model found in {:?}, run the training first",
                        artifacts.dir()
                    )
                })?,
        };
        training::test_model(
            &training_config,
            &model,
            MnistDataset::test(&app_args.data_dir)?,
            &infer_device,
        );
    }

    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let app_args = AppArgs::parse()?;
    launch::<MainBackend, MainAutoBackend>(&app_args)
}
