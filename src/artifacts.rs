//! Persistence of configurations, model parameters and optimizer state.
//!
//! Everything lives in a single artifacts directory:
//!
//! - `training_config.json`
//! - `model_config.json`
//! - `model.mpk`, the model checkpoint
//! - `optim.mpk`, the optimizer state used to resume training

use crate::backend::{MainBackend, RecorderTy};
use crate::convnet::{ConvNet, ConvNetConfig};
use crate::training::ConvNetOptimizer;
use anyhow::{Context, Result, anyhow};
use burn::record::{FileRecorder, Recorder};
use burn::{
    optim::{AdamConfig, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use std::path::{Path, PathBuf};

pub const TRAINING_CONFIG_NAME: &str = "training_config";
pub const MODEL_CONFIG_NAME: &str = "model_config";
pub const MODEL_NAME: &str = "model";
pub const OPTIM_NAME: &str = "optim";

#[derive(Debug, Clone)]
pub struct Artifacts {
    dir: PathBuf,
}

impl Artifacts {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates the directory, and with `remove_previous` deletes any previous model and optim.
    pub fn create(&self, remove_previous: bool) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {:?}", self.dir))?;
        if remove_previous {
            log::info!("removing {:?}/{{{MODEL_NAME},{OPTIM_NAME}}}", self.dir);
            for name in [MODEL_NAME, OPTIM_NAME] {
                let path = self.record_path::<RecorderTy, MainBackend>(name);
                match std::fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => {
                        return Err(err).with_context(|| format!("failed to remove {path:?}"));
                    }
                }
            }
        }
        Ok(())
    }

    fn config_path(&self, name: &str) -> PathBuf {
        self.dir.join(name).with_extension("json")
    }

    fn record_path<FR: FileRecorder<B>, B: Backend>(&self, name: &str) -> PathBuf {
        self.dir.join(name).with_extension(FR::file_extension())
    }

    pub fn save_training_config(&self, training_config: &impl Config) -> Result<()> {
        save_config(&self.config_path(TRAINING_CONFIG_NAME), training_config)
    }

    /// Loads the training config from `explicit` if given, otherwise from the artifacts directory.
    pub fn load_training_config<C: Config>(&self, explicit: Option<&Path>) -> Result<Option<C>> {
        match explicit {
            Some(path) => load_config(path).map(Some),
            None => load_config_if_exists(&self.config_path(TRAINING_CONFIG_NAME)),
        }
    }

    pub fn save_model_config(&self, model_config: &impl Config) -> Result<()> {
        save_config(&self.config_path(MODEL_CONFIG_NAME), model_config)
    }

    /// Loads the model config from `explicit` if given, otherwise from the artifacts directory.
    pub fn load_model_config<C: Config>(&self, explicit: Option<&Path>) -> Result<Option<C>> {
        match explicit {
            Some(path) => load_config(path).map(Some),
            None => load_config_if_exists(&self.config_path(MODEL_CONFIG_NAME)),
        }
    }

    pub fn save_model<B: Backend>(&self, model: &impl Module<B>) -> Result<()> {
        let path = self.dir.join(MODEL_NAME);
        log::info!(
            "Saving model to {:?}",
            self.record_path::<RecorderTy, B>(MODEL_NAME)
        );
        model
            .clone()
            .save_file(path, &RecorderTy::new()) // ext added automatically
            .map_err(|err| anyhow!("failed to save the model: {err:?}"))
    }

    /// Loads the checkpoint into a model freshly built from `model_config`.
    pub fn load_model<B: Backend>(
        &self,
        model_config: &ConvNetConfig,
        device: &B::Device,
    ) -> Result<Option<ConvNet<B>>> {
        let path_ext = self.record_path::<RecorderTy, B>(MODEL_NAME);
        if !path_ext.exists() {
            return Ok(None);
        }
        log::info!("Loading model from {path_ext:?}");
        let model = model_config
            .init::<B>(device)
            .load_file(self.dir.join(MODEL_NAME), &RecorderTy::new(), device)
            .map_err(|err| anyhow!("failed to load the model from {path_ext:?}: {err:?}"))?;
        Ok(Some(model))
    }

    pub fn load_or_save_model<B: Backend>(
        &self,
        model_config: &ConvNetConfig,
        device: &B::Device,
    ) -> Result<ConvNet<B>> {
        match self.load_model::<B>(model_config, device)? {
            Some(model) => Ok(model),
            None => {
                log::info!("Initializing new model");
                let model = model_config.init::<B>(device);
                self.save_model::<B>(&model)?;
                Ok(model)
            }
        }
    }

    pub fn save_optim<AutoB: AutodiffBackend>(
        &self,
        optim: &impl Optimizer<ConvNet<AutoB>, AutoB>,
    ) -> Result<()> {
        log::info!(
            "Saving optim to {:?}",
            self.record_path::<RecorderTy, AutoB>(OPTIM_NAME)
        );
        let record = optim.to_record();
        let path = self.dir.join(OPTIM_NAME);
        <RecorderTy as Recorder<AutoB>>::record(&RecorderTy::new(), record, path) // ext added automatically
            .map_err(|err| anyhow!("failed to save the optim: {err:?}"))
    }

    /// Restores the optimizer state (Adam moments and step counts) saved by a previous run.
    pub fn load_optim<AutoB: AutodiffBackend>(
        &self,
        optim_config: &AdamConfig,
        device: &AutoB::Device,
    ) -> Result<Option<ConvNetOptimizer<AutoB>>> {
        let path_ext = self.record_path::<RecorderTy, AutoB>(OPTIM_NAME);
        if !path_ext.exists() {
            return Ok(None);
        }
        log::info!("Loading optim from {path_ext:?}");
        let record = <RecorderTy as Recorder<AutoB>>::load(
            &RecorderTy::new(),
            self.dir.join(OPTIM_NAME),
            device,
        )
        .map_err(|err| anyhow!("failed to load the optim from {path_ext:?}: {err:?}"))?;
        let optim: ConvNetOptimizer<AutoB> = optim_config.init();
        Ok(Some(optim.load_record(record)))
    }

    pub fn load_or_save_optim<AutoB: AutodiffBackend>(
        &self,
        optim_config: &AdamConfig,
        device: &AutoB::Device,
    ) -> Result<ConvNetOptimizer<AutoB>> {
        match self.load_optim::<AutoB>(optim_config, device)? {
            Some(optim) => Ok(optim),
            None => {
                log::info!("Initializing new optim");
                let optim: ConvNetOptimizer<AutoB> = optim_config.init();
                self.save_optim::<AutoB>(&optim)?;
                Ok(optim)
            }
        }
    }
}

pub fn save_config(path: &Path, config: &impl Config) -> Result<()> {
    log::info!("Saving config into {path:?}");
    config
        .save(path)
        .with_context(|| format!("failed to save the config into {path:?}"))
}

pub fn load_config<C: Config>(path: &Path) -> Result<C> {
    log::info!("Loading config from {path:?}");
    C::load(path).map_err(|err| anyhow!("failed to load the config from {path:?}: {err:?}"))
}

fn load_config_if_exists<C: Config>(path: &Path) -> Result<Option<C>> {
    if path.exists() {
        load_config(path).map(Some)
    } else {
        Ok(None)
    }
}
