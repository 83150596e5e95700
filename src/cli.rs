use anyhow::{Result, bail};
use std::ffi::OsString;
use std::path::PathBuf;

pub const HELP: &str = "\
MNIST ConvNet

Trains a two-layer convolutional network on MNIST and reports its accuracy on the test images.
Models, optimizers, and configurations are persisted in an artifacts directory.

USAGE:
    mnist-convnet [OPTIONS]

When neither --training nor --evaluation is provided, both run: training, then evaluation.

BEHAVIOR OVERVIEW
- The program manages two configurations: training config and model config.
- If --training-config or --model-config is given, the corresponding config is loaded from the specified file and saved to the artifacts directory (overwriting any existing file).
- If no explicit config file is provided for a component, the program attempts to load it from the artifacts directory; if absent, a default configuration is created and saved.
- With --remove-artifacts, any existing model and optimizer files in the artifacts directory are deleted before training (if training runs).
- Model and optimizer weights are loaded from the artifacts directory if present (training resumes from them); otherwise new ones are created and saved.
- The MNIST files are downloaded into the data directory when missing.

FLAGS:
    -h, --help                  Show this help message and exit

OPTIONS:
    -t, --training              Run training (creates or updates model / optimizer)
    -e, --evaluation            Evaluate the model on the test images, after training if both flags are used
    -r, --remove-artifacts      Delete existing model and optimizer files from the artifacts directory before training
    -c, --training-config <PATH>
                                Load training configuration from this file (overrides any config in artifacts directory)
    -m, --model-config <PATH>   Load model configuration from this file (overrides any config in artifacts directory)
    -a, --artifacts-path <PATH>
                                Directory where configurations, model weights, and optimizer state are saved and loaded.
                                Created if missing. Defaults to `artifacts`.
    -d, --data-dir <PATH>       Directory holding the MNIST files. Defaults to `data`.
";

pub const DEFAULT_ARTIFACTS_PATH: &str = "artifacts";
pub const DEFAULT_DATA_DIR: &str = "data";

#[derive(Debug, Clone, PartialEq)]
pub struct AppArgs {
    training: bool,
    evaluation: bool,
    pub remove_artifacts: bool,
    pub training_config: Option<PathBuf>,
    pub model_config: Option<PathBuf>,
    pub artifacts_path: PathBuf,
    pub data_dir: PathBuf,
}

impl AppArgs {
    /// Parses the process arguments, printing the help and exiting on `--help`.
    pub fn parse() -> Result<Self> {
        let mut pargs = pico_args::Arguments::from_env();

        // Help has a higher priority and should be handled separately.
        if pargs.contains(["-h", "--help"]) {
            println!("{}", HELP);
            std::process::exit(0);
        }

        Self::from_arguments(pargs)
    }

    pub fn parse_from(args: Vec<OsString>) -> Result<Self> {
        Self::from_arguments(pico_args::Arguments::from_vec(args))
    }

    fn from_arguments(mut pargs: pico_args::Arguments) -> Result<Self> {
        let args = AppArgs {
            training_config: pargs
                .opt_value_from_os_str(["-c", "--training-config"], parse_path)?,
            model_config: pargs.opt_value_from_os_str(["-m", "--model-config"], parse_path)?,
            artifacts_path: pargs
                .opt_value_from_os_str(["-a", "--artifacts-path"], parse_path)?
                .unwrap_or_else(|| DEFAULT_ARTIFACTS_PATH.into()),
            data_dir: pargs
                .opt_value_from_os_str(["-d", "--data-dir"], parse_path)?
                .unwrap_or_else(|| DEFAULT_DATA_DIR.into()),
            // must parse flags after values
            training: pargs.contains(["-t", "--training"]),
            evaluation: pargs.contains(["-e", "--evaluation"]),
            remove_artifacts: pargs.contains(["-r", "--remove-artifacts"]),
        };

        let remaining = pargs.finish();
        if !remaining.is_empty() {
            bail!("unused arguments: {remaining:?}");
        }

        Ok(args)
    }

    /// Whether training runs. True when no stage was selected.
    pub fn training(&self) -> bool {
        self.training || !self.evaluation
    }

    /// Whether evaluation runs. True when no stage was selected.
    pub fn evaluation(&self) -> bool {
        self.evaluation || !self.training
    }
}

fn parse_path(s: &std::ffi::OsStr) -> Result<PathBuf, &'static str> {
    Ok(s.into())
}
