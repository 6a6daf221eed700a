//! Building and running `topaz` command lines.

use log::info;
use std::path::Path;
use std::process::Command;

use crate::config::{DenoiseConfig, PickingConfig, PreprocessConfig, TrainingConfig};
use crate::error::{Result, TopazError};

pub const V0_2_3: &str = "0.2.3";
pub const V0_2_4: &str = "0.2.4";
pub const V0_2_5: &str = "0.2.5";
pub const V0_3_7: &str = "0.3.7";
pub const VERSIONS: &[&str] = &[V0_2_3, V0_2_4, V0_2_5, V0_3_7];
pub const TOPAZ_DEFAULT_VERSION: &str = V0_3_7;

pub const DEFAULT_ACTIVATION_CMD: &str = "conda activate topaz-0.3.7";

/// Replaced with the configured device when the command runs
pub const GPU_PLACEHOLDER: &str = "%(GPU)s";

pub fn env_name(version: &str) -> String {
    format!("topaz-{}", version)
}

/// Executes `topaz <subcommand> <args>`
pub trait CommandRunner {
    fn run(&self, subcommand: &str, args: &str) -> Result<()>;
}

/// Runs topaz through `sh -c`, after activating its conda environment
pub struct TopazRunner {
    activation: String,
    gpu: String,
    program: String,
}

impl TopazRunner {
    pub fn new(activation: impl Into<String>, gpu: impl Into<String>) -> Self {
        Self {
            activation: activation.into(),
            gpu: gpu.into(),
            program: "topaz".to_string(),
        }
    }

    pub fn from_config(config: &PreprocessConfig) -> Self {
        Self::new(config.activation.clone(), config.gpu.clone())
    }

    /// Full shell line for a subcommand
    pub fn command_line(&self, subcommand: &str, args: &str) -> String {
        let args = args.replace(GPU_PLACEHOLDER, &self.gpu);
        let activation = self.activation.trim();
        if activation.is_empty() {
            format!("{} {} {}", self.program, subcommand, args.trim())
        } else {
            format!("{} && {} {} {}", activation, self.program, subcommand, args.trim())
        }
    }
}

impl CommandRunner for TopazRunner {
    fn run(&self, subcommand: &str, args: &str) -> Result<()> {
        let line = self.command_line(subcommand, args);
        info!("Running: {}", line);

        let mut command = Command::new("sh");
        command.arg("-c").arg(&line);
        // A host PYTHONPATH breaks the topaz conda environment
        command.env_remove("PYTHONPATH");

        let status = command.status()?;
        if !status.success() {
            return Err(TopazError::CommandFailed {
                command: subcommand.to_string(),
                code: status.code(),
            });
        }
        Ok(())
    }
}

pub fn denoise_args(input_dir: &Path, output_dir: &Path, denoise: &DenoiseConfig) -> String {
    let mut args = format!(
        "{}/*.mrc -o {}/ --model {} --device {}",
        input_dir.display(),
        output_dir.display(),
        denoise.model.topaz_name(),
        GPU_PLACEHOLDER
    );
    if let Some(patch_size) = denoise.patch_size {
        args.push_str(&format!(" --patch-size {}", patch_size));
    }
    match &denoise.extra {
        Some(extra) => {
            args.push(' ');
            args.push_str(extra);
        }
        None => args.push_str(" --normalize"),
    }
    args
}

pub fn preprocess_args(input_dir: &Path, output_dir: &Path, config: &PreprocessConfig) -> String {
    let mut args = format!(
        "{}/*.mrc -o {}/ --scale {} --num-workers {} --device {}",
        input_dir.display(),
        output_dir.display(),
        config.scale,
        config.threads,
        GPU_PLACEHOLDER
    );
    if let Some(extra) = &config.extra {
        args.push(' ');
        args.push_str(extra);
    }
    args
}

/// Manifests and output folder `topaz train` works with
pub struct TrainInputs<'a> {
    pub train_images: &'a Path,
    pub train_targets: &'a Path,
    pub test_images: &'a Path,
    pub test_targets: &'a Path,
    pub model_dir: &'a Path,
}

pub fn train_args(config: &TrainingConfig, inputs: &TrainInputs<'_>) -> String {
    let mut args = format!("--radius {}", config.radius);
    args.push_str(&format!(" --autoencoder {:.6}", config.autoencoder));
    args.push_str(&format!(" --num-epochs {}", config.num_epochs));
    args.push_str(&format!(" --model {}", config.model.topaz_arg()));
    args.push_str(&format!(" --method {}", config.method.topaz_name()));
    args.push_str(&format!(" --num-particles {}", config.num_particles));
    args.push_str(&format!(" --train-images {}", inputs.train_images.display()));
    args.push_str(&format!(" --train-targets {}", inputs.train_targets.display()));
    args.push_str(&format!(" --test-images {}", inputs.test_images.display()));
    args.push_str(&format!(" --test-targets {}", inputs.test_targets.display()));
    args.push_str(&format!(" --num-workers {}", config.preprocess.threads));
    args.push_str(&format!(" --device {}", GPU_PLACEHOLDER));
    args.push_str(&format!(" --save-prefix {}/model", inputs.model_dir.display()));
    args.push_str(&format!(" -o {}/model_training.txt", inputs.model_dir.display()));
    if let Some(extra) = &config.extra {
        args.push(' ');
        args.push_str(extra);
    }
    args
}

pub fn extract_args(config: &PickingConfig, coordinates_file: &Path, preprocessed_dir: &Path) -> String {
    format!(
        "-t {} -r {} -m {} -o {} --num-workers {} --device {} {}/*.mrc",
        config.threshold,
        config.radius,
        config.model.topaz_arg(),
        coordinates_file.display(),
        config.preprocess.threads,
        GPU_PLACEHOLDER,
        preprocessed_dir.display()
    )
}
