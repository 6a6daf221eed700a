use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, TopazError};
use crate::runner::DEFAULT_ACTIVATION_CMD;
use crate::stream::PollPolicy;
use crate::types::TopazModel;
use crate::utils::read_json;

/// Drive the topaz particle picker: split training data, train, pick and
/// convert coordinates to and from topaz's TSV files.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Split annotated micrographs into train/test manifests
    Split(SplitArgs),
    /// Train a topaz model from annotated micrographs
    Train(TrainArgs),
    /// Pick particles on micrographs with a topaz model
    Pick(PickArgs),
    /// Register an existing topaz model file
    ImportModel(ImportArgs),
    /// Convert a topaz predictions file into a coordinate set
    ReadPredictions(ReadPredictionsArgs),
    /// Write coordinates as EMAN box files for crYOLO
    ExportBoxes(ExportBoxesArgs),
}

/// Options shared by every step that calls the topaz executable
#[derive(ClapArgs, Debug, Clone)]
pub struct PreprocessArgs {
    /// Downsampling factor; aim for a resulting pixel size of about 8 Å
    #[arg(long = "scale", default_value_t = 4, value_parser = validate_positive)]
    pub scale: u32,

    /// Denoise micrographs before preprocessing
    #[arg(long = "denoise")]
    pub denoise: bool,

    /// Denoising model
    #[arg(long = "denoise_model", value_enum, default_value = "unet")]
    pub denoise_model: DenoiseModel,

    /// Denoise in patches of this size (useful when a micrograph does not fit on the GPU)
    #[arg(long = "patch_size")]
    pub patch_size: Option<u32>,

    /// Extra command line options for `topaz denoise`
    #[arg(long = "denoise_extra", allow_hyphen_values = true)]
    pub denoise_extra: Option<String>,

    /// Extra command line options for `topaz preprocess`
    #[arg(long = "preprocess_extra", allow_hyphen_values = true)]
    pub preprocess_extra: Option<String>,

    /// GPU device passed to topaz
    #[arg(long = "gpu", default_value = "0")]
    pub gpu: String,

    /// Worker threads passed to topaz
    #[arg(long = "threads", default_value_t = 1, value_parser = validate_positive)]
    pub threads: u32,

    /// Shell command that activates the topaz environment
    #[arg(long = "activation", env = "TOPAZ_ENV_ACTIVATION", default_value = DEFAULT_ACTIVATION_CMD)]
    pub activation: String,
}

/// Options controlling how long to wait for a growing coordinate set
#[derive(ClapArgs, Debug, Clone)]
pub struct StreamArgs {
    /// Seconds between checks of the input coordinates
    #[arg(long = "poll_interval", default_value_t = 10, value_parser = validate_positive_secs)]
    pub poll_interval: u64,

    /// Give up after waiting this many seconds
    #[arg(long = "max_wait")]
    pub max_wait: Option<u64>,
}

impl StreamArgs {
    pub fn to_poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(self.poll_interval),
            max_wait: self.max_wait.map(Duration::from_secs),
        }
    }
}

#[derive(ClapArgs, Debug, Clone)]
pub struct SplitArgs {
    /// Coordinate set JSON document
    #[arg(short = 'c', long = "coordinates")]
    pub coordinates: PathBuf,

    /// Directory receiving the manifests
    #[arg(short = 'o', long = "output_dir")]
    pub output_dir: PathBuf,

    /// Number of micrographs to split
    #[arg(long = "mics", default_value_t = 5)]
    pub mics: usize,

    /// Percentage of micrographs held out for testing
    #[arg(long = "test_percent", default_value_t = 5.0, value_parser = validate_percent)]
    pub test_percent: f64,

    /// Downsampling factor applied to coordinates
    #[arg(long = "scale", default_value_t = 4, value_parser = validate_positive)]
    pub scale: u32,

    /// Seed for the train/test shuffle
    #[arg(long = "seed")]
    pub seed: Option<u64>,

    #[command(flatten)]
    pub stream: StreamArgs,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct TrainArgs {
    /// Coordinate set JSON document used for training
    #[arg(short = 'c', long = "coordinates")]
    pub coordinates: PathBuf,

    /// Working directory for this run
    #[arg(short = 'w', long = "work_dir")]
    pub work_dir: PathBuf,

    /// Micrographs to wait for; they are divided into training and test data
    #[arg(long = "mics", default_value_t = 5)]
    pub mics_for_training: usize,

    /// Percentage of micrographs held out for testing
    #[arg(long = "test_percent", default_value_t = 5.0, value_parser = validate_percent)]
    pub test_percent: f64,

    /// Seed for the train/test shuffle
    #[arg(long = "seed")]
    pub seed: Option<u64>,

    /// CNN architecture for a new model
    #[arg(long = "model", value_enum, default_value = "resnet8")]
    pub model: CnnModel,

    /// Model record of a previous training to continue from
    #[arg(long = "prev_model", conflicts_with = "model")]
    pub prev_model: Option<PathBuf>,

    /// Pixel radius around particle centers to consider
    #[arg(long = "radius", default_value_t = 3, value_parser = validate_positive)]
    pub radius: u32,

    /// Weight of the autoencoder reconstruction error
    #[arg(long = "autoencoder", default_value_t = 0.0)]
    pub autoencoder: f64,

    /// Number of training epochs
    #[arg(long = "epochs", default_value_t = 10, value_parser = validate_positive)]
    pub num_epochs: u32,

    /// Objective used to learn the region classifier
    #[arg(long = "method", value_enum, default_value = "ge-binomial")]
    pub method: TrainMethod,

    /// Expected number of particles per micrograph
    #[arg(long = "num_particles", default_value_t = 300)]
    pub num_particles: u32,

    /// Extra command line options for `topaz train`
    #[arg(long = "train_extra", allow_hyphen_values = true)]
    pub train_extra: Option<String>,

    #[command(flatten)]
    pub preprocess: PreprocessArgs,

    #[command(flatten)]
    pub stream: StreamArgs,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct PickArgs {
    /// Micrograph set JSON document
    #[arg(short = 'm', long = "micrographs")]
    pub micrographs: PathBuf,

    /// Working directory for this run
    #[arg(short = 'w', long = "work_dir")]
    pub work_dir: PathBuf,

    /// Where to write the picked coordinate set
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,

    /// Model record produced by training or import
    #[arg(long = "model", required_unless_present = "general_model")]
    pub model: Option<PathBuf>,

    /// Pretrained general model shipped with topaz
    #[arg(long = "general_model", value_enum, conflicts_with = "model")]
    pub general_model: Option<GeneralModel>,

    /// Pixel radius around particle centers to consider
    #[arg(long = "radius", default_value_t = 8, value_parser = validate_positive)]
    pub radius: u32,

    /// Box size in pixels; defaults to radius * 2 * scale
    #[arg(long = "box_size")]
    pub box_size: Option<u32>,

    /// Log-likelihood threshold at which region extraction stops; -6 is p >= 0.0025
    #[arg(long = "threshold", default_value_t = -6.0, allow_hyphen_values = true)]
    pub threshold: f64,

    /// Micrographs handed to topaz per batch
    #[arg(long = "batch_size", default_value_t = 32)]
    pub batch_size: usize,

    #[command(flatten)]
    pub preprocess: PreprocessArgs,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ImportArgs {
    /// Path of an existing topaz model (.sav)
    #[arg(long = "model_path")]
    pub model_path: PathBuf,

    /// Directory the model is registered in
    #[arg(short = 'o', long = "output_dir")]
    pub output_dir: PathBuf,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ReadPredictionsArgs {
    /// TSV file written by `topaz extract`
    #[arg(short = 'p', long = "predictions")]
    pub predictions: PathBuf,

    /// Micrograph set JSON document the predictions refer to
    #[arg(short = 'm', long = "micrographs")]
    pub micrographs: PathBuf,

    /// Where to write the coordinate set
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,

    #[arg(long = "scale", default_value_t = 4, value_parser = validate_positive)]
    pub scale: u32,

    #[arg(long = "radius", default_value_t = 8, value_parser = validate_positive)]
    pub radius: u32,

    #[arg(long = "box_size")]
    pub box_size: Option<u32>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ExportBoxesArgs {
    /// Coordinate set JSON document
    #[arg(short = 'c', long = "coordinates")]
    pub coordinates: PathBuf,

    /// Directory receiving one .box file per micrograph
    #[arg(short = 'o', long = "output_dir")]
    pub output_dir: PathBuf,

    /// Box size in pixels; defaults to the one stored in the coordinate set
    #[arg(long = "box_size")]
    pub box_size: Option<u32>,

    /// Flip Y using each micrograph's height
    #[arg(long = "flip_on_y")]
    pub flip_on_y: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum DenoiseModel {
    Unet,
    UnetSmall,
    Fcnn,
    Affineresnet8,
}

impl DenoiseModel {
    pub fn topaz_name(self) -> &'static str {
        match self {
            DenoiseModel::Unet => "unet",
            DenoiseModel::UnetSmall => "unet-small",
            DenoiseModel::Fcnn => "fcnn",
            DenoiseModel::Affineresnet8 => "affineresnet8",
        }
    }
}

// CNN architectures topaz can fit from scratch
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CnnModel {
    Resnet8,
    Resnet16,
    Conv31,
    Conv63,
    Conv127,
}

impl CnnModel {
    pub fn topaz_name(self) -> &'static str {
        match self {
            CnnModel::Resnet8 => "resnet8",
            CnnModel::Resnet16 => "resnet16",
            CnnModel::Conv31 => "conv31",
            CnnModel::Conv63 => "conv63",
            CnnModel::Conv127 => "conv127",
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum TrainMethod {
    Pn,
    GeKl,
    GeBinomial,
    Pu,
}

impl TrainMethod {
    pub fn topaz_name(self) -> &'static str {
        match self {
            TrainMethod::Pn => "PN",
            TrainMethod::GeKl => "GE-KL",
            TrainMethod::GeBinomial => "GE-binomial",
            TrainMethod::Pu => "PU",
        }
    }
}

// Pretrained models distributed with topaz
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum GeneralModel {
    #[value(name = "resnet16_u64")]
    Resnet16U64,
    #[value(name = "resnet16_u32")]
    Resnet16U32,
    #[value(name = "resnet8_u64")]
    Resnet8U64,
    #[value(name = "resnet8_u32")]
    Resnet8U32,
}

impl GeneralModel {
    pub fn topaz_name(self) -> &'static str {
        match self {
            GeneralModel::Resnet16U64 => "resnet16_u64",
            GeneralModel::Resnet16U32 => "resnet16_u32",
            GeneralModel::Resnet8U64 => "resnet8_u64",
            GeneralModel::Resnet8U32 => "resnet8_u32",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DenoiseConfig {
    pub model: DenoiseModel,
    pub patch_size: Option<u32>,
    pub extra: Option<String>,
}

/// Settings for the denoise and preprocess steps, resolved once per run
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessConfig {
    pub scale: u32,
    pub threads: u32,
    pub gpu: String,
    pub denoise: Option<DenoiseConfig>,
    pub extra: Option<String>,
    pub activation: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrainModelSource {
    New(CnnModel),
    Previous(TopazModel),
}

impl TrainModelSource {
    /// Value of `--model` for `topaz train`
    pub fn topaz_arg(&self) -> String {
        match self {
            TrainModelSource::New(model) => model.topaz_name().to_string(),
            TrainModelSource::Previous(model) => model.path().display().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub preprocess: PreprocessConfig,
    pub mics_for_training: usize,
    pub test_percent: f64,
    pub seed: Option<u64>,
    pub poll: PollPolicy,
    pub model: TrainModelSource,
    pub radius: u32,
    pub autoencoder: f64,
    pub num_epochs: u32,
    pub method: TrainMethod,
    pub num_particles: u32,
    pub extra: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PickModelSource {
    Trained(TopazModel),
    General(GeneralModel),
}

impl PickModelSource {
    /// Value of `-m` for `topaz extract`
    pub fn topaz_arg(&self) -> String {
        match self {
            PickModelSource::Trained(model) => model.path().display().to_string(),
            PickModelSource::General(model) => model.topaz_name().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PickingConfig {
    pub preprocess: PreprocessConfig,
    pub model: PickModelSource,
    pub radius: u32,
    pub box_size: Option<u32>,
    pub threshold: f64,
    pub batch_size: usize,
}

impl PreprocessArgs {
    pub fn to_preprocess_config(&self) -> PreprocessConfig {
        PreprocessConfig {
            scale: self.scale,
            threads: self.threads,
            gpu: self.gpu.clone(),
            denoise: self.denoise.then(|| DenoiseConfig {
                model: self.denoise_model,
                patch_size: self.patch_size.filter(|size| *size > 0),
                extra: non_empty(&self.denoise_extra),
            }),
            extra: non_empty(&self.preprocess_extra),
            activation: self.activation.clone(),
        }
    }
}

impl TrainArgs {
    pub fn to_training_config(&self) -> Result<TrainingConfig> {
        if self.mics_for_training < 2 {
            return Err(TopazError::InvalidConfig(
                "training needs at least 2 micrographs".to_string(),
            ));
        }
        let model = match &self.prev_model {
            Some(record) => TrainModelSource::Previous(load_model_record(record)?),
            None => TrainModelSource::New(self.model),
        };

        Ok(TrainingConfig {
            preprocess: self.preprocess.to_preprocess_config(),
            mics_for_training: self.mics_for_training,
            test_percent: self.test_percent,
            seed: self.seed,
            poll: self.stream.to_poll_policy(),
            model,
            radius: self.radius,
            autoencoder: self.autoencoder,
            num_epochs: self.num_epochs,
            method: self.method,
            num_particles: self.num_particles,
            extra: non_empty(&self.train_extra),
        })
    }
}

impl PickArgs {
    pub fn to_picking_config(&self) -> Result<PickingConfig> {
        if self.batch_size == 0 {
            return Err(TopazError::InvalidConfig(
                "batch size must be positive".to_string(),
            ));
        }
        let model = match (&self.model, self.general_model) {
            (Some(record), _) => PickModelSource::Trained(load_model_record(record)?),
            (None, Some(general)) => PickModelSource::General(general),
            (None, None) => {
                return Err(TopazError::InvalidConfig(
                    "a trained model or a general model is required".to_string(),
                ))
            }
        };

        Ok(PickingConfig {
            preprocess: self.preprocess.to_preprocess_config(),
            model,
            radius: self.radius,
            box_size: self.box_size,
            threshold: self.threshold,
            batch_size: self.batch_size,
        })
    }
}

/// Load a model record and check the model file it names is still there
pub fn load_model_record(path: &Path) -> Result<TopazModel> {
    let model: TopazModel = read_json(path)?;
    if !model.path().exists() {
        return Err(TopazError::InvalidConfig(format!(
            "model not ready: {} does not exist",
            model.path().display()
        )));
    }
    Ok(model)
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// Validate that the percentage is between 0 and 100
fn validate_percent(s: &str) -> std::result::Result<f64, String> {
    match f64::from_str(s) {
        Ok(val) if (0.0..=100.0).contains(&val) => Ok(val),
        _ => Err("PERCENT must be between 0 and 100".to_string()),
    }
}

fn validate_positive(s: &str) -> std::result::Result<u32, String> {
    match u32::from_str(s) {
        Ok(val) if val > 0 => Ok(val),
        _ => Err("value must be a positive integer".to_string()),
    }
}

fn validate_positive_secs(s: &str) -> std::result::Result<u64, String> {
    match u64::from_str(s) {
        Ok(val) if val > 0 => Ok(val),
        _ => Err("interval must be a positive number of seconds".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_percent() {
        assert!(validate_percent("5").is_ok());
        assert!(validate_percent("100").is_ok());
        assert!(validate_percent("0").is_ok());
        assert!(validate_percent("-1").is_err());
        assert!(validate_percent("100.5").is_err());
        assert!(validate_percent("abc").is_err());
    }

    #[test]
    fn test_validate_positive() {
        assert_eq!(validate_positive("4"), Ok(4));
        assert!(validate_positive("0").is_err());
        assert!(validate_positive("-2").is_err());
    }

    #[test]
    fn test_zero_poll_interval_is_rejected() {
        let result = Args::try_parse_from([
            "topaz-bridge",
            "split",
            "-c",
            "coords.json",
            "-o",
            "out",
            "--poll_interval",
            "0",
        ]);
        assert!(result.is_err());
        assert_eq!(validate_positive_secs("30"), Ok(30));
    }

    #[test]
    fn test_parse_pick_with_general_model() {
        let args = Args::try_parse_from([
            "topaz-bridge",
            "pick",
            "-m",
            "mics.json",
            "-w",
            "work",
            "-o",
            "out.json",
            "--general_model",
            "resnet8_u32",
            "--threshold",
            "-3",
        ])
        .unwrap();

        match args.command {
            Command::Pick(pick) => {
                let config = pick.to_picking_config().unwrap();
                assert_eq!(config.model, PickModelSource::General(GeneralModel::Resnet8U32));
                assert_eq!(config.threshold, -3.0);
                assert_eq!(config.batch_size, 32);
                assert_eq!(config.preprocess.scale, 4);
                assert!(config.preprocess.denoise.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_pick_requires_a_model() {
        let result = Args::try_parse_from([
            "topaz-bridge",
            "pick",
            "-m",
            "mics.json",
            "-w",
            "work",
            "-o",
            "out.json",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_extra_options_are_dropped() {
        let args = Args::try_parse_from([
            "topaz-bridge",
            "train",
            "-c",
            "coords.json",
            "-w",
            "work",
            "--denoise",
            "--patch_size",
            "0",
            "--denoise_extra",
            " ",
        ])
        .unwrap();

        match args.command {
            Command::Train(train) => {
                let config = train.to_training_config().unwrap();
                let denoise = config.preprocess.denoise.unwrap();
                assert_eq!(denoise.model, DenoiseModel::Unet);
                assert_eq!(denoise.patch_size, None);
                assert_eq!(denoise.extra, None);
                assert_eq!(config.method, TrainMethod::GeBinomial);
                assert_eq!(config.model, TrainModelSource::New(CnnModel::Resnet8));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
