//! Bridge between particle-picking workflows and the topaz picker
//!
//! This library splits annotated micrographs into the train/test manifests
//! topaz expects, drives the `topaz` executable, and converts its predicted
//! coordinates back to the resolution of the input micrographs.

pub mod box_file;
pub mod config;
pub mod conversion;
pub mod dataset;
pub mod error;
pub mod io;
pub mod manifest;
pub mod pipeline;
pub mod runner;
pub mod stream;
pub mod types;
pub mod utils;

// Re-export commonly used types and functions
pub use config::{Args, Command, PickingConfig, PreprocessConfig, TrainingConfig};
pub use conversion::{box_size, read_predictions, scale_down, scale_up};
pub use dataset::{partition, test_count, write_manifests, ManifestPaths};
pub use error::{Result, TopazError};
pub use pipeline::{import_model, run_picking, run_training};
pub use runner::{CommandRunner, TopazRunner};
pub use stream::{wait_for_micrographs, CoordinateSource, JsonCoordinateSource, PollPolicy, Sleeper};
pub use types::{Coordinate, CoordinateSet, Micrograph, SplitLabel, TopazModel};
