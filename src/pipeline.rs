//! Training, picking and model import runs.

use log::info;
use std::fs;
use std::path::Path;

use crate::config::{PickingConfig, PreprocessConfig, TrainingConfig};
use crate::conversion::{box_size, read_predictions};
use crate::dataset::{partition, write_manifests, ManifestPaths, ManifestSummary};
use crate::error::{Result, TopazError};
use crate::io::{
    last_epoch_model, link_micrographs, setup_picking_directories, setup_training_directories,
    PickingPaths, TrainingPaths,
};
use crate::runner::{denoise_args, extract_args, preprocess_args, train_args, CommandRunner, TrainInputs};
use crate::stream::{wait_for_micrographs, CoordinateSource, PollPolicy, Sleeper};
use crate::types::{
    build_micrograph_index, Coordinate, CoordinateSet, Micrograph, ReadStats, SplitAssignment,
    TopazModel,
};
use crate::utils::{create_abs_link, ensure_directory, write_json};

/// Micrographs picked for a split together with their labels
pub struct PreparedSplit {
    pub set: CoordinateSet,
    pub assignment: SplitAssignment,
}

impl PreparedSplit {
    /// The split micrographs, in split order
    pub fn micrographs(&self) -> Result<Vec<&Micrograph>> {
        let by_id = self.set.micrographs_by_id();
        self.assignment
            .labels
            .iter()
            .map(|(mic_id, _)| {
                by_id.get(mic_id).copied().ok_or_else(|| {
                    TopazError::InsufficientData(format!(
                        "micrograph {} has coordinates but is missing from the set",
                        mic_id
                    ))
                })
            })
            .collect()
    }
}

/// Wait until `minimum` micrographs carry coordinates, then split them
pub fn prepare_split<S, Z>(
    source: &S,
    minimum: usize,
    test_percent: f64,
    seed: Option<u64>,
    poll: &PollPolicy,
    sleeper: &Z,
) -> Result<PreparedSplit>
where
    S: CoordinateSource + ?Sized,
    Z: Sleeper + ?Sized,
{
    let (set, ids) = wait_for_micrographs(source, minimum, poll, sleeper)?;
    let assignment = partition(&ids, test_percent, seed)?;
    Ok(PreparedSplit { set, assignment })
}

/// Link the split micrographs into `output_dir` as `<name>.mrc` and write
/// the train/test manifests pointing at those links
pub fn write_split(split: &PreparedSplit, output_dir: &Path, scale: u32) -> Result<ManifestSummary> {
    ensure_directory(output_dir)?;
    link_micrographs(&split.micrographs()?, output_dir)?;
    let paths = ManifestPaths {
        images: [
            output_dir.join("image_list_train.txt"),
            output_dir.join("image_list_test.txt"),
        ],
        particles: [
            output_dir.join("particles_train.txt"),
            output_dir.join("particles_test.txt"),
        ],
    };
    write_manifests(
        &split.assignment,
        &split.set.coordinates,
        |mic_id| crate::dataset::micrograph_file(output_dir, mic_id),
        &paths,
        scale,
    )
}

/// Denoise (when enabled) and preprocess the micrographs in `input_dir`
fn preprocess_micrographs<R: CommandRunner + ?Sized>(
    runner: &R,
    config: &PreprocessConfig,
    input_dir: &Path,
    denoise_dir: &Path,
    preprocess_dir: &Path,
) -> Result<()> {
    let mut working_dir = input_dir;
    if let Some(denoise) = &config.denoise {
        runner.run("denoise", &denoise_args(working_dir, denoise_dir, denoise))?;
        working_dir = denoise_dir;
    }
    runner.run("preprocess", &preprocess_args(working_dir, preprocess_dir, config))
}

/// Train a topaz model on the coordinates from `source`.
///
/// Blocks until the source has enough annotated micrographs, splits them,
/// runs denoise/preprocess/train and registers the last saved epoch.
pub fn run_training<S, R, Z>(
    config: &TrainingConfig,
    work_dir: &Path,
    source: &S,
    runner: &R,
    sleeper: &Z,
) -> Result<TopazModel>
where
    S: CoordinateSource + ?Sized,
    R: CommandRunner + ?Sized,
    Z: Sleeper + ?Sized,
{
    let split = prepare_split(
        source,
        config.mics_for_training,
        config.test_percent,
        config.seed,
        &config.poll,
        sleeper,
    )?;

    let paths = TrainingPaths::new(work_dir);
    setup_training_directories(&paths, config.preprocess.denoise.is_some())?;

    link_micrographs(&split.micrographs()?, &paths.training_dir)?;
    write_manifests(
        &split.assignment,
        &split.set.coordinates,
        |mic_id| paths.preprocessed_micrograph(mic_id),
        &paths.manifest_paths(),
        config.preprocess.scale,
    )?;

    preprocess_micrographs(
        runner,
        &config.preprocess,
        &paths.training_dir,
        &paths.denoise_dir,
        &paths.preprocess_dir,
    )?;

    let inputs = TrainInputs {
        train_images: &paths.train_images,
        train_targets: &paths.train_particles,
        test_images: &paths.test_images,
        test_targets: &paths.test_particles,
        model_dir: &paths.model_dir,
    };
    runner.run("train", &train_args(config, &inputs))?;

    let model = TopazModel::new(last_epoch_model(&paths.model_dir)?);
    write_json(&paths.model_record, &model)?;
    info!("Training finished: {}", model);
    Ok(model)
}

/// Pick one batch of micrographs and read back its coordinates
pub fn pick_batch<R: CommandRunner + ?Sized>(
    config: &PickingConfig,
    work_dir: &Path,
    batch: &[&Micrograph],
    all_micrographs: &[Micrograph],
    runner: &R,
) -> Result<(Vec<Coordinate>, ReadStats)> {
    let (first, last) = match (batch.first(), batch.last()) {
        (Some(first), Some(last)) => (first.id, last.id),
        _ => return Ok((Vec::new(), ReadStats::default())),
    };
    let paths = PickingPaths::new(work_dir, first, last);
    setup_picking_directories(&paths, config.preprocess.denoise.is_some())?;

    link_micrographs(batch, &paths.picking_dir)?;
    preprocess_micrographs(
        runner,
        &config.preprocess,
        &paths.picking_dir,
        &paths.denoise_dir,
        &paths.preprocess_dir,
    )?;
    runner.run(
        "extract",
        &extract_args(config, &paths.coordinates_file, &paths.preprocess_dir),
    )?;

    let index = build_micrograph_index(all_micrographs);
    read_predictions(&paths.coordinates_file, &index, config.preprocess.scale)
}

/// Pick particles on every micrograph, `batch_size` at a time
pub fn run_picking<R: CommandRunner + ?Sized>(
    config: &PickingConfig,
    work_dir: &Path,
    micrographs: &[Micrograph],
    runner: &R,
) -> Result<CoordinateSet> {
    let size = box_size(config.radius, config.preprocess.scale, config.box_size)?;
    let mut coordinates = Vec::new();
    let mut stats = ReadStats::default();

    let all: Vec<&Micrograph> = micrographs.iter().collect();
    for batch in all.chunks(config.batch_size.max(1)) {
        info!(
            "Picking micrographs {}-{}",
            batch[0].name(),
            batch[batch.len() - 1].name()
        );
        let (batch_coordinates, batch_stats) =
            pick_batch(config, work_dir, batch, micrographs, runner)?;
        coordinates.extend(batch_coordinates);
        stats.merge(&batch_stats);
    }
    stats.print_summary();

    Ok(CoordinateSet {
        micrographs: micrographs.to_vec(),
        coordinates,
        box_size: Some(size),
        stream_closed: true,
    })
}

/// Register an existing model file: link it into `output_dir` and write
/// a model record (`model.json`) next to it
pub fn import_model(model_path: &Path, output_dir: &Path) -> Result<TopazModel> {
    let abs_path = fs::canonicalize(model_path)?;
    let file_name = abs_path
        .file_name()
        .ok_or_else(|| TopazError::InvalidConfig(format!("{} is not a file", abs_path.display())))?;
    ensure_directory(output_dir)?;
    let output_path = output_dir.join(file_name);

    info!(
        "Creating link:\n{} -> {}",
        output_path.display(),
        abs_path.display()
    );
    info!(
        "NOTE: if the project moves to another computer the link will break; \
         update it to get the model working again."
    );
    create_abs_link(&abs_path, &output_path)?;

    let model = TopazModel::new(output_path);
    write_json(&output_dir.join("model.json"), &model)?;
    Ok(model)
}
