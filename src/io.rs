use glob::glob;
use indicatif::ProgressBar;
use log::{info, warn};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

use crate::dataset::{micrograph_file, ManifestPaths};
use crate::error::{Result, TopazError};
use crate::types::{CoordinateSet, Micrograph};
use crate::utils::{
    create_abs_link, create_output_directory, create_progress_bar, ensure_directory, extension_of,
    read_json, write_json,
};

/// Every location a training run reads or writes
#[derive(Debug, Clone)]
pub struct TrainingPaths {
    pub training_dir: PathBuf,
    pub denoise_dir: PathBuf,
    pub preprocess_dir: PathBuf,
    pub train_images: PathBuf,
    pub test_images: PathBuf,
    pub train_particles: PathBuf,
    pub test_particles: PathBuf,
    pub model_dir: PathBuf,
    pub model_record: PathBuf,
}

impl TrainingPaths {
    pub fn new(work_dir: &Path) -> Self {
        let training_dir = work_dir.join("tmp").join("training");
        let denoise_dir = training_dir.join("denoise");
        let preprocess_dir = training_dir.join("preprocess");
        let model_dir = work_dir.join("extra").join("model");
        Self {
            train_images: preprocess_dir.join("image_list_train.txt"),
            test_images: preprocess_dir.join("image_list_test.txt"),
            train_particles: preprocess_dir.join("particles_train.txt"),
            test_particles: preprocess_dir.join("particles_test.txt"),
            model_record: work_dir.join("extra").join("model.json"),
            training_dir,
            denoise_dir,
            preprocess_dir,
            model_dir,
        }
    }

    pub fn manifest_paths(&self) -> ManifestPaths {
        ManifestPaths {
            images: [self.train_images.clone(), self.test_images.clone()],
            particles: [self.train_particles.clone(), self.test_particles.clone()],
        }
    }

    /// Where topaz preprocess leaves a given micrograph
    pub fn preprocessed_micrograph(&self, mic_id: u64) -> PathBuf {
        micrograph_file(&self.preprocess_dir, mic_id)
    }
}

/// Locations for picking one batch of micrographs, named after the
/// first and last micrograph id in the batch
#[derive(Debug, Clone)]
pub struct PickingPaths {
    pub picking_dir: PathBuf,
    pub denoise_dir: PathBuf,
    pub preprocess_dir: PathBuf,
    pub coordinates_file: PathBuf,
}

impl PickingPaths {
    pub fn new(work_dir: &Path, first_id: u64, last_id: u64) -> Self {
        let picking_dir = work_dir
            .join("tmp")
            .join(format!("micrographs{}-{}", first_id, last_id));
        let denoise_dir = picking_dir.join("denoise");
        let preprocess_dir = picking_dir.join("preprocess");
        Self {
            coordinates_file: preprocess_dir
                .join(format!("topaz_coordinates{}-{}.txt", first_id, last_id)),
            picking_dir,
            denoise_dir,
            preprocess_dir,
        }
    }
}

/// Set up the directory structure for a training run
pub fn setup_training_directories(paths: &TrainingPaths, denoise: bool) -> std::io::Result<()> {
    create_output_directory(&paths.training_dir)?;
    ensure_directory(&paths.preprocess_dir)?;
    if denoise {
        ensure_directory(&paths.denoise_dir)?;
    }
    ensure_directory(&paths.model_dir)?;
    Ok(())
}

/// Set up the directory structure for one picking batch
pub fn setup_picking_directories(paths: &PickingPaths, denoise: bool) -> std::io::Result<()> {
    create_output_directory(&paths.picking_dir)?;
    ensure_directory(&paths.preprocess_dir)?;
    if denoise {
        ensure_directory(&paths.denoise_dir)?;
    }
    Ok(())
}

/// Link each micrograph into `dir` as `<name>.mrc`.
///
/// Only MRC files can be handed to topaz as they are; other formats need
/// converting before they reach this point.
pub fn link_micrographs(micrographs: &[&Micrograph], dir: &Path) -> Result<()> {
    if let Some(mic) = micrographs
        .iter()
        .find(|mic| extension_of(&mic.path).as_deref() != Some("mrc"))
    {
        return Err(TopazError::UnsupportedFormat(mic.path.clone()));
    }

    let pb = create_progress_bar(micrographs.len() as u64, "Link");
    let result = micrographs.par_iter().try_for_each(|mic| {
        let linked = link_micrograph(mic, dir, &pb);
        pb.inc(1);
        linked
    });
    pb.finish_with_message("Linking complete");
    result
}

fn link_micrograph(mic: &Micrograph, dir: &Path, pb: &ProgressBar) -> Result<()> {
    let link = micrograph_file(dir, mic.id);
    create_abs_link(&mic.path, &link).map_err(|e| {
        pb.suspend(|| warn!("Failed to link {}: {}", mic.path.display(), e));
        TopazError::from(e)
    })
}

/// The model saved at the last epoch: the `.sav` file with the highest
/// trailing epoch number (`model_epoch10.sav` after `model_epoch9.sav`),
/// or `model.sav` when the folder has none
pub fn last_epoch_model(model_dir: &Path) -> Result<PathBuf> {
    let pattern = model_dir.join("*.sav");
    let models: Vec<PathBuf> = glob(&pattern.to_string_lossy())
        .map_err(|e| TopazError::InvalidConfig(format!("bad model pattern: {}", e)))?
        .filter_map(|entry| entry.ok())
        .collect();

    match models
        .into_iter()
        .max_by_key(|model| (epoch_number(model), model.clone()))
    {
        Some(model) => Ok(model),
        None => {
            warn!("No saved epochs found in {}", model_dir.display());
            Ok(model_dir.join("model.sav"))
        }
    }
}

/// Digits right before the extension, e.g. 12 for `model_epoch12.sav`
fn epoch_number(model: &Path) -> Option<u64> {
    let stem = model.file_stem()?.to_str()?;
    let digits = stem.len() - stem.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    stem[stem.len() - digits..].parse().ok()
}

pub fn read_coordinate_set(path: &Path) -> Result<CoordinateSet> {
    let set: CoordinateSet = read_json(path)?;
    info!(
        "Loaded {} micrographs and {} coordinates from {}",
        set.micrographs.len(),
        set.coordinates.len(),
        path.display()
    );
    Ok(set)
}

pub fn write_coordinate_set(path: &Path, set: &CoordinateSet) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_directory(parent)?;
    }
    write_json(path, set)?;
    info!(
        "Wrote {} coordinates to {}",
        set.coordinates.len(),
        path.display()
    );
    Ok(())
}
