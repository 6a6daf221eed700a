use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::{Path, PathBuf};

use crate::conversion::scale_down;
use crate::error::{Result, TopazError};
use crate::manifest::{CoordinateManifestWriter, MicrographManifestWriter};
use crate::types::{Coordinate, SplitAssignment, SplitLabel};

/// Number of micrographs held out for testing out of `n`.
///
/// Both subsets end up with at least one micrograph for any `n >= 2`:
/// a percentage too small to select anything is raised to the minimum
/// one that does, and one selecting everything is clamped to 99%.
pub fn test_count(n: usize, split_percent: f64) -> usize {
    let total = n as f64;
    let mut count = (split_percent / 100.0 * total).round() as usize;

    if count < 1 {
        let minimum_percent = 100.0 / total + 1.0;
        count = (minimum_percent / 100.0 * total).floor() as usize;
    }
    if count >= n {
        count = (0.99 * total).floor() as usize;
    }
    count
}

/// Label each micrograph id as train or test, keeping the input order.
///
/// The labels are shuffled uniformly; passing a `seed` makes the split
/// reproducible, otherwise the generator is seeded from system entropy.
pub fn partition(mic_ids: &[u64], split_percent: f64, seed: Option<u64>) -> Result<SplitAssignment> {
    if !(0.0..=100.0).contains(&split_percent) {
        return Err(TopazError::InvalidConfig(format!(
            "test split percentage must be between 0 and 100, got {}",
            split_percent
        )));
    }
    if mic_ids.len() < 2 {
        return Err(TopazError::InsufficientData(format!(
            "at least 2 micrographs are needed for a train/test split, got {}",
            mic_ids.len()
        )));
    }

    let n = mic_ids.len();
    let n_test = test_count(n, split_percent);

    let mut labels: Vec<SplitLabel> = (0..n)
        .map(|i| if i < n_test { SplitLabel::Test } else { SplitLabel::Train })
        .collect();

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    labels.shuffle(&mut rng);

    info!(
        "Split {} micrographs: {} for training, {} for testing",
        n,
        n - n_test,
        n_test
    );
    debug!("Split labels: {:?}", labels);

    Ok(SplitAssignment {
        labels: mic_ids.iter().copied().zip(labels).collect(),
    })
}

/// Destination files for a train/test split, indexed by `SplitLabel::index`
#[derive(Debug, Clone)]
pub struct ManifestPaths {
    pub images: [PathBuf; 2],
    pub particles: [PathBuf; 2],
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ManifestSummary {
    pub micrographs: [usize; 2],
    pub particles: [usize; 2],
}

/// Write the train/test micrograph and particle manifests for a split.
///
/// `preprocessed_path` gives the path topaz will find each micrograph at
/// after preprocessing. Coordinates are written in micrograph id order
/// and downscaled by `scale`; those on micrographs outside the split are
/// ignored.
pub fn write_manifests<F>(
    assignment: &SplitAssignment,
    coordinates: &[Coordinate],
    preprocessed_path: F,
    paths: &ManifestPaths,
    scale: u32,
) -> Result<ManifestSummary>
where
    F: Fn(u64) -> PathBuf,
{
    let mut summary = ManifestSummary::default();

    let mut mic_writers = [
        MicrographManifestWriter::create(&paths.images[0])?,
        MicrographManifestWriter::create(&paths.images[1])?,
    ];
    for &(mic_id, label) in &assignment.labels {
        mic_writers[label.index()].add_micrograph(mic_id, &preprocessed_path(mic_id))?;
        summary.micrographs[label.index()] += 1;
    }
    for writer in mic_writers {
        writer.finish()?;
    }

    let labels = assignment.as_map();
    let mut ordered: Vec<&Coordinate> = coordinates.iter().collect();
    ordered.sort_by_key(|coord| coord.mic_id);

    let mut part_writers = [
        CoordinateManifestWriter::create(&paths.particles[0])?,
        CoordinateManifestWriter::create(&paths.particles[1])?,
    ];
    for coord in ordered {
        if let Some(label) = labels.get(&coord.mic_id) {
            part_writers[label.index()].add_coordinate(
                coord.mic_id,
                scale_down(coord.x, scale),
                scale_down(coord.y, scale),
            )?;
            summary.particles[label.index()] += 1;
        }
    }
    for writer in part_writers {
        writer.finish()?;
    }

    info!(
        "Wrote manifests: {} train / {} test micrographs, {} train / {} test particles",
        summary.micrographs[0], summary.micrographs[1], summary.particles[0], summary.particles[1]
    );
    Ok(summary)
}

/// Path a micrograph gets inside a working folder
pub fn micrograph_file(dir: &Path, mic_id: u64) -> PathBuf {
    dir.join(format!("{}.mrc", crate::types::micrograph_name(mic_id)))
}
