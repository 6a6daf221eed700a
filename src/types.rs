use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Canonical micrograph name used in every manifest and linked filename
pub fn micrograph_name(id: u64) -> String {
    format!("{:06}", id)
}

// A single micrograph as handed over by the workflow
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Micrograph {
    pub id: u64,
    pub path: PathBuf,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

impl Micrograph {
    pub fn new(id: u64, path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            path: path.into(),
            width: None,
            height: None,
        }
    }

    pub fn name(&self) -> String {
        micrograph_name(self.id)
    }
}

// A picked or annotated particle position
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Coordinate {
    pub mic_id: u64,
    pub x: i64,
    pub y: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Coordinate {
    pub fn new(mic_id: u64, x: i64, y: i64) -> Self {
        Self {
            mic_id,
            x,
            y,
            score: None,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }
}

/// A set of coordinates together with the micrographs they refer to.
///
/// This is also what an upstream picker keeps appending to while it runs;
/// `stream_closed` flips to `true` once it will not grow anymore.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct CoordinateSet {
    #[serde(default)]
    pub micrographs: Vec<Micrograph>,
    #[serde(default)]
    pub coordinates: Vec<Coordinate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub box_size: Option<u32>,
    #[serde(default)]
    pub stream_closed: bool,
}

impl CoordinateSet {
    pub fn for_micrographs(micrographs: Vec<Micrograph>) -> Self {
        Self {
            micrographs,
            stream_closed: true,
            ..Default::default()
        }
    }

    /// Index micrographs by id
    pub fn micrographs_by_id(&self) -> HashMap<u64, &Micrograph> {
        self.micrographs.iter().map(|mic| (mic.id, mic)).collect()
    }
}

/// Lookup from canonical micrograph name to micrograph
pub type MicrographIndex = HashMap<String, Micrograph>;

pub fn build_micrograph_index(micrographs: &[Micrograph]) -> MicrographIndex {
    micrographs
        .iter()
        .map(|mic| (mic.name(), mic.clone()))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SplitLabel {
    Train,
    Test,
}

impl SplitLabel {
    pub fn index(self) -> usize {
        match self {
            SplitLabel::Train => 0,
            SplitLabel::Test => 1,
        }
    }
}

// Train/test label per micrograph id, in input order
#[derive(Debug, Clone, Default)]
pub struct SplitAssignment {
    pub labels: Vec<(u64, SplitLabel)>,
}

impl SplitAssignment {
    pub fn count(&self, label: SplitLabel) -> usize {
        self.labels.iter().filter(|(_, l)| *l == label).count()
    }

    pub fn as_map(&self) -> HashMap<u64, SplitLabel> {
        self.labels.iter().copied().collect()
    }
}

/// A trained topaz model stored on disk
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TopazModel {
    pub path: PathBuf,
}

impl TopazModel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Display for TopazModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TopazModel(path={})", self.path.display())
    }
}

// Counters for a single predictions read
#[derive(Debug, Default, Clone)]
pub struct ReadStats {
    pub rows_read: usize,
    pub coordinates_added: usize,
    pub skipped_missing_micrograph: usize,
}

impl ReadStats {
    pub fn merge(&mut self, other: &ReadStats) {
        self.rows_read += other.rows_read;
        self.coordinates_added += other.coordinates_added;
        self.skipped_missing_micrograph += other.skipped_missing_micrograph;
    }

    pub fn print_summary(&self) {
        log::info!("=== Predictions Summary ===");
        log::info!("Rows read: {}", self.rows_read);
        log::info!("Coordinates added: {}", self.coordinates_added);
        if self.skipped_missing_micrograph > 0 {
            log::warn!(
                "Skipped rows referencing unknown micrographs: {}",
                self.skipped_missing_micrograph
            );
        }
    }
}
