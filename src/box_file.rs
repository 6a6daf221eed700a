//! EMAN `.box` export for crYOLO, the YOLO-based picker.
//!
//! Each row holds the lower-left corner of a particle box followed by its
//! width and height, tab-separated.

use log::{info, warn};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{Result, TopazError};
use crate::types::{Coordinate, CoordinateSet};

/// Box corner and size for a particle centered on `coord`.
///
/// With `flip_height` set, the corner is mirrored along Y for micrographs
/// whose origin is at the other edge.
pub fn coordinate_to_box(
    coord: &Coordinate,
    box_size: u32,
    flip_height: Option<u32>,
) -> (i64, i64, u32, u32) {
    let half = i64::from(box_size / 2);
    let x = coord.x - half;
    let mut y = coord.y - half;
    if let Some(height) = flip_height {
        y = i64::from(height) - y;
    }
    (x, y, box_size, box_size)
}

/// Write one `<micrograph stem>.box` file per micrograph that has
/// coordinates. Returns the number of files written.
pub fn write_box_files(
    dir: &Path,
    set: &CoordinateSet,
    box_size: u32,
    flip_on_y: bool,
) -> Result<usize> {
    let micrographs = set.micrographs_by_id();

    let mut by_micrograph: BTreeMap<u64, Vec<&Coordinate>> = BTreeMap::new();
    for coord in &set.coordinates {
        by_micrograph.entry(coord.mic_id).or_default().push(coord);
    }

    let mut written = 0;
    for (mic_id, coords) in by_micrograph {
        let mic = match micrographs.get(&mic_id) {
            Some(mic) => mic,
            None => {
                warn!("Micrograph {} is not in the set, skipping its coordinates", mic_id);
                continue;
            }
        };
        let flip_height = if flip_on_y {
            Some(mic.height.ok_or_else(|| {
                TopazError::InvalidConfig(format!(
                    "flipping on Y needs the height of {}",
                    mic.path.display()
                ))
            })?)
        } else {
            None
        };

        let stem = mic
            .path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| mic.name());
        let mut writer = BufWriter::new(File::create(dir.join(format!("{}.box", stem)))?);
        for coord in coords {
            let (x, y, width, height) = coordinate_to_box(coord, box_size, flip_height);
            writeln!(writer, "{}\t{}\t{}\t{}", x, y, width, height)?;
        }
        writer.flush()?;
        written += 1;
    }

    info!("Wrote {} box files to {}", written, dir.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_to_box_without_flip() {
        let coord = Coordinate::new(1, 100, 100);
        assert_eq!(coordinate_to_box(&coord, 100, None), (50, 50, 100, 100));
    }

    #[test]
    fn test_coordinate_to_box_with_flip() {
        let coord = Coordinate::new(1, 100, 100);
        assert_eq!(coordinate_to_box(&coord, 100, Some(300)), (50, 250, 100, 100));
    }

    #[test]
    fn test_coordinates_of_unknown_micrographs_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let set = CoordinateSet {
            micrographs: vec![crate::types::Micrograph::new(1, "/data/mic1.mrc")],
            coordinates: vec![Coordinate::new(1, 50, 50), Coordinate::new(2, 40, 40)],
            box_size: Some(20),
            stream_closed: true,
        };

        assert_eq!(write_box_files(dir.path(), &set, 20, false).unwrap(), 1);
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("mic1.box")]);
    }
}
