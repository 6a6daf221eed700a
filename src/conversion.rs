use log::{debug, warn};
use std::path::Path;

use crate::error::{Result, TopazError};
use crate::manifest::{TsvReader, TsvRow, SCORED_COORDINATE_COLUMNS};
use crate::types::{Coordinate, MicrographIndex, ReadStats};

/// Original-resolution pixel to downsampled pixel
pub fn scale_down(value: i64, scale: u32) -> i64 {
    (value as f64 / scale as f64).round() as i64
}

/// Downsampled pixel back to original resolution
pub fn scale_up(value: f64, scale: u32) -> i64 {
    (value * scale as f64).round() as i64
}

/// Box size for picked particles: the override when given, otherwise the
/// particle diameter at the original resolution.
pub fn box_size(radius: u32, scale: u32, override_size: Option<u32>) -> Result<u32> {
    if let Some(size) = override_size {
        return Ok(size);
    }
    radius
        .checked_mul(2)
        .and_then(|diameter| diameter.checked_mul(scale))
        .ok_or_else(|| {
            TopazError::InvalidConfig(format!(
                "box size for radius {} at scale {} does not fit in 32 bits",
                radius, scale
            ))
        })
}

/// Read the scored coordinates topaz extracted and bring them back to the
/// resolution of the input micrographs.
///
/// Rows naming a micrograph missing from `index` are logged and skipped.
/// Any other malformed row aborts the read.
pub fn read_predictions(
    path: &Path,
    index: &MicrographIndex,
    scale: u32,
) -> Result<(Vec<Coordinate>, ReadStats)> {
    let mut reader = TsvReader::open(path)?;
    let mut coordinates = Vec::new();
    let mut stats = ReadStats::default();
    let mut last_name: Option<String> = None;

    while let Some(row) = reader.next() {
        let row = row?;
        reader.expect_columns(&row, SCORED_COORDINATE_COLUMNS.len())?;
        stats.rows_read += 1;

        let x = parse_finite(&reader, &row, 1, "x_coord")?;
        let y = parse_finite(&reader, &row, 2, "y_coord")?;
        let score = parse_finite(&reader, &row, 3, "score")?;

        let name = row.fields[0].trim();
        let mic = match index.get(name) {
            Some(mic) => mic,
            None => {
                warn!(
                    "Micrograph {} referenced at {}:{} is unknown, skipping",
                    name,
                    path.display(),
                    row.line
                );
                stats.skipped_missing_micrograph += 1;
                continue;
            }
        };
        if last_name.as_deref() != Some(name) {
            debug!("Reading coordinates for micrograph {}", name);
            last_name = Some(name.to_string());
        }

        coordinates
            .push(Coordinate::new(mic.id, scale_up(x, scale), scale_up(y, scale)).with_score(score));
        stats.coordinates_added += 1;
    }

    Ok((coordinates, stats))
}

// `nan` and `inf` parse as f64 but are not coordinates
fn parse_finite(reader: &TsvReader, row: &TsvRow, index: usize, what: &str) -> Result<f64> {
    let value: f64 = reader.parse_field(row, index, what)?;
    if !value.is_finite() {
        return Err(reader.malformed(row, format!("{} is not a finite number", what)));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_down_rounds_to_nearest() {
        assert_eq!(scale_down(40, 4), 10);
        assert_eq!(scale_down(42, 4), 11);
        assert_eq!(scale_down(41, 4), 10);
    }

    #[test]
    fn test_scale_up_rounds_to_nearest() {
        assert_eq!(scale_up(10.0, 4), 40);
        assert_eq!(scale_up(10.4, 4), 42);
    }

    #[test]
    fn test_box_size_defaults_to_diameter() {
        assert_eq!(box_size(8, 4, None).unwrap(), 64);
        assert_eq!(box_size(8, 4, Some(100)).unwrap(), 100);
    }

    #[test]
    fn test_box_size_overflow_is_rejected() {
        assert!(matches!(
            box_size(u32::MAX / 2, 4, None),
            Err(TopazError::InvalidConfig(_))
        ));
        assert_eq!(box_size(u32::MAX, 4, Some(10)).unwrap(), 10);
    }

    #[test]
    fn test_non_finite_prediction_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predicted.txt");
        std::fs::write(
            &path,
            "image_name\tx_coord\ty_coord\tscore\n000001\t5\t6\t0.5\n000001\tnan\t6\t0.5\n",
        )
        .unwrap();
        let index = crate::types::build_micrograph_index(&[crate::types::Micrograph::new(
            1,
            "/data/a.mrc",
        )]);

        match read_predictions(&path, &index, 4) {
            Err(TopazError::MalformedRow { line, reason, .. }) => {
                assert_eq!(line, 3);
                assert!(reason.contains("x_coord"));
            }
            other => panic!("expected malformed row, got {:?}", other),
        }
    }

    #[test]
    fn test_infinite_score_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predicted.txt");
        std::fs::write(&path, "image_name\tx_coord\ty_coord\tscore\n000001\t5\t6\tinf\n")
            .unwrap();
        let index = crate::types::build_micrograph_index(&[crate::types::Micrograph::new(
            1,
            "/data/a.mrc",
        )]);

        assert!(matches!(
            read_predictions(&path, &index, 4),
            Err(TopazError::MalformedRow { line: 2, .. })
        ));
    }
}
