//! Tab-separated manifests exchanged with topaz.
//!
//! Every manifest starts with a header row naming its columns:
//! `image_name\tpath` for micrograph lists and
//! `image_name\tx_coord\ty_coord[\tscore]` for particle lists.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, TopazError};
use crate::types::micrograph_name;

pub const MICROGRAPH_COLUMNS: &[&str] = &["image_name", "path"];
pub const COORDINATE_COLUMNS: &[&str] = &["image_name", "x_coord", "y_coord"];
pub const SCORED_COORDINATE_COLUMNS: &[&str] = &["image_name", "x_coord", "y_coord", "score"];

/// Buffered writer that emits the header on creation
pub struct TsvWriter {
    writer: BufWriter<File>,
}

impl TsvWriter {
    pub fn create(path: &Path, columns: &[&str]) -> std::io::Result<Self> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "{}", columns.join("\t"))?;
        Ok(Self { writer })
    }

    fn write_row(&mut self, fields: &[String]) -> std::io::Result<()> {
        writeln!(self.writer, "{}", fields.join("\t"))
    }

    pub fn finish(mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

pub struct MicrographManifestWriter {
    inner: TsvWriter,
}

impl MicrographManifestWriter {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            inner: TsvWriter::create(path, MICROGRAPH_COLUMNS)?,
        })
    }

    pub fn add_micrograph(&mut self, mic_id: u64, path: &Path) -> std::io::Result<()> {
        self.inner.write_row(&[
            micrograph_name(mic_id),
            path.to_string_lossy().into_owned(),
        ])
    }

    pub fn finish(self) -> std::io::Result<()> {
        self.inner.finish()
    }
}

pub struct CoordinateManifestWriter {
    inner: TsvWriter,
}

impl CoordinateManifestWriter {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            inner: TsvWriter::create(path, COORDINATE_COLUMNS)?,
        })
    }

    pub fn add_coordinate(&mut self, mic_id: u64, x: i64, y: i64) -> std::io::Result<()> {
        self.inner
            .write_row(&[micrograph_name(mic_id), x.to_string(), y.to_string()])
    }

    pub fn finish(self) -> std::io::Result<()> {
        self.inner.finish()
    }
}

/// One data row with its 1-based line number in the file
#[derive(Debug, Clone, PartialEq)]
pub struct TsvRow {
    pub line: usize,
    pub fields: Vec<String>,
}

/// Streaming reader over the data rows of a manifest. The header is
/// consumed on open; blank lines are skipped.
pub struct TsvReader {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line: usize,
    columns: Vec<String>,
}

impl TsvReader {
    pub fn open(path: &Path) -> Result<Self> {
        let mut lines = BufReader::new(File::open(path)?).lines();
        let header = match lines.next() {
            Some(header) => header?,
            None => return Err(TopazError::MissingHeader(path.to_path_buf())),
        };
        if header.trim().is_empty() {
            return Err(TopazError::MissingHeader(path.to_path_buf()));
        }
        let columns = header.trim_end().split('\t').map(str::to_string).collect();
        Ok(Self {
            path: path.to_path_buf(),
            lines,
            line: 1,
            columns,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Build a malformed-row error pointing at `row`
    pub fn malformed(&self, row: &TsvRow, reason: impl Into<String>) -> TopazError {
        TopazError::MalformedRow {
            path: self.path.clone(),
            line: row.line,
            reason: reason.into(),
        }
    }

    /// Parse field `index` of `row`, naming it `what` on failure
    pub fn parse_field<T: FromStr>(&self, row: &TsvRow, index: usize, what: &str) -> Result<T> {
        let raw = row
            .fields
            .get(index)
            .ok_or_else(|| self.malformed(row, format!("missing {} column", what)))?;
        raw.trim()
            .parse()
            .map_err(|_| self.malformed(row, format!("invalid {} '{}'", what, raw)))
    }

    /// Fail unless `row` has exactly `expected` columns
    pub fn expect_columns(&self, row: &TsvRow, expected: usize) -> Result<()> {
        if row.fields.len() != expected {
            return Err(self.malformed(
                row,
                format!("expected {} columns, found {}", expected, row.fields.len()),
            ));
        }
        Ok(())
    }
}

impl Iterator for TsvReader {
    type Item = Result<TsvRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line += 1;
            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.trim().is_empty() {
                continue;
            }
            return Some(Ok(TsvRow {
                line: self.line,
                fields: trimmed.split('\t').map(str::to_string).collect(),
            }));
        }
    }
}

/// Read back a micrograph manifest as `(image_name, path)` pairs
pub fn read_micrograph_manifest(path: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut reader = TsvReader::open(path)?;
    let mut entries = Vec::new();
    while let Some(row) = reader.next() {
        let row = row?;
        reader.expect_columns(&row, MICROGRAPH_COLUMNS.len())?;
        entries.push((row.fields[0].clone(), PathBuf::from(&row.fields[1])));
    }
    Ok(entries)
}

/// A coordinate row exactly as written in a manifest, before rescaling
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestCoordinate {
    pub image_name: String,
    pub x: f64,
    pub y: f64,
    pub score: Option<f64>,
}

/// Read back a coordinate manifest, with or without a score column
pub fn read_coordinate_manifest(path: &Path) -> Result<Vec<ManifestCoordinate>> {
    let mut reader = TsvReader::open(path)?;
    let scored = reader.columns().len() == SCORED_COORDINATE_COLUMNS.len();
    let expected = if scored {
        SCORED_COORDINATE_COLUMNS.len()
    } else {
        COORDINATE_COLUMNS.len()
    };

    let mut entries = Vec::new();
    while let Some(row) = reader.next() {
        let row = row?;
        reader.expect_columns(&row, expected)?;
        entries.push(ManifestCoordinate {
            image_name: row.fields[0].clone(),
            x: reader.parse_field(&row, 1, "x_coord")?,
            y: reader.parse_field(&row, 2, "y_coord")?,
            score: if scored {
                Some(reader.parse_field(&row, 3, "score")?)
            } else {
                None
            },
        });
    }
    Ok(entries)
}
