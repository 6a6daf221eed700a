use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TopazError {
    #[error("Not enough data: {0}")]
    InsufficientData(String),

    #[error("Gave up waiting after {waited_secs}s with {found} of {required} micrographs")]
    WaitTimedOut {
        waited_secs: u64,
        found: usize,
        required: usize,
    },

    #[error("Malformed row at {}:{line}: {reason}", path.display())]
    MalformedRow {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Missing header row in {}", .0.display())]
    MissingHeader(PathBuf),

    #[error("Unsupported micrograph format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("`topaz {command}` failed with exit code {code:?}")]
    CommandFailed { command: String, code: Option<i32> },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TopazError>;
