use std::path::PathBuf;
use thiserror::Error;

/// Failures raised by the map pipeline itself. I/O and parse errors from the
/// underlying crates are wrapped with `anyhow` context by the callers.
#[derive(Debug, Error)]
pub enum MapError {
    #[error("dataset has no numeric values to build a colour scale from")]
    EmptyDataset,

    #[error("unsupported file format '{extension}' for {path:?}")]
    UnsupportedFormat { path: PathBuf, extension: String },

    #[error("column '{column}' not found in {path:?}")]
    MissingColumn { path: PathBuf, column: String },

    #[error("invalid viewport: west {west}, south {south}, east {east}, north {north}")]
    InvalidViewport {
        west: f64,
        south: f64,
        east: f64,
        north: f64,
    },

    #[error("configuration has no [{0}] section")]
    MissingSection(&'static str),
}

impl MapError {
    pub fn unsupported(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_string();
        MapError::UnsupportedFormat { path, extension }
    }
}
