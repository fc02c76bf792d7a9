//! Error types for the dashboard client.

use std::path::{Path, PathBuf};

/// Everything that can go wrong outside the pure aggregation code.
///
/// Aggregation and derivation never produce one of these: malformed points are
/// dropped there instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The selected file is not a csv/xlsx/xls spreadsheet.
    #[error("Please upload a CSV, XLSX, or XLS file (got {name})")]
    UnsupportedFileType { name: String },

    /// Submission attempted with nothing selected.
    #[error("No file selected")]
    NoFileSelected,

    /// A submission is already outstanding.
    #[error("An upload is already in progress")]
    UploadInProgress,

    /// A result arrived for an upload that was never started or already ended.
    #[error("No upload in progress")]
    NoUploadInProgress,

    /// A form failed local validation.
    #[error("{0}")]
    InvalidForm(String),

    /// Nothing has been uploaded or opened yet.
    #[error("No data loaded. Upload a file to see data")]
    NoData,

    /// The backend reported a failure, with a non-2xx status or as an `error`
    /// field in a 2xx body. `message` is shown verbatim.
    #[error("{message}")]
    Backend { status: u16, message: String },

    /// The backend could not be reached or timed out.
    #[error("Backend service unavailable")]
    BackendUnavailable,

    /// Any other transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered 2xx but the body is not a KPI payload.
    #[error("Invalid KPI payload: {0}")]
    InvalidPayload(String),

    /// IO error.
    #[error("IO error at {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV/XLSX export failed.
    #[error("Export failed: {0}")]
    Export(String),

    /// Chart rendering failed.
    #[error("Render failed: {0}")]
    Render(String),

    /// Bad configuration value.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Wraps an IO error together with the path it happened on.
    pub fn io(path: impl AsRef<Path>, err: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            message: err.to_string(),
        }
    }

    /// True for errors raised locally before any network call.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFileType { .. }
                | Self::NoFileSelected
                | Self::UploadInProgress
                | Self::NoUploadInProgress
                | Self::InvalidForm(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::new(),
            message: e.to_string(),
        }
    }
}

impl From<csv::Error> for Error {
    fn from(e: csv::Error) -> Self {
        Self::Export(e.to_string())
    }
}

/// Result type for dashboard operations.
pub type Result<T> = std::result::Result<T, Error>;
