use std::io;
use std::path::PathBuf;
use thiserror::Error;

use super::models::AppStatus;

/// Failures of the job lifecycle core.
///
/// Every variant names the path it concerns so the caller can tell *why*
/// an operation failed, not only *that* it failed.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("The given path {} is not a valid script", .0.display())]
    InvalidDriver(PathBuf),

    #[error("Failed to launch `{program}` for {}: {source}", driver.display())]
    LaunchFailed {
        program: String,
        driver: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(
        "Too many uploads under {} ({max} slots in use), run some cleanup before uploading more files",
        root.display()
    )]
    CapacityExhausted { root: PathBuf, max: usize },

    #[error("No {what} found at {}", path.display())]
    NotFound { what: &'static str, path: PathBuf },

    #[error("Directory {} is in use (status: {status}), please try later", path.display())]
    InUse { path: PathBuf, status: AppStatus },

    #[error(
        "Job {} cannot be submitted from status {}",
        path.display(),
        status.map_or_else(|| "none".to_string(), |s| s.to_string())
    )]
    InvalidTransition {
        path: PathBuf,
        status: Option<AppStatus>,
    },

    #[error("Destination {} already exists", .0.display())]
    DestinationExists(PathBuf),

    #[error("Invalid file name: {0:?}")]
    InvalidFileName(String),

    #[error("Malformed ledger entry in {}: {source}", path.display())]
    CorruptLedger {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl JobError {
    /// Adapter for `map_err` that attaches `path` to an I/O failure.
    pub fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> JobError {
        let path = path.into();
        move |source| JobError::Io { path, source }
    }
}

pub type Result<T> = std::result::Result<T, JobError>;
