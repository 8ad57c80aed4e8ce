use std::fmt;
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};

use super::error::{JobError, Result};
use super::models::{AppStatus, JobDir};

/// Structural operations that must not run under an in-flight job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardedOp {
    Rename,
    Delete,
}

impl fmt::Display for GuardedOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardedOp::Rename => write!(f, "rename"),
            GuardedOp::Delete => write!(f, "delete"),
        }
    }
}

/// Outcome of a delete request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Removed,
    /// Nothing existed at the path, so there was nothing to do.
    Absent,
}

/// Gates rename and delete on the latest ledger status.
///
/// The check and the action read the ledger once, back to back. A
/// submission landing between the two is not prevented.
pub struct LifecycleGuard;

impl LifecycleGuard {
    /// Allowed unless the latest entry is SUBMITTED. A missing ledger allows.
    pub async fn check(dir: &JobDir, op: GuardedOp) -> Result<Option<AppStatus>> {
        let status = match dir.ledger().latest().await {
            Ok(entry) => Some(entry.app_status),
            Err(JobError::NotFound { .. }) => None,
            Err(e) => return Err(e),
        };

        match status {
            Some(status) if status.is_in_flight() => {
                warn!("Denied {} of {}: status is {}", op, dir.path().display(), status);
                Err(JobError::InUse {
                    path: dir.path().to_path_buf(),
                    status,
                })
            }
            _ => Ok(status),
        }
    }

    /// Move the whole job directory, ledger and log included, to `dst`.
    pub async fn rename(dir: &JobDir, dst: &Path) -> Result<JobDir> {
        if !fs::try_exists(dir.path()).await.map_err(JobError::io(dir.path()))? {
            return Err(JobError::NotFound {
                what: "job directory",
                path: dir.path().to_path_buf(),
            });
        }
        if fs::try_exists(dst).await.map_err(JobError::io(dst))? {
            return Err(JobError::DestinationExists(dst.to_path_buf()));
        }

        Self::check(dir, GuardedOp::Rename).await?;

        if let Some(parent) = dst.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(JobError::io(parent))?;
        }
        fs::rename(dir.path(), dst).await.map_err(JobError::io(dir.path()))?;

        info!("Renamed job directory {} to {}", dir.path().display(), dst.display());
        Ok(JobDir::new(dst))
    }

    /// Recursively remove the job directory and everything in it.
    pub async fn delete(dir: &JobDir) -> Result<DeleteOutcome> {
        if !fs::try_exists(dir.path()).await.map_err(JobError::io(dir.path()))? {
            info!("Job directory {} does not exist, nothing to delete", dir.path().display());
            return Ok(DeleteOutcome::Absent);
        }

        Self::check(dir, GuardedOp::Delete).await?;

        match fs::remove_dir_all(dir.path()).await {
            Ok(()) => {
                info!("Deleted job directory {}", dir.path().display());
                Ok(DeleteOutcome::Removed)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(DeleteOutcome::Absent),
            Err(e) => Err(JobError::io(dir.path())(e)),
        }
    }
}
