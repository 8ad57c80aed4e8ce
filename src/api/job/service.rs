use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use chrono::Local;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{error, info, warn};

use crate::api::validation::ErrorResponse;
use crate::job::{
    models::{LOG_FILE, STATUS_FILE},
    AppStatus, DeleteOutcome, JobDir, JobError, LifecycleGuard, LogReader, SlotAllocator,
    StatusEntry,
};
use crate::worker::{JobRunner, SubmitOptions};

/// Service-level errors
#[derive(Debug)]
pub enum ServiceError {
    /// Lifecycle operation failed
    Job(JobError),

    /// Path does not point inside the uploads root
    OutsideUploads(PathBuf),

    /// Request was well-formed but unusable
    ValidationError(String),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::Job(e) => write!(f, "{}", e),
            ServiceError::OutsideUploads(path) => {
                write!(f, "Path {} is not inside the uploads directory", path.display())
            }
            ServiceError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServiceError::Job(e) => Some(e),
            _ => None,
        }
    }
}

impl From<JobError> for ServiceError {
    fn from(e: JobError) -> Self {
        ServiceError::Job(e)
    }
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Job(e) => match e {
                JobError::InvalidDriver(_) | JobError::InvalidFileName(_) => StatusCode::BAD_REQUEST,
                JobError::NotFound { .. } => StatusCode::NOT_FOUND,
                JobError::InUse { .. }
                | JobError::InvalidTransition { .. }
                | JobError::DestinationExists(_) => StatusCode::CONFLICT,
                JobError::CapacityExhausted { .. } => StatusCode::INSUFFICIENT_STORAGE,
                JobError::LaunchFailed { .. } | JobError::CorruptLedger { .. } | JobError::Io { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ServiceError::OutsideUploads(_) | ServiceError::ValidationError(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }

        let (error, fields) = match self {
            ServiceError::Job(JobError::InUse { path, status }) => (
                "In use",
                serde_json::json!({
                    "message": self.to_string(),
                    "app-path": path,
                    "app-status": status,
                }),
            ),
            ServiceError::Job(JobError::InvalidTransition { path, status }) => (
                "Invalid transition",
                serde_json::json!({
                    "message": self.to_string(),
                    "app-path": path,
                    "app-status": status,
                }),
            ),
            ServiceError::Job(JobError::NotFound { .. }) => {
                ("Not found", serde_json::json!({"message": self.to_string()}))
            }
            ServiceError::Job(JobError::CapacityExhausted { .. }) => {
                ("Upload capacity exhausted", serde_json::json!({"message": self.to_string()}))
            }
            _ if status.is_server_error() => {
                ("Failed to process request", serde_json::json!({"message": self.to_string()}))
            }
            _ => ("Validation failed", serde_json::json!({"message": self.to_string()})),
        };

        HttpResponse::build(status).json(ErrorResponse {
            error: error.to_string(),
            fields,
        })
    }
}

/// Job service: the six lifecycle operations behind the HTTP handlers
pub struct JobService {
    allocator: SlotAllocator,
    runner: Arc<JobRunner>,
}

impl JobService {
    /// Create a new JobService instance
    pub fn new(allocator: SlotAllocator, runner: Arc<JobRunner>) -> Self {
        Self { allocator, runner }
    }

    pub fn uploads_root(&self) -> &Path {
        self.allocator.root()
    }

    pub fn runner(&self) -> &Arc<JobRunner> {
        &self.runner
    }

    /// Store an uploaded script in a fresh job directory
    ///
    /// # Business Logic
    /// - Keeps only the base name of `filename`
    /// - Allocates the next free slot directory
    /// - Writes the script (executable on Unix) and records UPLOADED
    /// - Removes the slot again if any of that fails
    pub async fn upload_script(&self, bytes: &[u8], filename: &str) -> Result<StatusEntry, ServiceError> {
        let name = sanitize_file_name(filename)?;
        info!("Service: Uploading script {} ({} bytes)", name, bytes.len());

        let dir = self.allocator.allocate().await?;
        match store_script(&dir, &name, bytes).await {
            Ok(entry) => {
                info!("Service: Uploaded {}", entry.driver_path.display());
                Ok(entry)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(dir.path()).await {
                    error!("Service: Failed to release slot {}: {}", dir.path().display(), cleanup);
                }
                Err(e.into())
            }
        }
    }

    /// Launch the worker for an uploaded driver script
    pub async fn submit_job(
        &self,
        driver_path: &Path,
        options: SubmitOptions,
    ) -> Result<StatusEntry, ServiceError> {
        let driver_path = self.scoped(driver_path)?;
        info!("Service: Submitting {}", driver_path.display());

        let submission = self.runner.submit(&driver_path, options).await?;
        info!(
            "Service: {} running as pid {:?}",
            driver_path.display(),
            submission.pid
        );
        Ok(submission.entry)
    }

    /// Latest ledger entry of a job directory
    pub async fn get_status(&self, app_path: &Path) -> Result<StatusEntry, ServiceError> {
        let dir = JobDir::new(self.scoped(app_path)?);
        Ok(dir.ledger().latest().await?)
    }

    /// Window of the job's output log
    pub async fn get_log(
        &self,
        app_path: &Path,
        offset: usize,
        count: Option<usize>,
    ) -> Result<Vec<String>, ServiceError> {
        let dir = JobDir::new(self.scoped(app_path)?);
        Ok(LogReader::read(&dir, offset, count).await?.collect())
    }

    /// Relocate a job directory unless its job is running
    ///
    /// Source and destination are both top-level entries of the uploads
    /// root, so job directories never nest inside one another.
    pub async fn rename_job(&self, app_path: &Path, dst_path: &Path) -> Result<JobDir, ServiceError> {
        let dir = JobDir::new(self.top_level(app_path)?);
        let dst = self.top_level(dst_path)?;
        info!("Service: Renaming {} to {}", dir.path().display(), dst.display());

        Ok(LifecycleGuard::rename(&dir, &dst).await?)
    }

    /// Remove a job directory unless its job is running
    pub async fn delete_job(&self, app_path: &Path) -> Result<DeleteOutcome, ServiceError> {
        let dir = JobDir::new(self.top_level(app_path)?);
        info!("Service: Deleting {}", dir.path().display());

        Ok(LifecycleGuard::delete(&dir).await?)
    }

    /// Accept only paths strictly below the uploads root, without `..`.
    fn scoped(&self, path: &Path) -> Result<PathBuf, ServiceError> {
        let root = self.allocator.root();
        let escapes = path.components().any(|c| matches!(c, Component::ParentDir));
        if escapes || path == root || !path.starts_with(root) {
            return Err(ServiceError::OutsideUploads(path.to_path_buf()));
        }
        Ok(path.to_path_buf())
    }

    /// Like `scoped`, but the path must name an entry directly under the root.
    fn top_level(&self, path: &Path) -> Result<PathBuf, ServiceError> {
        let path = self.scoped(path)?;
        let mut rest = path
            .strip_prefix(self.allocator.root())
            .map_err(|_| ServiceError::OutsideUploads(path.clone()))?
            .components();
        match (rest.next(), rest.next()) {
            (Some(Component::Normal(_)), None) => Ok(path),
            _ => Err(ServiceError::ValidationError(format!(
                "{} is not a job directory directly under the uploads root",
                path.display()
            ))),
        }
    }
}

fn sanitize_file_name(filename: &str) -> Result<String, JobError> {
    let invalid = || JobError::InvalidFileName(filename.to_string());

    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(invalid)?;
    if name.trim().is_empty() || name == STATUS_FILE || name == LOG_FILE {
        return Err(invalid());
    }
    Ok(name.to_string())
}

async fn store_script(dir: &JobDir, name: &str, bytes: &[u8]) -> Result<StatusEntry, JobError> {
    let driver_path = dir.driver_path(name);
    fs::write(&driver_path, bytes)
        .await
        .map_err(JobError::io(&driver_path))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&driver_path, std::fs::Permissions::from_mode(0o755))
            .await
            .map_err(JobError::io(&driver_path))?;
    }

    dir.ledger()
        .append(&driver_path, AppStatus::Uploaded, Local::now())
        .await
}
