use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use super::ledger::StatusLedger;

/// Ledger file kept in every job directory
pub const STATUS_FILE: &str = "STATUS.log";

/// Output log written by the worker process
pub const LOG_FILE: &str = "LOG.log";

/// Lifecycle status of a job.
///
/// Variants are declared in transition order, so `Ord` follows
/// `Uploaded < Submitted < Completed`.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AppStatus {
    Uploaded,
    Submitted,
    Completed,
}

impl AppStatus {
    /// Rename and delete are refused while a job is in this state.
    pub fn is_in_flight(self) -> bool {
        matches!(self, AppStatus::Submitted)
    }
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppStatus::Uploaded => write!(f, "uploaded"),
            AppStatus::Submitted => write!(f, "submitted"),
            AppStatus::Completed => write!(f, "completed"),
        }
    }
}

/// One line of a job's `STATUS.log`
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    #[serde(rename = "driver-path")]
    pub driver_path: PathBuf,
    #[serde(rename = "app-status")]
    pub app_status: AppStatus,
    #[serde(rename = "app-dir")]
    pub app_dir: PathBuf,
    #[serde(rename = "last-updated")]
    pub last_updated: String,
}

impl StatusEntry {
    pub fn new(driver_path: &Path, app_dir: &Path, app_status: AppStatus, at: DateTime<Local>) -> Self {
        Self {
            driver_path: driver_path.to_path_buf(),
            app_status,
            app_dir: app_dir.to_path_buf(),
            last_updated: at.format("%c").to_string(),
        }
    }
}

/// A directory holding one uploaded driver script, its ledger and its output log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDir {
    path: PathBuf,
}

impl JobDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Job directory that contains the given driver script
    pub fn of_driver(driver_path: &Path) -> Self {
        let parent = driver_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Self::new(parent)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn status_path(&self) -> PathBuf {
        self.path.join(STATUS_FILE)
    }

    pub fn log_path(&self) -> PathBuf {
        self.path.join(LOG_FILE)
    }

    pub fn driver_path(&self, file_name: &str) -> PathBuf {
        self.path.join(file_name)
    }

    pub fn ledger(&self) -> StatusLedger {
        StatusLedger::new(self.clone())
    }
}
