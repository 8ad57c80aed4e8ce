use serde::Serialize;
use std::path::PathBuf;

use crate::job::StatusEntry;

/// Response for an upload; one entry per stored script
#[derive(Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub entries: Vec<StatusEntry>,
}

/// Response for a log window
#[derive(Serialize)]
pub struct LogResponse {
    #[serde(rename = "app-path")]
    pub app_path: PathBuf,
    pub offset: usize,
    pub lines: Vec<String>,
}

/// Response for a rename
#[derive(Serialize)]
pub struct RenameResponse {
    pub message: String,
    #[serde(rename = "app-path")]
    pub app_path: PathBuf,
}

/// Response for a delete
#[derive(Serialize)]
pub struct DeleteResponse {
    pub message: String,
    pub removed: bool,
}
