use actix_multipart::form::{bytes::Bytes, MultipartForm};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Multipart upload form; every `filearg` part becomes its own job
#[derive(MultipartForm)]
pub struct UploadForm {
    #[multipart(rename = "filearg")]
    pub files: Vec<Bytes>,
}

fn default_capture_stderr() -> bool {
    true
}

/// Body of a submit request
#[derive(Deserialize, Serialize, Debug, Validate)]
pub struct SubmitRequest {
    #[serde(rename = "driver-path")]
    #[validate(length(min = 1, message = "driver-path must not be empty"))]
    pub driver_path: String,

    /// Also write the worker's stderr into the output log
    #[serde(rename = "capture-stderr", default = "default_capture_stderr")]
    pub capture_stderr: bool,
}

/// Query naming a job directory
#[derive(Deserialize, Serialize, Debug, Validate)]
pub struct AppPathQuery {
    #[serde(rename = "app-path")]
    #[validate(length(min = 1, message = "app-path must not be empty"))]
    pub app_path: String,
}

/// Query for a window of the output log
#[derive(Deserialize, Serialize, Debug, Validate)]
pub struct LogQuery {
    #[serde(rename = "app-path")]
    #[validate(length(min = 1, message = "app-path must not be empty"))]
    pub app_path: String,

    #[serde(default)]
    pub offset: usize,

    /// Absent means every remaining line
    pub count: Option<usize>,
}

/// Body of a rename request
#[derive(Deserialize, Serialize, Debug, Validate)]
pub struct RenameRequest {
    #[serde(rename = "app-path")]
    #[validate(length(min = 1, message = "app-path must not be empty"))]
    pub app_path: String,

    #[serde(rename = "dst-path")]
    #[validate(length(min = 1, message = "dst-path must not be empty"))]
    pub dst_path: String,
}

/// Body of a delete request
#[derive(Deserialize, Serialize, Debug, Validate)]
pub struct DeleteRequest {
    #[serde(rename = "app-path")]
    #[validate(length(min = 1, message = "app-path must not be empty"))]
    pub app_path: String,
}
