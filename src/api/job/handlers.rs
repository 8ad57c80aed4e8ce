use actix_multipart::form::MultipartForm;
use actix_web::{
    HttpResponse, get, post,
    web::{Data, ServiceConfig, scope},
};
use actix_web_validator::{Json, Query};
use std::path::Path;

use super::dto::{DeleteResponse, LogResponse, RenameResponse, UploadResponse};
use super::models::{AppPathQuery, DeleteRequest, LogQuery, RenameRequest, SubmitRequest, UploadForm};
use super::service::{JobService, ServiceError};
use crate::job::DeleteOutcome;
use crate::worker::SubmitOptions;

#[post("/upload")]
async fn upload_script(
    service: Data<JobService>,
    MultipartForm(form): MultipartForm<UploadForm>,
) -> Result<HttpResponse, ServiceError> {
    if form.files.is_empty() {
        return Err(ServiceError::ValidationError(
            "No files found in form field filearg".to_string(),
        ));
    }

    let mut entries = Vec::with_capacity(form.files.len());
    for file in &form.files {
        let name = file.file_name.as_deref().unwrap_or_default();
        entries.push(service.upload_script(&file.data, name).await?);
    }

    Ok(HttpResponse::Created().json(UploadResponse {
        message: format!("{} script(s) uploaded", entries.len()),
        entries,
    }))
}

#[post("/submit")]
async fn submit_job(
    service: Data<JobService>,
    req: Json<SubmitRequest>,
) -> Result<HttpResponse, ServiceError> {
    let options = SubmitOptions {
        capture_stderr: req.capture_stderr,
    };
    let entry = service.submit_job(Path::new(&req.driver_path), options).await?;
    Ok(HttpResponse::Accepted().json(entry))
}

#[get("/status")]
async fn get_status(
    service: Data<JobService>,
    query: Query<AppPathQuery>,
) -> Result<HttpResponse, ServiceError> {
    let entry = service.get_status(Path::new(&query.app_path)).await?;
    Ok(HttpResponse::Ok().json(entry))
}

#[get("/logs")]
async fn get_log(
    service: Data<JobService>,
    query: Query<LogQuery>,
) -> Result<HttpResponse, ServiceError> {
    let query = query.into_inner();
    let lines = service
        .get_log(Path::new(&query.app_path), query.offset, query.count)
        .await?;
    Ok(HttpResponse::Ok().json(LogResponse {
        app_path: query.app_path.into(),
        offset: query.offset,
        lines,
    }))
}

#[post("/rename")]
async fn rename_job(
    service: Data<JobService>,
    req: Json<RenameRequest>,
) -> Result<HttpResponse, ServiceError> {
    let moved = service
        .rename_job(Path::new(&req.app_path), Path::new(&req.dst_path))
        .await?;
    Ok(HttpResponse::Ok().json(RenameResponse {
        message: format!("The new path for the app is {}", moved.path().display()),
        app_path: moved.path().to_path_buf(),
    }))
}

#[post("/delete")]
async fn delete_job(
    service: Data<JobService>,
    req: Json<DeleteRequest>,
) -> Result<HttpResponse, ServiceError> {
    let response = match service.delete_job(Path::new(&req.app_path)).await? {
        DeleteOutcome::Removed => DeleteResponse {
            message: format!("Deleted {}", req.app_path),
            removed: true,
        },
        DeleteOutcome::Absent => DeleteResponse {
            message: format!("{} doesn't exist, no action is needed", req.app_path),
            removed: false,
        },
    };
    Ok(HttpResponse::Ok().json(response))
}

pub fn job_config(config: &mut ServiceConfig) {
    config.service(
        scope("jobs")
            .service(upload_script)
            .service(submit_job)
            .service(get_status)
            .service(get_log)
            .service(rename_job)
            .service(delete_job),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::validation;
    use crate::job::{AppStatus, SlotAllocator, StatusEntry};
    use crate::worker::{JobRunner, WorkerCommand};
    use actix_web::{http::header, http::StatusCode, test, App};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn job_service(temp: &TempDir) -> Data<JobService> {
        let allocator = SlotAllocator::new(temp.path().join("uploads"), 4, 10_000);
        let runner = Arc::new(JobRunner::new(WorkerCommand::new("sh", vec![])));
        Data::new(JobService::new(allocator, runner))
    }

    macro_rules! app {
        ($service:expr) => {
            test::init_service(
                App::new()
                    .app_data($service.clone())
                    .app_data(validation::json_config())
                    .app_data(validation::query_config())
                    .configure(job_config),
            )
            .await
        };
    }

    fn multipart_upload(file_name: &str, body: &str) -> test::TestRequest {
        let boundary = "----jobboundary";
        let payload = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"filearg\"; filename=\"{file_name}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n\
             {body}\r\n\
             --{boundary}--\r\n"
        );
        test::TestRequest::post()
            .uri("/jobs/upload")
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            ))
            .set_payload(payload)
    }

    #[actix_web::test]
    async fn test_upload_creates_job_directory() {
        let temp = TempDir::new().unwrap();
        let service = job_service(&temp);
        let app = app!(service);

        let resp = test::call_service(&app, multipart_upload("job.sh", "echo hi\n").to_request()).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let body: serde_json::Value = test::read_body_json(resp).await;
        let entry: StatusEntry = serde_json::from_value(body["entries"][0].clone()).unwrap();
        assert_eq!(entry.app_status, AppStatus::Uploaded);
        assert_eq!(entry.driver_path, temp.path().join("uploads/0000/job.sh"));
        assert_eq!(std::fs::read_to_string(&entry.driver_path).unwrap(), "echo hi\n");
    }

    #[actix_web::test]
    async fn test_status_of_unknown_job_is_404() {
        let temp = TempDir::new().unwrap();
        let service = job_service(&temp);
        let app = app!(service);
        let dir = temp.path().join("uploads/0007");

        let req = test::TestRequest::get()
            .uri(&format!("/jobs/status?app-path={}", dir.display()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_log_window() {
        let temp = TempDir::new().unwrap();
        let service = job_service(&temp);
        let entry = service.upload_script(b"true\n", "job.sh").await.unwrap();
        std::fs::write(entry.app_dir.join("LOG.log"), "a\nb\nc\nd\ne\n").unwrap();
        let app = app!(service);

        let req = test::TestRequest::get()
            .uri(&format!("/jobs/logs?app-path={}&offset=1&count=2", entry.app_dir.display()))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["lines"], serde_json::json!(["b", "c"]));
        assert_eq!(body["offset"], 1);
    }

    #[actix_web::test]
    async fn test_delete_in_use_is_conflict() {
        let temp = TempDir::new().unwrap();
        let service = job_service(&temp);
        let entry = service.upload_script(b"sleep 1\n", "job.sh").await.unwrap();
        let app = app!(service);

        let req = test::TestRequest::post()
            .uri("/jobs/submit")
            .set_json(serde_json::json!({"driver-path": entry.driver_path}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let req = test::TestRequest::post()
            .uri("/jobs/delete")
            .set_json(serde_json::json!({"app-path": entry.app_dir}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["fields"]["app-status"], "submitted");
        assert!(entry.app_dir.exists());
    }

    #[actix_web::test]
    async fn test_delete_missing_is_noop() {
        let temp = TempDir::new().unwrap();
        let service = job_service(&temp);
        let app = app!(service);
        let dir = temp.path().join("uploads/0099");

        let req = test::TestRequest::post()
            .uri("/jobs/delete")
            .set_json(serde_json::json!({"app-path": dir}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["removed"], false);
    }

    #[actix_web::test]
    async fn test_empty_driver_path_fails_validation() {
        let temp = TempDir::new().unwrap();
        let service = job_service(&temp);
        let app = app!(service);

        let req = test::TestRequest::post()
            .uri("/jobs/submit")
            .set_json(serde_json::json!({"driver-path": ""}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
