use actix_web::{HttpResponse, Responder, get, web};
use serde::Serialize;
use tracing::error;

use crate::api::job::JobService;

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    uploads: String,
    in_flight: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Health check endpoint
///
/// Verifies the uploads root is an accessible directory and reports how
/// many submitted jobs are still running.
#[get("/health")]
async fn health_check(service: web::Data<JobService>) -> impl Responder {
    let in_flight = service.runner().in_flight();
    let root = service.uploads_root();

    match tokio::fs::metadata(root).await {
        Ok(meta) if meta.is_dir() => HttpResponse::Ok().json(HealthResponse {
            status: "healthy".to_string(),
            uploads: "accessible".to_string(),
            in_flight,
            error: None,
        }),
        Ok(_) => {
            error!("Health check failed: {} is not a directory", root.display());
            HttpResponse::ServiceUnavailable().json(HealthResponse {
                status: "unhealthy".to_string(),
                uploads: "not_a_directory".to_string(),
                in_flight,
                error: Some(format!("{} is not a directory", root.display())),
            })
        }
        Err(e) => {
            error!("Health check failed: {:?}", e);
            HttpResponse::ServiceUnavailable().json(HealthResponse {
                status: "unhealthy".to_string(),
                uploads: "unavailable".to_string(),
                in_flight,
                error: Some(format!("Uploads directory error: {}", e)),
            })
        }
    }
}

/// Liveness check endpoint
///
/// Simple check that the process is alive. Does not touch the filesystem.
#[get("/live")]
async fn liveness_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({"status": "alive"}))
}

pub fn health_config(config: &mut web::ServiceConfig) {
    config.service(health_check).service(liveness_check);
}
