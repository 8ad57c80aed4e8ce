use actix_web::{HttpRequest, HttpResponse};
use serde::Serialize;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub fields: serde_json::Value,
}

/// Creates a configured JsonConfig with standardized error handling for the entire project
pub fn json_config() -> actix_web_validator::JsonConfig {
    actix_web_validator::JsonConfig::default().error_handler(validation_error)
}

/// Same error shape for query strings (`app-path`, `offset`, `count`)
pub fn query_config() -> actix_web_validator::QueryConfig {
    actix_web_validator::QueryConfig::default().error_handler(validation_error)
}

fn validation_error(err: actix_web_validator::Error, _req: &HttpRequest) -> actix_web::Error {
    let mut fields = serde_json::Map::new();

    let error = match err {
        actix_web_validator::Error::Validate(validation_errors) => {
            for (field, errors) in validation_errors.field_errors() {
                let messages: Vec<String> = errors
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| format!("Validation error in field: {}", field))
                    })
                    .collect();
                fields.insert(field.to_string(), serde_json::json!({"errors": messages}));
            }
            "Validation failed"
        }
        actix_web_validator::Error::Deserialize(de_err) => {
            let err_string = de_err.to_string();

            let message = if err_string.contains("EOF while parsing") {
                "Request body is empty. Expected JSON payload"
            } else if err_string.contains("missing field") {
                "A required field is missing (driver-path, app-path or dst-path)"
            } else if err_string.contains("invalid digit") || err_string.contains("invalid type") {
                "offset and count must be non-negative integers"
            } else {
                "Invalid request format"
            };
            fields.insert("message".to_string(), serde_json::json!(message));
            "Request validation failed"
        }
        _ => {
            fields.insert("message".to_string(), serde_json::json!("Validation error"));
            "Validation failed"
        }
    };

    let error_response = ErrorResponse {
        error: error.to_string(),
        fields: serde_json::Value::Object(fields),
    };
    actix_web::error::InternalError::from_response("", HttpResponse::BadRequest().json(error_response))
        .into()
}
