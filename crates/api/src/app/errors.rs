use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use fulfill_core::{RequestId, Vendor};
use fulfill_infra::{JobStoreError, ServiceError};

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    match err {
        ServiceError::NotFound(id) => json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("job {id} not found"),
        ),
        ServiceError::PayloadTooLarge { .. } => {
            json_error(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", err.to_string())
        }
        ServiceError::Store(e) => store_error_to_response(e),
        ServiceError::Queue(e) => {
            tracing::error!(error = %e, "dispatch queue unavailable");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "queue_unavailable", e.to_string())
        }
    }
}

pub fn store_error_to_response(err: JobStoreError) -> axum::response::Response {
    match err {
        JobStoreError::NotFound(id) => json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("job {id} not found"),
        ),
        JobStoreError::Conflict { .. } | JobStoreError::AlreadyExists(_) => {
            json_error(StatusCode::CONFLICT, "conflict", err.to_string())
        }
        JobStoreError::Storage(msg) => {
            tracing::error!(error = %msg, "job store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}

pub fn json_rejection_to_response(rejection: JsonRejection) -> axum::response::Response {
    let status = rejection.status();
    let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
        "payload_too_large"
    } else {
        "invalid_payload"
    };
    json_error(status, code, rejection.body_text())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn parse_request_id(s: &str) -> Result<RequestId, axum::response::Response> {
    s.parse::<RequestId>().map_err(|_| {
        json_error(
            StatusCode::BAD_REQUEST,
            "invalid_request_id",
            format!("`{s}` is not a valid request id"),
        )
    })
}

pub fn parse_vendor(s: &str) -> Result<Vendor, axum::response::Response> {
    s.to_lowercase().parse::<Vendor>().map_err(|_| {
        json_error(
            StatusCode::BAD_REQUEST,
            "invalid_vendor",
            "vendor must be one of: sync, async",
        )
    })
}
