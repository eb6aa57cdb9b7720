use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, Query, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};

use fulfill_core::Document;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub async fn submit_job(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::SubmitJobQuery>,
    body: Result<Json<Document>, JsonRejection>,
) -> axum::response::Response {
    let Json(payload) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };
    let vendor = match query.vendor.as_deref().map(errors::parse_vendor).transpose() {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.jobs.submit(payload, vendor).await {
        Ok(request_id) => (
            StatusCode::OK,
            Json(dto::SubmitJobResponse { request_id }),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(request_id): Path<String>,
) -> axum::response::Response {
    let request_id = match errors::parse_request_id(&request_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.jobs.status(request_id).await {
        Ok(job) => (StatusCode::OK, Json(dto::JobStatusResponse::from(job))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
