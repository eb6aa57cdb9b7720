use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};

use fulfill_infra::VendorCallback;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

/// Callback endpoint for asynchronous vendors.
///
/// Every well-formed callback is acknowledged with 200, including duplicate,
/// late and unknown ones; `outcome` says what happened to the job.
pub async fn vendor_webhook(
    Extension(services): Extension<Arc<AppServices>>,
    Path(vendor): Path<String>,
    body: Result<Json<VendorCallback>, JsonRejection>,
) -> axum::response::Response {
    let vendor = match errors::parse_vendor(&vendor) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Json(callback) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };

    tracing::info!(%vendor, job_id = %callback.job_id, success = callback.success, "webhook received");

    match services.webhooks.resolve(vendor, callback).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(dto::WebhookResponse {
                success: true,
                outcome,
            }),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
