use axum::{
    Router,
    routing::{get, post},
};

pub mod jobs;
pub mod system;
pub mod webhooks;

/// Router for every endpoint the service exposes.
pub fn router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/metrics", get(system::metrics))
        .route("/jobs", post(jobs::submit_job))
        .route("/jobs/:request_id", get(jobs::get_job))
        .route("/vendor-webhook/:vendor", post(webhooks::vendor_webhook))
}
