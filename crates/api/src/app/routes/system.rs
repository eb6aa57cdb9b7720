use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use chrono::Utc;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    Json(dto::HealthResponse {
        status: "healthy",
        timestamp: Utc::now(),
        uptime_secs: services.uptime_secs(),
    })
}

pub async fn metrics(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    let jobs = match services.jobs.job_stats().await {
        Ok(stats) => stats,
        Err(e) => return errors::service_error_to_response(e),
    };
    let queue = match services.jobs.queue_stats().await {
        Ok(stats) => stats,
        Err(e) => return errors::service_error_to_response(e),
    };

    (
        StatusCode::OK,
        Json(dto::MetricsResponse {
            jobs,
            queue,
            orchestrator: services.orchestrator.stats(),
            system: dto::SystemMetrics {
                uptime_secs: services.uptime_secs(),
                timestamp: Utc::now(),
            },
        }),
    )
        .into_response()
}
