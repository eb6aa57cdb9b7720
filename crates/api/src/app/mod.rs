//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: infrastructure wiring (store, queue, rate limiter, vendors)
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, extract::DefaultBodyLimit};
use tower::ServiceBuilder;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, VendorClients, build_services};

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<AppServices>) -> Router {
    let body_limit = services.jobs.max_payload_bytes();

    routes::router().layer(
        ServiceBuilder::new()
            .layer(DefaultBodyLimit::max(body_limit))
            .layer(Extension(services)),
    )
}
