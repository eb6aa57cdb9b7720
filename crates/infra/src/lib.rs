//! Infrastructure layer: job stores, rate limiting, vendor clients and the
//! orchestration engine built on them.

pub mod orchestrator;
pub mod rate_limit;
pub mod service;
pub mod store;
pub mod vendors;
pub mod webhook;


pub use orchestrator::{
    DispatchFailure, DispatchOutcome, ExhaustionReconciler, JobOrchestrator, OrchestratorConfig,
    OrchestratorHandle, OrchestratorStats,
};
pub use rate_limit::{RateLimit, RateLimitDecision, RateLimitError, RateLimiter};
pub use service::{JobService, RoutingPolicy, ServiceError};
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError, PostgresJobStore};
pub use webhook::{ResolveOutcome, VendorCallback, WebhookResolver};
