//! Infrastructure wiring: store, queue, rate limiter, vendors and the
//! orchestrator, assembled from [`Settings`].

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, info_span};

use fulfill_infra::rate_limit::{InMemoryWindowStore, WindowStore};
use fulfill_infra::vendors::http::{HttpAsyncVendor, HttpSyncVendor, HttpVendorClient};
use fulfill_infra::vendors::{AsyncVendor, SyncVendor};
use fulfill_infra::{
    InMemoryJobStore, JobOrchestrator, JobService, JobStore, OrchestratorConfig, OrchestratorHandle,
    PostgresJobStore, RateLimit, RateLimiter, WebhookResolver,
};
use fulfill_queue::{DispatchQueue, InMemoryDispatchQueue, RetryPolicy};

use crate::config::Settings;

/// The two vendor capabilities the orchestrator dispatches to.
#[derive(Clone)]
pub struct VendorClients {
    pub sync: Arc<dyn SyncVendor>,
    pub async_vendor: Arc<dyn AsyncVendor>,
}

impl VendorClients {
    /// reqwest clients pointed at the configured vendor base URLs.
    pub fn http(settings: &Settings) -> Self {
        Self {
            sync: Arc::new(HttpSyncVendor::new(HttpVendorClient::new(
                settings.sync_vendor_url.clone(),
                settings.vendor_timeout,
            ))),
            async_vendor: Arc::new(HttpAsyncVendor::new(HttpVendorClient::new(
                settings.async_vendor_url.clone(),
                settings.vendor_timeout,
            ))),
        }
    }
}

/// Everything the HTTP handlers need.
pub struct AppServices {
    pub jobs: JobService,
    pub webhooks: WebhookResolver,
    pub orchestrator: Arc<JobOrchestrator>,
    queue: Arc<dyn DispatchQueue>,
    orchestrator_config: OrchestratorConfig,
    started_at: Instant,
}

impl AppServices {
    /// Start consuming the dispatch queue. Call once per process.
    pub fn spawn_orchestrator(&self) -> OrchestratorHandle {
        self.orchestrator
            .clone()
            .spawn(self.queue.clone(), self.orchestrator_config.clone())
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Wire services for `settings` using the given vendor capabilities.
///
/// `DATABASE_URL` selects the Postgres store, `REDIS_URL` (with the `redis`
/// feature) the shared rate-limit window; otherwise both live in memory.
pub async fn build_services(settings: &Settings, vendors: VendorClients) -> anyhow::Result<AppServices> {
    let store = build_store(settings).await?;
    let windows = build_window_store(settings).await?;

    let queue: Arc<dyn DispatchQueue> = Arc::new(InMemoryDispatchQueue::new(RetryPolicy {
        max_attempts: settings.queue_max_attempts,
        base_delay: settings.queue_backoff,
        ..RetryPolicy::default()
    }));

    let rate_limiter = RateLimiter::new(
        windows,
        RateLimit::new(settings.rate_limit_requests, settings.rate_limit_window),
    )
    .with_span(info_span!("rate_limiter"));

    let orchestrator = Arc::new(
        JobOrchestrator::new(store.clone(), rate_limiter, vendors.sync, vendors.async_vendor)
            .with_vendor_timeout(settings.vendor_timeout)
            .with_span(info_span!("orchestrator")),
    );

    let jobs = JobService::new(store.clone(), queue.clone())
        .with_max_payload_bytes(settings.max_payload_bytes)
        .with_span(info_span!("job_service"));
    let webhooks = WebhookResolver::new(store).with_span(info_span!("webhook"));

    Ok(AppServices {
        jobs,
        webhooks,
        orchestrator,
        queue,
        orchestrator_config: OrchestratorConfig::default()
            .with_concurrency(settings.worker_concurrency)
            .with_stats_interval(settings.queue_stats_interval),
        started_at: Instant::now(),
    })
}

async fn build_store(settings: &Settings) -> anyhow::Result<Arc<dyn JobStore>> {
    match &settings.database_url {
        Some(url) => {
            let store = PostgresJobStore::connect(url).await?;
            store.ensure_schema().await?;
            info!("using postgres job store");
            Ok(Arc::new(store))
        }
        None => {
            info!("DATABASE_URL not set; using in-memory job store");
            Ok(Arc::new(InMemoryJobStore::new()))
        }
    }
}

#[cfg(feature = "redis")]
async fn build_window_store(settings: &Settings) -> anyhow::Result<Arc<dyn WindowStore>> {
    use fulfill_infra::rate_limit::RedisWindowStore;

    match &settings.redis_url {
        Some(url) => {
            let store = RedisWindowStore::connect(url).await?;
            info!("using redis rate-limit window");
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(InMemoryWindowStore::new())),
    }
}

#[cfg(not(feature = "redis"))]
async fn build_window_store(settings: &Settings) -> anyhow::Result<Arc<dyn WindowStore>> {
    if settings.redis_url.is_some() {
        tracing::warn!("REDIS_URL set but built without the `redis` feature; rate limits are per process");
    }
    Ok(Arc::new(InMemoryWindowStore::new()))
}
