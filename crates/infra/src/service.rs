//! Submission and status queries.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{Span, info, warn};

use fulfill_core::{Document, Job, RequestId, Vendor, document};
use fulfill_queue::{DispatchMessage, DispatchQueue, QueueError, QueueStats};

use crate::store::{JobStats, JobStore, JobStoreError, Transition, update_with_retry};

/// Default cap on an encoded submission (10 MiB).
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("job not found: {0}")]
    NotFound(RequestId),
    #[error(transparent)]
    Store(#[from] JobStoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// How a submission without an explicit vendor is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingPolicy {
    /// Alternate between vendors.
    #[default]
    RoundRobin,
    Always(Vendor),
}

pub struct JobService {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn DispatchQueue>,
    routing: RoutingPolicy,
    next_vendor: AtomicUsize,
    max_payload_bytes: usize,
    span: Span,
}

impl JobService {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn DispatchQueue>) -> Self {
        Self {
            store,
            queue,
            routing: RoutingPolicy::default(),
            next_vendor: AtomicUsize::new(0),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            span: Span::none(),
        }
    }

    pub fn with_routing(mut self, routing: RoutingPolicy) -> Self {
        self.routing = routing;
        self
    }

    pub fn with_max_payload_bytes(mut self, limit: usize) -> Self {
        self.max_payload_bytes = limit;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn max_payload_bytes(&self) -> usize {
        self.max_payload_bytes
    }

    fn route(&self) -> Vendor {
        match self.routing {
            RoutingPolicy::Always(vendor) => vendor,
            RoutingPolicy::RoundRobin => {
                let n = self.next_vendor.fetch_add(1, Ordering::Relaxed);
                Vendor::ALL[n % Vendor::ALL.len()]
            }
        }
    }

    /// Create a pending job and enqueue it. Returns as soon as the job is
    /// queued; processing happens in the background.
    pub async fn submit(&self, payload: Document, vendor: Option<Vendor>) -> Result<RequestId, ServiceError> {
        let size = document::encoded_len(&payload);
        if size > self.max_payload_bytes {
            warn!(parent: &self.span, size, limit = self.max_payload_bytes, "payload rejected");
            return Err(ServiceError::PayloadTooLarge {
                size,
                limit: self.max_payload_bytes,
            });
        }

        let vendor = vendor.unwrap_or_else(|| self.route());

        let job = self.store.create(Job::new(payload.clone(), vendor)).await?;
        let request_id = job.request_id;
        info!(parent: &self.span, %request_id, %vendor, payload_size = size, "job submission received");

        if let Err(err) = self
            .queue
            .enqueue(DispatchMessage::new(request_id, vendor, payload))
            .await
        {
            warn!(parent: &self.span, %request_id, error = %err, "failed to enqueue job");
            let reason = format!("Failed to enqueue job: {err}");
            let recorded = update_with_retry(&*self.store, request_id, |job| {
                if job.is_terminal() {
                    return Transition::Skip;
                }
                match job.fail(reason.clone()) {
                    Ok(()) => Transition::Write,
                    Err(_) => Transition::Skip,
                }
            })
            .await;
            if let Err(store_err) = recorded {
                warn!(
                    parent: &self.span,
                    %request_id,
                    error = %store_err,
                    "failed to record enqueue failure on job"
                );
            }
            return Err(err.into());
        }

        Ok(request_id)
    }

    pub async fn status(&self, request_id: RequestId) -> Result<Job, ServiceError> {
        self.store
            .find_by_request_id(request_id)
            .await?
            .ok_or(ServiceError::NotFound(request_id))
    }

    pub async fn job_stats(&self) -> Result<JobStats, ServiceError> {
        Ok(self.store.stats().await?)
    }

    pub async fn queue_stats(&self) -> Result<QueueStats, ServiceError> {
        Ok(self.queue.stats().await?)
    }
}
