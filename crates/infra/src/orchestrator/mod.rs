//! Job orchestration: drives each dispatch message through the job state
//! machine.
//!
//! ```text
//! load job ─▶ Processing ─▶ rate gate ─▶ vendor call ─┬─ sync:  Complete | Failed
//!                                                     └─ async: Processing + vendor_job_id
//! ```
//!
//! The orchestrator never backs off on its own. Transient failures are
//! returned as retryable [`DispatchFailure`]s and the queue redelivers.

pub mod reconcile;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use tracing::{Span, debug, info, warn};

use fulfill_core::{Document, Job, RequestId, Vendor, VendorJobId, sanitize};
use fulfill_queue::DispatchMessage;

use crate::rate_limit::{RateLimitError, RateLimiter};
use crate::store::{JobStore, JobStoreError, Mutated, Transition, update_with_retry};
use crate::vendors::{
    ASYNC_SUBMISSION_FAILURE, AsyncVendor, SYNC_FAILURE_DEFAULT, SyncVendor, VendorError,
};

pub use reconcile::{ExhaustionReconciler, exhaustion_message};
pub use worker::{OrchestratorConfig, OrchestratorHandle, OrchestratorStats};

/// Why a dispatch did not reach its normal end.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchFailure {
    #[error("job not found: {0}")]
    NotFound(RequestId),
    #[error("rate limit exceeded for {vendor} vendor")]
    RateLimitExceeded { vendor: Vendor, retry_after_ms: u64 },
    #[error("{0}")]
    VendorSubmissionFailure(String),
    #[error("{0}")]
    VendorBusinessFailure(String),
    #[error(transparent)]
    VendorTransportFailure(#[from] VendorError),
    #[error(transparent)]
    Store(#[from] JobStoreError),
    #[error(transparent)]
    RateLimiter(#[from] RateLimitError),
}

impl DispatchFailure {
    /// Whether the queue should redeliver the message.
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchFailure::NotFound(_)
            | DispatchFailure::VendorSubmissionFailure(_)
            | DispatchFailure::VendorBusinessFailure(_) => false,
            DispatchFailure::RateLimitExceeded { .. }
            | DispatchFailure::VendorTransportFailure(_)
            | DispatchFailure::Store(_)
            | DispatchFailure::RateLimiter(_) => true,
        }
    }

    /// Terminal failures are written into the job before they are reported.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DispatchFailure::VendorSubmissionFailure(_) | DispatchFailure::VendorBusinessFailure(_)
        )
    }
}

/// How a delivery was settled. Every variant is acknowledged on the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Sync vendor answered successfully; job is Complete.
    Completed,
    /// Async vendor accepted the job; it waits for the webhook.
    Submitted(VendorJobId),
    /// Vendor reported a failure; job is Failed with this text.
    Failed(String),
    /// Redelivery of a job that already finished.
    AlreadyTerminal,
    /// Redelivery of an async job whose submission was already recorded.
    AlreadySubmitted,
    /// Another writer finished the job while the vendor call was in flight.
    Superseded,
}

/// Consumes dispatch messages and drives jobs through their lifecycle.
pub struct JobOrchestrator {
    store: Arc<dyn JobStore>,
    rate_limiter: RateLimiter,
    sync_vendor: Arc<dyn SyncVendor>,
    async_vendor: Arc<dyn AsyncVendor>,
    vendor_timeout: Duration,
    stats: Arc<worker::StatsCounters>,
    span: Span,
}

impl core::fmt::Debug for JobOrchestrator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobOrchestrator")
            .field("rate_limiter", &self.rate_limiter)
            .field("vendor_timeout", &self.vendor_timeout)
            .finish_non_exhaustive()
    }
}

impl JobOrchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        rate_limiter: RateLimiter,
        sync_vendor: Arc<dyn SyncVendor>,
        async_vendor: Arc<dyn AsyncVendor>,
    ) -> Self {
        Self {
            store,
            rate_limiter,
            sync_vendor,
            async_vendor,
            vendor_timeout: Duration::from_secs(30),
            stats: Arc::new(worker::StatsCounters::default()),
            span: Span::none(),
        }
    }

    pub fn with_vendor_timeout(mut self, timeout: Duration) -> Self {
        self.vendor_timeout = timeout;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn stats(&self) -> OrchestratorStats {
        self.stats.snapshot()
    }

    /// Process one dispatch message.
    ///
    /// `Ok` means the delivery is settled (acknowledge it), whatever the job's
    /// outcome. `Err` carries the failure class; see
    /// [`DispatchFailure::is_retryable`].
    pub async fn process(&self, message: &DispatchMessage) -> Result<DispatchOutcome, DispatchFailure> {
        let request_id = message.request_id;
        let vendor = message.vendor;

        let accepted = match update_with_retry(&*self.store, request_id, |job| {
            if job.is_terminal() || job.is_awaiting_callback() {
                return Transition::Skip;
            }
            match job.begin_processing() {
                Ok(()) => Transition::Write,
                Err(_) => Transition::Skip,
            }
        })
        .await
        {
            Ok(mutated) => mutated,
            Err(JobStoreError::NotFound(id)) => {
                warn!(parent: &self.span, request_id = %id, "job not found for dispatch message");
                return Err(DispatchFailure::NotFound(id));
            }
            Err(err) => return Err(err.into()),
        };

        if let Mutated::Unchanged(job) = &accepted {
            if job.is_terminal() {
                debug!(parent: &self.span, %request_id, status = %job.status, "job already finished, skipping");
                return Ok(DispatchOutcome::AlreadyTerminal);
            }
            if job.is_awaiting_callback() {
                debug!(parent: &self.span, %request_id, "async job already submitted, skipping");
                return Ok(DispatchOutcome::AlreadySubmitted);
            }
        }

        let decision = self.rate_limiter.wait_for_availability(vendor).await?;
        if !decision.allowed {
            return Err(DispatchFailure::RateLimitExceeded {
                vendor,
                retry_after_ms: decision.retry_after().as_millis() as u64,
            });
        }

        match vendor {
            Vendor::Sync => self.dispatch_sync(request_id, &message.payload).await,
            Vendor::Async => self.dispatch_async(request_id, &message.payload).await,
        }
    }

    async fn dispatch_sync(
        &self,
        request_id: RequestId,
        payload: &Document,
    ) -> Result<DispatchOutcome, DispatchFailure> {
        let response = self
            .bounded(Vendor::Sync, self.sync_vendor.fetch(payload))
            .await?;

        if response.success {
            let result = sanitize(response.data.as_ref().unwrap_or(&Document::Null));
            let written = self
                .finish(request_id, |job| job.complete(result.clone()).is_ok())
                .await?;
            if written {
                info!(parent: &self.span, %request_id, vendor = "sync", "job completed");
                return Ok(DispatchOutcome::Completed);
            }
            return Ok(DispatchOutcome::Superseded);
        }

        let reason = response
            .error
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| SYNC_FAILURE_DEFAULT.to_string());
        self.record_failure(request_id, DispatchFailure::VendorBusinessFailure(reason))
            .await
    }

    async fn dispatch_async(
        &self,
        request_id: RequestId,
        payload: &Document,
    ) -> Result<DispatchOutcome, DispatchFailure> {
        let ack = self
            .bounded(Vendor::Async, self.async_vendor.submit(payload))
            .await?;

        let vendor_job_id = match ack.job_id.filter(|_| ack.success).map(VendorJobId::new) {
            Some(Ok(id)) => id,
            _ => {
                return self
                    .record_failure(
                        request_id,
                        DispatchFailure::VendorSubmissionFailure(ASYNC_SUBMISSION_FAILURE.to_string()),
                    )
                    .await;
            }
        };

        let written = self
            .finish(request_id, |job| job.record_submission(vendor_job_id.clone()).is_ok())
            .await?;
        if !written {
            return Ok(DispatchOutcome::Superseded);
        }
        info!(
            parent: &self.span,
            %request_id,
            vendor = "async",
            vendor_job_id = %vendor_job_id,
            estimated_completion = ack.estimated_completion_time.as_deref().unwrap_or(""),
            "job submitted, awaiting callback"
        );
        Ok(DispatchOutcome::Submitted(vendor_job_id))
    }

    async fn record_failure(
        &self,
        request_id: RequestId,
        failure: DispatchFailure,
    ) -> Result<DispatchOutcome, DispatchFailure> {
        let reason = failure.to_string();
        let written = self
            .finish(request_id, |job| job.fail(reason.clone()).is_ok())
            .await?;
        if !written {
            return Ok(DispatchOutcome::Superseded);
        }
        warn!(parent: &self.span, %request_id, error = %reason, "job failed");
        Ok(DispatchOutcome::Failed(reason))
    }

    /// Apply a transition unless the job already reached a terminal state.
    /// Returns whether it was written.
    async fn finish<F>(&self, request_id: RequestId, mut apply: F) -> Result<bool, DispatchFailure>
    where
        F: FnMut(&mut Job) -> bool + Send,
    {
        let mutated = update_with_retry(&*self.store, request_id, |job| {
            if job.is_terminal() || !apply(job) {
                Transition::Skip
            } else {
                Transition::Write
            }
        })
        .await?;

        if !mutated.was_updated() {
            debug!(
                parent: &self.span,
                %request_id,
                status = %mutated.job().status,
                "job changed underneath the dispatch, result dropped"
            );
        }
        Ok(mutated.was_updated())
    }

    async fn bounded<T, F>(&self, vendor: Vendor, call: F) -> Result<T, DispatchFailure>
    where
        F: std::future::Future<Output = Result<T, VendorError>>,
    {
        match tokio::time::timeout(self.vendor_timeout, call).await {
            Ok(result) => result.map_err(|err| {
                warn!(parent: &self.span, %vendor, error = %err, "vendor call failed");
                DispatchFailure::VendorTransportFailure(err)
            }),
            Err(_) => {
                let ms = self.vendor_timeout.as_millis() as u64;
                warn!(parent: &self.span, %vendor, timeout_ms = ms, "vendor call timed out");
                Err(DispatchFailure::VendorTransportFailure(VendorError::Timeout(ms)))
            }
        }
    }
}
