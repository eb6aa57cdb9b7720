//! Completion handler for the asynchronous vendor.
//!
//! Callbacks are delivered at least once and may arrive late. Whatever arrives,
//! the resolver never errors towards the vendor for an unknown or finished job
//! and never re-mutates a terminal job.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{Span, info, warn};

use fulfill_core::{Document, JobStatus, RequestId, Vendor, VendorJobId, sanitize};

use crate::store::{JobStore, JobStoreError, Mutated, Transition, update_with_retry};

/// Text recorded when a failure callback carries no error.
pub const WEBHOOK_FAILURE_DEFAULT: &str = "Unknown error from vendor";

/// Body posted by the vendor to `/vendor-webhook/{vendor}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorCallback {
    #[serde(alias = "job_id")]
    pub job_id: String,
    pub success: bool,
    #[serde(default)]
    pub data: Option<Document>,
    #[serde(default)]
    pub error: Option<String>,
}

/// What the resolver did with a callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResolveOutcome {
    Completed { request_id: RequestId },
    Failed { request_id: RequestId },
    /// No job carries this vendor job id.
    UnknownJob,
    /// The job already reached `status`; the callback was ignored.
    AlreadyTerminal { request_id: RequestId, status: JobStatus },
    /// The callback arrived on another vendor's path.
    VendorMismatch { request_id: RequestId, expected: Vendor },
}

impl ResolveOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ResolveOutcome::Completed { .. } | ResolveOutcome::Failed { .. })
    }
}

pub struct WebhookResolver {
    store: Arc<dyn JobStore>,
    span: Span,
}

impl WebhookResolver {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            span: Span::none(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Apply a callback received on the `vendor` path.
    ///
    /// Only storage failures are errors; every other case is an outcome.
    ///
    /// The vendor job id becomes findable only once the orchestrator has
    /// persisted `record_submission`. A callback that beats that write (the
    /// vendor answers before the submit call returns to us) resolves as
    /// [`ResolveOutcome::UnknownJob`] and is dropped; the job then stays
    /// `Processing` until the vendor redelivers the callback.
    pub async fn resolve(
        &self,
        vendor: Vendor,
        callback: VendorCallback,
    ) -> Result<ResolveOutcome, JobStoreError> {
        let Ok(vendor_job_id) = VendorJobId::new(callback.job_id.as_str()) else {
            warn!(parent: &self.span, %vendor, "webhook without a job id");
            return Ok(ResolveOutcome::UnknownJob);
        };

        let Some(job) = self.store.find_by_vendor_job_id(&vendor_job_id).await? else {
            warn!(parent: &self.span, %vendor, %vendor_job_id, "webhook for unknown job");
            return Ok(ResolveOutcome::UnknownJob);
        };
        let request_id = job.request_id;

        if job.vendor != vendor {
            warn!(
                parent: &self.span,
                %request_id,
                %vendor_job_id,
                path_vendor = %vendor,
                job_vendor = %job.vendor,
                "webhook vendor does not match job"
            );
            return Ok(ResolveOutcome::VendorMismatch {
                request_id,
                expected: job.vendor,
            });
        }

        let success = callback.success;
        let result = success.then(|| sanitize(callback.data.as_ref().unwrap_or(&Document::Null)));
        let reason = callback
            .error
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| WEBHOOK_FAILURE_DEFAULT.to_string());

        let mutated = update_with_retry(&*self.store, request_id, |job| {
            if job.is_terminal() {
                return Transition::Skip;
            }
            let applied = match &result {
                Some(result) => job.complete(result.clone()),
                None => job.fail(reason.clone()),
            };
            if applied.is_ok() {
                Transition::Write
            } else {
                Transition::Skip
            }
        })
        .await;

        let job = match mutated {
            Ok(Mutated::Updated(job)) => job,
            Ok(Mutated::Unchanged(job)) => {
                info!(
                    parent: &self.span,
                    %request_id,
                    %vendor_job_id,
                    status = %job.status,
                    "duplicate or late webhook ignored"
                );
                return Ok(ResolveOutcome::AlreadyTerminal {
                    request_id,
                    status: job.status,
                });
            }
            // Only reachable if the job vanished between the two reads.
            Err(JobStoreError::NotFound(_)) => return Ok(ResolveOutcome::UnknownJob),
            Err(err) => return Err(err),
        };

        info!(
            parent: &self.span,
            %request_id,
            %vendor,
            %vendor_job_id,
            status = %job.status,
            "job updated from webhook"
        );
        Ok(if success {
            ResolveOutcome::Completed { request_id }
        } else {
            ResolveOutcome::Failed { request_id }
        })
    }
}

#[cfg(test)]
mod tests {
    use fulfill_core::Job;
    use serde_json::json;

    use super::*;
    use crate::store::InMemoryJobStore;

    async fn submitted_job(store: &Arc<InMemoryJobStore>, vendor_job_id: &str) -> Job {
        let mut job = store.create(Job::new(json!({}), Vendor::Async)).await.unwrap();
        job.begin_processing().unwrap();
        job.record_submission(VendorJobId::new(vendor_job_id).unwrap()).unwrap();
        store.update(&job).await.unwrap()
    }

    fn callback(job_id: &str, success: bool, data: Option<Document>, error: Option<&str>) -> VendorCallback {
        VendorCallback {
            job_id: job_id.to_string(),
            success,
            data,
            error: error.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn success_completes_with_sanitized_data() {
        let store = InMemoryJobStore::arc();
        let job = submitted_job(&store, "v-1").await;
        let resolver = WebhookResolver::new(store.clone());

        let out = resolver
            .resolve(
                Vendor::Async,
                callback("v-1", true, Some(json!({"passwordHash": "h", "email": "X@Y.COM"})), None),
            )
            .await
            .unwrap();
        assert_eq!(out, ResolveOutcome::Completed { request_id: job.request_id });

        let stored = store.find_by_request_id(job.request_id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Complete);
        assert_eq!(stored.result, Some(json!({"email": "x@y.com"})));
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn failure_uses_default_text() {
        let store = InMemoryJobStore::arc();
        let job = submitted_job(&store, "v-2").await;
        let resolver = WebhookResolver::new(store.clone());

        let out = resolver
            .resolve(Vendor::Async, callback("v-2", false, None, None))
            .await
            .unwrap();
        assert_eq!(out, ResolveOutcome::Failed { request_id: job.request_id });

        let stored = store.find_by_request_id(job.request_id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some(WEBHOOK_FAILURE_DEFAULT));
        assert!(stored.result.is_none());
    }

    #[tokio::test]
    async fn second_callback_is_a_no_op() {
        let store = InMemoryJobStore::arc();
        let job = submitted_job(&store, "v-3").await;
        let resolver = WebhookResolver::new(store.clone());

        resolver
            .resolve(Vendor::Async, callback("v-3", true, Some(json!({"a": 1})), None))
            .await
            .unwrap();
        let before = store.find_by_request_id(job.request_id).await.unwrap().unwrap();

        let out = resolver
            .resolve(Vendor::Async, callback("v-3", false, None, Some("late failure")))
            .await
            .unwrap();
        assert_eq!(
            out,
            ResolveOutcome::AlreadyTerminal { request_id: job.request_id, status: JobStatus::Complete }
        );
        let after = store.find_by_request_id(job.request_id).await.unwrap().unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn unknown_job_is_not_an_error() {
        let store = InMemoryJobStore::arc();
        let resolver = WebhookResolver::new(store);
        assert_eq!(
            resolver
                .resolve(Vendor::Async, callback("nope", true, None, None))
                .await
                .unwrap(),
            ResolveOutcome::UnknownJob
        );
        assert_eq!(
            resolver
                .resolve(Vendor::Async, callback("  ", true, None, None))
                .await
                .unwrap(),
            ResolveOutcome::UnknownJob
        );
    }

    #[tokio::test]
    async fn callback_before_submission_is_recorded_is_unknown_until_redelivered() {
        let store = InMemoryJobStore::arc();
        let mut job = store.create(Job::new(json!({}), Vendor::Async)).await.unwrap();
        job.begin_processing().unwrap();
        let job = store.update(&job).await.unwrap();
        let resolver = WebhookResolver::new(store.clone());

        let early = resolver
            .resolve(Vendor::Async, callback("v-9", true, Some(json!({"a": 1})), None))
            .await
            .unwrap();
        assert_eq!(early, ResolveOutcome::UnknownJob);
        let stored = store.find_by_request_id(job.request_id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Processing);

        let mut stored = stored;
        stored.record_submission(VendorJobId::new("v-9").unwrap()).unwrap();
        store.update(&stored).await.unwrap();

        let redelivered = resolver
            .resolve(Vendor::Async, callback("v-9", true, Some(json!({"a": 1})), None))
            .await
            .unwrap();
        assert_eq!(redelivered, ResolveOutcome::Completed { request_id: job.request_id });
    }

    #[tokio::test]
    async fn callback_on_wrong_vendor_path_is_ignored() {
        let store = InMemoryJobStore::arc();
        let job = submitted_job(&store, "v-4").await;
        let resolver = WebhookResolver::new(store.clone());

        let out = resolver
            .resolve(Vendor::Sync, callback("v-4", true, None, None))
            .await
            .unwrap();
        assert!(matches!(out, ResolveOutcome::VendorMismatch { expected: Vendor::Async, .. }));
        let stored = store.find_by_request_id(job.request_id).await.unwrap().unwrap();
        assert!(stored.is_awaiting_callback());
    }

    #[test]
    fn callback_body_uses_vendor_field_names() {
        let cb: VendorCallback = serde_json::from_value(json!({
            "jobId": "abc",
            "success": false,
            "error": "Async vendor processing failed",
            "code": "ASYNC_VENDOR_ERROR"
        }))
        .unwrap();
        assert_eq!(cb.job_id, "abc");
        assert!(cb.data.is_none());
    }
}
