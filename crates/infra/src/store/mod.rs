//! Job persistence.
//!
//! The store is the single source of truth for job state and the only
//! synchronization point between workers, the webhook resolver and the
//! exhaustion reconciler. There is no in-process shared job state.
//!
//! ## Concurrency
//!
//! `update` is a compare-and-swap on [`Job::version`]: the write succeeds only
//! if the stored version still equals the version the caller loaded, and the
//! stored version is then incremented. A stale write fails with
//! [`JobStoreError::Conflict`]; [`update_with_retry`] reloads and re-applies
//! the transition.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use fulfill_core::{Job, JobStatus, RequestId, VendorJobId};

pub use in_memory::InMemoryJobStore;
pub use postgres::PostgresJobStore;

/// Attempts made by [`update_with_retry`] before giving up on a contended job.
pub const MAX_CONFLICT_RETRIES: usize = 5;

#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(RequestId),
    #[error("job already exists: {0}")]
    AlreadyExists(RequestId),
    #[error("job {request_id} was modified concurrently (expected version {expected})")]
    Conflict { request_id: RequestId, expected: u64 },
    #[error("storage error: {0}")]
    Storage(String),
}

/// Job counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub total: u64,
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl JobStats {
    pub fn record(&mut self, status: JobStatus, count: u64) {
        self.total += count;
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Processing => self.processing += count,
            JobStatus::Complete => self.completed += count,
            JobStatus::Failed => self.failed += count,
        }
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job. Fails with `AlreadyExists` on a duplicate request id.
    async fn create(&self, job: Job) -> Result<Job, JobStoreError>;

    async fn find_by_request_id(&self, request_id: RequestId) -> Result<Option<Job>, JobStoreError>;

    async fn find_by_vendor_job_id(
        &self,
        vendor_job_id: &VendorJobId,
    ) -> Result<Option<Job>, JobStoreError>;

    /// Compare-and-swap on `job.version`. Returns the stored job carrying its
    /// new version.
    async fn update(&self, job: &Job) -> Result<Job, JobStoreError>;

    async fn stats(&self) -> Result<JobStats, JobStoreError>;
}

#[async_trait]
impl<S> JobStore for std::sync::Arc<S>
where
    S: JobStore + ?Sized,
{
    async fn create(&self, job: Job) -> Result<Job, JobStoreError> {
        (**self).create(job).await
    }

    async fn find_by_request_id(&self, request_id: RequestId) -> Result<Option<Job>, JobStoreError> {
        (**self).find_by_request_id(request_id).await
    }

    async fn find_by_vendor_job_id(
        &self,
        vendor_job_id: &VendorJobId,
    ) -> Result<Option<Job>, JobStoreError> {
        (**self).find_by_vendor_job_id(vendor_job_id).await
    }

    async fn update(&self, job: &Job) -> Result<Job, JobStoreError> {
        (**self).update(job).await
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        (**self).stats().await
    }
}

/// What a transition closure decided after inspecting the freshly loaded job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The job was mutated; persist it.
    Write,
    /// Leave the stored job as it is.
    Skip,
}

/// Result of [`update_with_retry`].
#[derive(Debug, Clone, PartialEq)]
pub enum Mutated {
    Updated(Job),
    Unchanged(Job),
}

impl Mutated {
    pub fn job(&self) -> &Job {
        match self {
            Mutated::Updated(job) | Mutated::Unchanged(job) => job,
        }
    }

    pub fn into_job(self) -> Job {
        match self {
            Mutated::Updated(job) | Mutated::Unchanged(job) => job,
        }
    }

    pub fn was_updated(&self) -> bool {
        matches!(self, Mutated::Updated(_))
    }
}

/// Load the job, let `apply` mutate it, and write it back with CAS.
///
/// On `Conflict` the job is reloaded and `apply` runs again against the newer
/// state, so a transition is always decided on the latest stored version.
pub async fn update_with_retry<S, F>(
    store: &S,
    request_id: RequestId,
    mut apply: F,
) -> Result<Mutated, JobStoreError>
where
    S: JobStore + ?Sized,
    F: FnMut(&mut Job) -> Transition + Send,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut job = store
            .find_by_request_id(request_id)
            .await?
            .ok_or(JobStoreError::NotFound(request_id))?;

        if apply(&mut job) == Transition::Skip {
            return Ok(Mutated::Unchanged(job));
        }

        match store.update(&job).await {
            Ok(stored) => return Ok(Mutated::Updated(stored)),
            Err(JobStoreError::Conflict { expected, .. }) if attempt < MAX_CONFLICT_RETRIES => {
                debug!(%request_id, expected, attempt, "job update conflicted, reloading");
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use fulfill_core::Vendor;
    use serde_json::json;

    use super::*;

    /// Lets a competing writer slip in before the first update.
    struct RacingStore {
        inner: InMemoryJobStore,
        raced: AtomicBool,
    }

    #[async_trait]
    impl JobStore for RacingStore {
        async fn create(&self, job: Job) -> Result<Job, JobStoreError> {
            self.inner.create(job).await
        }

        async fn find_by_request_id(&self, id: RequestId) -> Result<Option<Job>, JobStoreError> {
            self.inner.find_by_request_id(id).await
        }

        async fn find_by_vendor_job_id(&self, id: &VendorJobId) -> Result<Option<Job>, JobStoreError> {
            self.inner.find_by_vendor_job_id(id).await
        }

        async fn update(&self, job: &Job) -> Result<Job, JobStoreError> {
            if !self.raced.swap(true, Ordering::SeqCst) {
                let mut other = self.inner.find_by_request_id(job.request_id).await?.unwrap();
                other.begin_processing().unwrap();
                self.inner.update(&other).await?;
            }
            self.inner.update(job).await
        }

        async fn stats(&self) -> Result<JobStats, JobStoreError> {
            self.inner.stats().await
        }
    }

    #[tokio::test]
    async fn update_with_retry_reapplies_after_conflict() {
        let store = RacingStore {
            inner: InMemoryJobStore::new(),
            raced: AtomicBool::new(false),
        };
        let job = store.create(Job::new(json!({}), Vendor::Sync)).await.unwrap();

        let mut calls = 0;
        let out = update_with_retry(&store, job.request_id, |job| {
            calls += 1;
            match job.fail("boom") {
                Ok(()) => Transition::Write,
                Err(_) => Transition::Skip,
            }
        })
        .await
        .unwrap();

        assert_eq!(calls, 2);
        assert!(out.was_updated());
        let stored = out.into_job();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.version, 2);
        // The competing write survives underneath the re-applied transition.
        assert!(stored.processed_at.is_some());
    }

    #[tokio::test]
    async fn update_with_retry_skips_terminal_jobs() {
        let store = InMemoryJobStore::new();
        let mut job = store.create(Job::new(json!({}), Vendor::Sync)).await.unwrap();
        job.fail("first").unwrap();
        store.update(&job).await.unwrap();

        let out = update_with_retry(&store, job.request_id, |job| {
            if job.is_terminal() {
                return Transition::Skip;
            }
            job.fail("second").unwrap();
            Transition::Write
        })
        .await
        .unwrap();

        assert!(!out.was_updated());
        assert_eq!(out.job().error.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn update_with_retry_reports_missing_job() {
        let store = InMemoryJobStore::new();
        let id = RequestId::new();
        let err = update_with_retry(&store, id, |_| Transition::Write).await.unwrap_err();
        assert!(matches!(err, JobStoreError::NotFound(missing) if missing == id));
    }

    #[test]
    fn stats_record_by_status() {
        let mut stats = JobStats::default();
        stats.record(JobStatus::Pending, 2);
        stats.record(JobStatus::Complete, 3);
        stats.record(JobStatus::Failed, 1);
        assert_eq!(
            stats,
            JobStats { total: 6, pending: 2, processing: 0, completed: 3, failed: 1 }
        );
    }
}
