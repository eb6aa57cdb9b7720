//! Fulfillment job entity and its lifecycle state machine.
//!
//! ```text
//! Pending ──accept──▶ Processing ──sync success──────▶ Complete
//!                         │ │ └────sync failure──────▶ Failed
//!                         │ └──async submitted──▶ Processing (awaiting callback)
//!                         │                          ├──callback success──▶ Complete
//!                         │                          └──callback failure──▶ Failed
//!                         └──async submission failure──▶ Failed
//! ```
//!
//! Complete and Failed are terminal. Every mutator refuses to leave them, so a
//! duplicate or late writer can never corrupt a finished job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::{DomainError, DomainResult};
use crate::id::{RequestId, VendorJobId};
use crate::vendor::Vendor;

/// Job lifecycle status.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Complete,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Complete,
        JobStatus::Failed,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown job status `{s}`")))
    }
}

/// A fulfillment job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub request_id: RequestId,
    /// Submitted document, never modified after creation.
    pub original_payload: Document,
    pub vendor: Vendor,
    pub status: JobStatus,
    /// Sanitized vendor data; present iff `status == Complete`.
    pub result: Option<Document>,
    /// Failure text; present iff `status == Failed`.
    pub error: Option<String>,
    /// Correlation id handed out by the asynchronous backend.
    pub vendor_job_id: Option<VendorJobId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, owned by the job store.
    pub version: u64,
}

impl Job {
    /// Create a new pending job with a freshly minted request id.
    pub fn new(original_payload: Document, vendor: Vendor) -> Self {
        Self::with_request_id(RequestId::new(), original_payload, vendor)
    }

    pub fn with_request_id(request_id: RequestId, original_payload: Document, vendor: Vendor) -> Self {
        let now = Utc::now();
        Self {
            request_id,
            original_payload,
            vendor,
            status: JobStatus::Pending,
            result: None,
            error: None,
            vendor_job_id: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
            completed_at: None,
            version: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// True once an asynchronous submission was accepted and the job waits for
    /// its callback.
    pub fn is_awaiting_callback(&self) -> bool {
        self.status == JobStatus::Processing && self.vendor_job_id.is_some()
    }

    /// Accept the job for dispatch.
    ///
    /// Redelivery of a job that is already `Processing` is allowed; the first
    /// dispatch timestamp is kept.
    pub fn begin_processing(&mut self) -> DomainResult<()> {
        self.guard_not_terminal(JobStatus::Processing)?;
        let now = Utc::now();
        self.status = JobStatus::Processing;
        self.processed_at.get_or_insert(now);
        self.updated_at = now;
        Ok(())
    }

    /// Record the correlation id returned by the asynchronous backend.
    pub fn record_submission(&mut self, vendor_job_id: VendorJobId) -> DomainResult<()> {
        if self.vendor != Vendor::Async {
            return Err(DomainError::invariant(format!(
                "job {} uses the {} vendor and cannot carry a vendor job id",
                self.request_id, self.vendor
            )));
        }
        if self.status != JobStatus::Processing {
            return Err(DomainError::invalid_transition(self.status, JobStatus::Processing));
        }
        match &self.vendor_job_id {
            Some(existing) if *existing == vendor_job_id => return Ok(()),
            Some(existing) => {
                return Err(DomainError::invariant(format!(
                    "job {} already submitted as {existing}",
                    self.request_id
                )));
            }
            None => {}
        }
        self.vendor_job_id = Some(vendor_job_id);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Terminal success. `result` must already be sanitized.
    pub fn complete(&mut self, result: Document) -> DomainResult<()> {
        if self.status != JobStatus::Processing {
            return Err(DomainError::invalid_transition(self.status, JobStatus::Complete));
        }
        let now = Utc::now();
        self.status = JobStatus::Complete;
        self.result = Some(result);
        self.error = None;
        self.completed_at.get_or_insert(now);
        self.updated_at = now;
        Ok(())
    }

    /// Terminal failure from any non-terminal state.
    pub fn fail(&mut self, error: impl Into<String>) -> DomainResult<()> {
        self.guard_not_terminal(JobStatus::Failed)?;
        self.status = JobStatus::Failed;
        self.result = None;
        self.error = Some(error.into());
        self.updated_at = Utc::now();
        Ok(())
    }

    fn guard_not_terminal(&self, to: JobStatus) -> DomainResult<()> {
        if self.is_terminal() {
            return Err(DomainError::invalid_transition(self.status, to));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vendor_job_id(s: &str) -> VendorJobId {
        VendorJobId::new(s).unwrap()
    }

    #[test]
    fn new_job_is_pending_without_outcome() {
        let job = Job::new(json!({"q": 1}), Vendor::Sync);
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.result.is_none());
        assert!(job.error.is_none());
        assert!(job.vendor_job_id.is_none());
        assert!(job.processed_at.is_none());
        assert_eq!(job.version, 0);
    }

    #[test]
    fn sync_lifecycle_to_complete() {
        let mut job = Job::new(json!({}), Vendor::Sync);
        job.begin_processing().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.processed_at.is_some());

        job.complete(json!({"name": "x"})).unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.result, Some(json!({"name": "x"})));
        assert!(job.completed_at.is_some());
        assert!(job.vendor_job_id.is_none());
    }

    #[test]
    fn redelivery_keeps_first_processed_at() {
        let mut job = Job::new(json!({}), Vendor::Sync);
        job.begin_processing().unwrap();
        let first = job.processed_at;
        job.begin_processing().unwrap();
        assert_eq!(job.processed_at, first);
    }

    #[test]
    fn async_lifecycle_waits_for_callback() {
        let mut job = Job::new(json!({}), Vendor::Async);
        job.begin_processing().unwrap();
        job.record_submission(vendor_job_id("v-1")).unwrap();
        assert!(job.is_awaiting_callback());

        // Same id again is idempotent, a different one is refused.
        job.record_submission(vendor_job_id("v-1")).unwrap();
        assert!(job.record_submission(vendor_job_id("v-2")).is_err());

        job.fail("vendor said no").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("vendor said no"));
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn sync_job_cannot_carry_vendor_job_id() {
        let mut job = Job::new(json!({}), Vendor::Sync);
        job.begin_processing().unwrap();
        assert!(matches!(
            job.record_submission(vendor_job_id("v-1")),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn submission_requires_processing() {
        let mut job = Job::new(json!({}), Vendor::Async);
        assert!(matches!(
            job.record_submission(vendor_job_id("v-1")),
            Err(DomainError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn pending_job_cannot_complete_directly() {
        let mut job = Job::new(json!({}), Vendor::Sync);
        assert!(matches!(
            job.complete(json!({})),
            Err(DomainError::InvalidTransition {
                from: JobStatus::Pending,
                to: JobStatus::Complete
            })
        ));
    }

    #[test]
    fn pending_job_can_be_force_failed() {
        let mut job = Job::new(json!({}), Vendor::Async);
        job.fail("Job failed after 3 attempts: boom").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn terminal_states_are_final() {
        let mut done = Job::new(json!({}), Vendor::Sync);
        done.begin_processing().unwrap();
        done.complete(json!({"ok": true})).unwrap();
        let snapshot = done.clone();

        assert!(done.begin_processing().is_err());
        assert!(done.fail("late").is_err());
        assert!(done.complete(json!({"ok": false})).is_err());
        assert_eq!(done, snapshot);

        let mut failed = Job::new(json!({}), Vendor::Sync);
        failed.fail("boom").unwrap();
        assert!(failed.begin_processing().is_err());
        assert!(failed.complete(json!({})).is_err());
        assert_eq!(failed.error.as_deref(), Some("boom"));
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert_eq!(serde_json::to_string(&JobStatus::Complete).unwrap(), "\"complete\"");
    }
}
