use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fulfill_core::{Document, Job, JobStatus, RequestId, Vendor};
use fulfill_infra::{JobStats, OrchestratorStats, ResolveOutcome};
use fulfill_queue::QueueStats;

// -------------------------
// Request DTOs
// -------------------------

/// Query string of `POST /jobs`.
#[derive(Debug, Default, Deserialize)]
pub struct SubmitJobQuery {
    pub vendor: Option<String>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub request_id: RequestId,
}

/// Body of `GET /jobs/{request_id}`.
///
/// `result` only appears on complete jobs and `error` only on failed ones.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub request_id: RequestId,
    pub status: JobStatus,
    pub vendor: Vendor,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        let result = job.result.filter(|_| job.status == JobStatus::Complete);
        let error = job.error.filter(|_| job.status == JobStatus::Failed);
        Self {
            request_id: job.request_id,
            status: job.status,
            vendor: job.vendor,
            created_at: job.created_at,
            updated_at: job.updated_at,
            processed_at: job.processed_at,
            completed_at: job.completed_at,
            result,
            error,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub success: bool,
    #[serde(flatten)]
    pub outcome: ResolveOutcome,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub jobs: JobStats,
    pub queue: QueueStats,
    pub orchestrator: OrchestratorStats,
    pub system: SystemMetrics,
}

#[derive(Debug, Serialize)]
pub struct SystemMetrics {
    pub uptime_secs: u64,
    pub timestamp: DateTime<Utc>,
}
