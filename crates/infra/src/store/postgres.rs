//! Postgres-backed job store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | JobStoreError | Scenario |
//! |------------|----------------------|---------------|----------|
//! | Database (unique violation) on `create` | `23505` | `AlreadyExists` | Duplicate request id |
//! | Database (unique violation) on `update` | `23505` | `Storage` | Vendor job id already assigned to another job |
//! | Database (other) | Any other | `Storage` | Constraint or server errors |
//! | PoolClosed / other | N/A | `Storage` | Network errors, connection failures, etc. |
//!
//! A CAS `update` that matches no row is disambiguated with a follow-up lookup:
//! a missing row is `NotFound`, a newer version is `Conflict`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use fulfill_core::{Document, Job, JobStatus, RequestId, Vendor, VendorJobId};

use super::{JobStats, JobStore, JobStoreError};

const MIGRATION: &str = include_str!("../../migrations/0001_jobs.sql");

const JOB_COLUMNS: &str = "request_id, original_payload, vendor, status, result, error, \
     vendor_job_id, created_at, updated_at, processed_at, completed_at, version";

/// Postgres job store.
///
/// Uses the SQLx connection pool, which is `Send + Sync` and shared by clones.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect to `database_url` with a default pool.
    pub async fn connect(database_url: &str) -> Result<Self, JobStoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the `jobs` table and indexes if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), JobStoreError> {
        sqlx::raw_sql(MIGRATION)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(request_id = %job.request_id, vendor = %job.vendor), err)]
    async fn create(&self, job: Job) -> Result<Job, JobStoreError> {
        let version = to_db_version(job.version)?;
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (
                request_id, original_payload, vendor, status, result, error,
                vendor_job_id, created_at, updated_at, processed_at, completed_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(job.request_id.as_uuid())
        .bind(&job.original_payload)
        .bind(job.vendor.as_str())
        .bind(job.status.as_str())
        .bind(job.result.as_ref())
        .bind(job.error.as_deref())
        .bind(job.vendor_job_id.as_ref().map(VendorJobId::as_str))
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.processed_at)
        .bind(job.completed_at)
        .bind(version)
        .execute(&*self.pool)
        .await;

        match result {
            Ok(_) => Ok(job),
            Err(e) if is_unique_violation(&e) => Err(JobStoreError::AlreadyExists(job.request_id)),
            Err(e) => Err(map_sqlx_error("create", e)),
        }
    }

    #[instrument(skip(self), fields(request_id = %request_id), err)]
    async fn find_by_request_id(&self, request_id: RequestId) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE request_id = $1"))
            .bind(request_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_request_id", e))?;

        row.map(|r| JobRow::from_pg_row(&r)?.into_job()).transpose()
    }

    #[instrument(skip(self), fields(vendor_job_id = %vendor_job_id), err)]
    async fn find_by_vendor_job_id(
        &self,
        vendor_job_id: &VendorJobId,
    ) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE vendor_job_id = $1"))
            .bind(vendor_job_id.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_vendor_job_id", e))?;

        row.map(|r| JobRow::from_pg_row(&r)?.into_job()).transpose()
    }

    #[instrument(
        skip(self, job),
        fields(request_id = %job.request_id, status = %job.status, expected_version = job.version),
        err
    )]
    async fn update(&self, job: &Job) -> Result<Job, JobStoreError> {
        let expected = to_db_version(job.version)?;
        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs SET
                status = $3,
                result = $4,
                error = $5,
                vendor_job_id = $6,
                updated_at = $7,
                processed_at = $8,
                completed_at = $9,
                version = version + 1
            WHERE request_id = $1 AND version = $2
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job.request_id.as_uuid())
        .bind(expected)
        .bind(job.status.as_str())
        .bind(job.result.as_ref())
        .bind(job.error.as_deref())
        .bind(job.vendor_job_id.as_ref().map(VendorJobId::as_str))
        .bind(job.updated_at)
        .bind(job.processed_at)
        .bind(job.completed_at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update", e))?;

        match row {
            Some(row) => JobRow::from_pg_row(&row)?.into_job(),
            None => match self.find_by_request_id(job.request_id).await? {
                Some(_) => Err(JobStoreError::Conflict {
                    request_id: job.request_id,
                    expected: job.version,
                }),
                None => Err(JobStoreError::NotFound(job.request_id)),
            },
        }
    }

    #[instrument(skip(self), err)]
    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM jobs GROUP BY status")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = JobStats::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(|e| map_sqlx_error("stats", e))?;
            let count: i64 = row.try_get("count").map_err(|e| map_sqlx_error("stats", e))?;
            let status = status
                .parse::<JobStatus>()
                .map_err(|e| JobStoreError::Storage(e.to_string()))?;
            stats.record(status, u64::try_from(count).unwrap_or_default());
        }
        Ok(stats)
    }
}

struct JobRow {
    request_id: uuid::Uuid,
    original_payload: Document,
    vendor: String,
    status: String,
    result: Option<Document>,
    error: Option<String>,
    vendor_job_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    version: i64,
}

impl JobRow {
    fn from_pg_row(row: &sqlx::postgres::PgRow) -> Result<Self, JobStoreError> {
        let get = |e: sqlx::Error| map_sqlx_error("decode job row", e);
        Ok(Self {
            request_id: row.try_get("request_id").map_err(get)?,
            original_payload: row.try_get("original_payload").map_err(get)?,
            vendor: row.try_get("vendor").map_err(get)?,
            status: row.try_get("status").map_err(get)?,
            result: row.try_get("result").map_err(get)?,
            error: row.try_get("error").map_err(get)?,
            vendor_job_id: row.try_get("vendor_job_id").map_err(get)?,
            created_at: row.try_get("created_at").map_err(get)?,
            updated_at: row.try_get("updated_at").map_err(get)?,
            processed_at: row.try_get("processed_at").map_err(get)?,
            completed_at: row.try_get("completed_at").map_err(get)?,
            version: row.try_get("version").map_err(get)?,
        })
    }

    fn into_job(self) -> Result<Job, JobStoreError> {
        let corrupt = |e: fulfill_core::DomainError| {
            JobStoreError::Storage(format!("corrupt job row {}: {e}", self.request_id))
        };
        Ok(Job {
            request_id: RequestId::from(self.request_id),
            vendor: self.vendor.parse::<Vendor>().map_err(corrupt)?,
            status: self.status.parse::<JobStatus>().map_err(corrupt)?,
            vendor_job_id: self
                .vendor_job_id
                .map(VendorJobId::new)
                .transpose()
                .map_err(corrupt)?,
            version: u64::try_from(self.version).map_err(|_| {
                JobStoreError::Storage(format!("negative version for job {}", self.request_id))
            })?,
            original_payload: self.original_payload,
            result: self.result,
            error: self.error,
            created_at: self.created_at,
            updated_at: self.updated_at,
            processed_at: self.processed_at,
            completed_at: self.completed_at,
        })
    }
}

fn to_db_version(version: u64) -> Result<i64, JobStoreError> {
    i64::try_from(version).map_err(|_| JobStoreError::Storage(format!("version {version} out of range")))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => JobStoreError::Storage(format!(
            "database error in {operation}: {}",
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            JobStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        other => JobStoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}
