//! In-memory job store for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use fulfill_core::{Job, RequestId, VendorJobId};

use super::{JobStats, JobStore, JobStoreError};

#[derive(Debug, Default)]
struct State {
    jobs: HashMap<RequestId, Job>,
    by_vendor_job_id: HashMap<VendorJobId, RequestId>,
}

/// Job store backed by a `RwLock`-guarded map with a secondary index on the
/// vendor job id. Both maps change under one write lock, so the CAS check and
/// the index update are atomic.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    state: RwLock<State>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, JobStoreError> {
        self.state
            .read()
            .map_err(|_| JobStoreError::Storage("job store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, JobStoreError> {
        self.state
            .write()
            .map_err(|_| JobStoreError::Storage("job store lock poisoned".into()))
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: Job) -> Result<Job, JobStoreError> {
        let mut state = self.write()?;
        if state.jobs.contains_key(&job.request_id) {
            return Err(JobStoreError::AlreadyExists(job.request_id));
        }
        if let Some(vendor_job_id) = &job.vendor_job_id {
            state
                .by_vendor_job_id
                .insert(vendor_job_id.clone(), job.request_id);
        }
        state.jobs.insert(job.request_id, job.clone());
        Ok(job)
    }

    async fn find_by_request_id(&self, request_id: RequestId) -> Result<Option<Job>, JobStoreError> {
        Ok(self.read()?.jobs.get(&request_id).cloned())
    }

    async fn find_by_vendor_job_id(
        &self,
        vendor_job_id: &VendorJobId,
    ) -> Result<Option<Job>, JobStoreError> {
        let state = self.read()?;
        Ok(state
            .by_vendor_job_id
            .get(vendor_job_id)
            .and_then(|id| state.jobs.get(id))
            .cloned())
    }

    async fn update(&self, job: &Job) -> Result<Job, JobStoreError> {
        let mut guard = self.write()?;
        let state = &mut *guard;
        let stored = state
            .jobs
            .get(&job.request_id)
            .ok_or(JobStoreError::NotFound(job.request_id))?;
        if stored.version != job.version {
            return Err(JobStoreError::Conflict {
                request_id: job.request_id,
                expected: job.version,
            });
        }

        if let Some(vendor_job_id) = &job.vendor_job_id {
            match state.by_vendor_job_id.get(vendor_job_id).copied() {
                Some(owner) if owner != job.request_id => {
                    return Err(JobStoreError::Storage(format!(
                        "vendor job id {vendor_job_id} already belongs to job {owner}"
                    )));
                }
                Some(_) => {}
                None => {
                    state
                        .by_vendor_job_id
                        .insert(vendor_job_id.clone(), job.request_id);
                }
            }
        }

        let mut next = job.clone();
        next.version = job.version + 1;
        state.jobs.insert(next.request_id, next.clone());
        Ok(next)
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let state = self.read()?;
        let mut stats = JobStats::default();
        for job in state.jobs.values() {
            stats.record(job.status, 1);
        }
        Ok(stats)
    }
}
