use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use super::{JobRecord, JobStore};

/// Process-local store. Every call takes the lock once, so individual
/// operations are atomic and last write wins.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job_id: &str) -> Result<()> {
        self.jobs
            .lock()
            .insert(job_id.to_owned(), JobRecord::starting());
        Ok(())
    }

    async fn update(&self, job_id: &str, record: JobRecord) -> Result<()> {
        self.jobs.lock().insert(job_id.to_owned(), record);
        Ok(())
    }

    async fn read(&self, job_id: &str) -> Result<JobRecord> {
        Ok(self
            .jobs
            .lock()
            .get(job_id)
            .cloned()
            .unwrap_or_else(JobRecord::unknown))
    }

    async fn delete(&self, job_id: &str) -> Result<bool> {
        Ok(self.jobs.lock().remove(job_id).is_some())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.jobs.lock().len())
    }
}
