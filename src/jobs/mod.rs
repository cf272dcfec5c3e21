//! Job tracker: one status record per download id.
//!
//! Records are replaced wholesale on every `update`; nothing is merged. A
//! worker that wants to keep `title` or `error` visible must write it again
//! with each progress update.

mod memory;
mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Starting,
    Downloading,
    Processing,
    Completed,
    Error,
    Unknown,
}

/// Snapshot returned by `/api/progress/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub status: JobStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    /// Bytes per second over the whole transfer so far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<u64>,
    /// Estimated seconds remaining.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<u64>,
}

impl JobRecord {
    pub fn new(status: JobStatus, progress: u8) -> Self {
        Self {
            status,
            progress: progress.min(100),
            filename: None,
            title: None,
            error: None,
            downloaded: None,
            total: None,
            speed: None,
            eta: None,
        }
    }

    pub fn starting() -> Self {
        Self::new(JobStatus::Starting, 0)
    }

    /// Default answer for ids the store has never seen (or already dropped).
    pub fn unknown() -> Self {
        Self::new(JobStatus::Unknown, 0)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(JobStatus::Error, 0).with_error(message)
    }

    pub fn completed(filename: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(JobStatus::Completed, 100)
            .with_filename(filename)
            .with_title(title)
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_transfer(
        mut self,
        downloaded: u64,
        total: Option<u64>,
        speed: Option<u64>,
        eta: Option<u64>,
    ) -> Self {
        self.downloaded = Some(downloaded);
        self.total = total;
        self.speed = speed;
        self.eta = eta;
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

/// Keyed storage for job records. Implementations must make each single
/// operation atomic; sequences of operations are not.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts a fresh `starting` record, replacing any existing one.
    async fn create(&self, job_id: &str) -> Result<()>;

    /// Replaces the whole record for `job_id`, inserting it when absent.
    async fn update(&self, job_id: &str, record: JobRecord) -> Result<()>;

    /// Current record, or [`JobRecord::unknown`] when there is none.
    async fn read(&self, job_id: &str) -> Result<JobRecord>;

    /// Removes the record; returns whether one existed.
    async fn delete(&self, job_id: &str) -> Result<bool>;

    async fn len(&self) -> Result<usize>;
}
