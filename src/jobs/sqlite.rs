use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use libsql::{Builder, Connection, params};

use super::{JobRecord, JobStore};

/// Job records persisted in a local SQLite file so progress survives a
/// restart. Each record is stored as one JSON blob, which keeps `update` a
/// whole-row replacement.
pub struct SqliteJobStore {
    conn: Connection,
}

impl SqliteJobStore {
    /// Opens (and if necessary creates) the job database.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating job store directory {}", parent.display()))?;
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .with_context(|| format!("opening job DB {}", path.display()))?;
        let conn = db.connect()?;
        configure_connection(&conn).await?;
        ensure_schema(&conn).await?;
        Ok(Self { conn })
    }
}

async fn configure_connection(conn: &Connection) -> Result<()> {
    // journal_mode returns a row, so it runs as a query.
    let mut rows = conn
        .query("PRAGMA journal_mode=WAL", params![])
        .await
        .context("enabling WAL journal")?;
    while rows.next().await?.is_some() {}
    conn.execute_batch("PRAGMA synchronous=NORMAL;").await?;
    Ok(())
}

async fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            record_json TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .await?;
    Ok(())
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create(&self, job_id: &str) -> Result<()> {
        self.update(job_id, JobRecord::starting()).await
    }

    async fn update(&self, job_id: &str, record: JobRecord) -> Result<()> {
        let record_json = serde_json::to_string(&record).context("serializing job record")?;
        self.conn
            .execute(
                r#"
                INSERT INTO jobs (id, record_json, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(id) DO UPDATE SET
                    record_json = excluded.record_json,
                    updated_at = excluded.updated_at
                "#,
                params![job_id, record_json, Utc::now().to_rfc3339()],
            )
            .await
            .with_context(|| format!("writing job {job_id}"))?;
        Ok(())
    }

    async fn read(&self, job_id: &str) -> Result<JobRecord> {
        let mut rows = self
            .conn
            .query("SELECT record_json FROM jobs WHERE id = ?1", params![job_id])
            .await?;
        let Some(row) = rows.next().await? else {
            return Ok(JobRecord::unknown());
        };
        let record_json: String = row.get(0)?;
        serde_json::from_str(&record_json).with_context(|| format!("parsing job {job_id}"))
    }

    async fn delete(&self, job_id: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM jobs WHERE id = ?1", params![job_id])
            .await?;
        Ok(removed > 0)
    }

    async fn len(&self) -> Result<usize> {
        let mut rows = self.conn.query("SELECT COUNT(*) FROM jobs", params![]).await?;
        let row = rows.next().await?.context("missing job count row")?;
        let count: i64 = row.get(0)?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}
