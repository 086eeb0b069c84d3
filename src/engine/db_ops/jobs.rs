//! Job persistence for reindex and iteration jobs.
//!
//! Every status write is conditional on the row still being `IN_PROGRESS`, and progress only
//! moves forward (`MAX(published, ?)`), so a late or repeated write cannot move a job backward.

use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::sync::{Mutex, MutexGuard};

use super::open::DbConfig;
use crate::{JobStatus, ReindexJob};

const JOB_COLUMNS: &str = "id, job_kind, resource_name, topic_name, event_type, job_status, \
                           submitted_date, published, cancel_requested";

pub struct JobRepository {
    conn: Mutex<Connection>,
}

impl JobRepository {
    /// Own connection to an existing database (schema applied by [`super::open_db`]).
    pub fn open(db: &DbConfig) -> Result<Self> {
        Ok(Self::from_connection(db.connect()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("job store connection lock poisoned"))
    }

    pub fn insert(&self, job: &ReindexJob) -> Result<()> {
        self.conn()?
            .execute(
                &format!(
                    "INSERT INTO reindex_job ({JOB_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    job.id,
                    job.kind.as_str(),
                    job.resource_name.as_str(),
                    job.topic_name,
                    job.event_type,
                    job.job_status.as_str(),
                    job.submitted_date,
                    to_sql_count(job.published),
                    job.cancel_requested,
                ],
            )
            .context("insert reindex job")?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<ReindexJob>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare_cached(&format!("SELECT {JOB_COLUMNS} FROM reindex_job WHERE id = ?1"))
            .context("prepare job lookup")?;
        let raw = stmt
            .query_row([id], RawJob::from_row)
            .optional()
            .context("read reindex job")?;
        raw.map(RawJob::into_job).transpose()
    }

    /// Every job, newest first.
    pub fn list(&self) -> Result<Vec<ReindexJob>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM reindex_job ORDER BY submitted_date DESC, id"
            ))
            .context("prepare job list")?;
        let rows = stmt
            .query_map([], RawJob::from_row)
            .context("list reindex jobs")?;
        let mut jobs = Vec::new();
        for raw in rows {
            jobs.push(raw.context("read reindex job")?.into_job()?);
        }
        Ok(jobs)
    }

    /// Fresh read of the cancel flag. False for unknown ids.
    pub fn cancel_requested(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let flag = conn
            .prepare_cached("SELECT cancel_requested FROM reindex_job WHERE id = ?1")
            .context("prepare cancel lookup")?
            .query_row([id], |row| row.get::<_, bool>(0))
            .optional()
            .context("read cancel flag")?;
        Ok(flag.unwrap_or(false))
    }

    /// Raise the cancel flag on a running job. Returns the job as stored afterwards, or None
    /// when no such job exists. Terminal jobs are left untouched.
    pub fn request_cancel(&self, id: &str) -> Result<Option<ReindexJob>> {
        self.conn()?
            .execute(
                "UPDATE reindex_job SET cancel_requested = 1
                 WHERE id = ?1 AND job_status = 'IN_PROGRESS'",
                [id],
            )
            .context("request cancel")?;
        self.get(id)
    }

    /// Persist progress while the job runs. False once the job is terminal.
    pub fn record_progress(&self, id: &str, published: u64) -> Result<bool> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE reindex_job SET published = MAX(published, ?2)
                 WHERE id = ?1 AND job_status = 'IN_PROGRESS'",
                params![id, to_sql_count(published)],
            )
            .context("record reindex progress")?;
        Ok(changed == 1)
    }

    /// Move a running job to `status`. False (and nothing written) if it already left `IN_PROGRESS`.
    pub fn complete(&self, id: &str, status: JobStatus, published: u64) -> Result<bool> {
        if !status.is_terminal() {
            return Err(anyhow!("{status} is not a terminal job status"));
        }
        let changed = self
            .conn()?
            .execute(
                "UPDATE reindex_job SET job_status = ?2, published = MAX(published, ?3)
                 WHERE id = ?1 AND job_status = 'IN_PROGRESS'",
                params![id, status.as_str(), to_sql_count(published)],
            )
            .context("complete reindex job")?;
        Ok(changed == 1)
    }
}

fn to_sql_count(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Column values before enum parsing (parse errors are ours, not rusqlite's).
struct RawJob {
    id: String,
    kind: String,
    resource_name: String,
    topic_name: String,
    event_type: String,
    job_status: String,
    submitted_date: String,
    published: i64,
    cancel_requested: bool,
}

impl RawJob {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            resource_name: row.get(2)?,
            topic_name: row.get(3)?,
            event_type: row.get(4)?,
            job_status: row.get(5)?,
            submitted_date: row.get(6)?,
            published: row.get(7)?,
            cancel_requested: row.get(8)?,
        })
    }

    fn into_job(self) -> Result<ReindexJob> {
        Ok(ReindexJob {
            kind: self.kind.parse().with_context(|| format!("job {}", self.id))?,
            resource_name: self
                .resource_name
                .parse()
                .with_context(|| format!("job {}", self.id))?,
            job_status: self
                .job_status
                .parse()
                .with_context(|| format!("job {}", self.id))?,
            published: u64::try_from(self.published).unwrap_or(0),
            id: self.id,
            topic_name: self.topic_name,
            event_type: self.event_type,
            submitted_date: self.submitted_date,
            cancel_requested: self.cancel_requested,
        })
    }
}
