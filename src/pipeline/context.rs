//! Reindex context: what a pass reads from (corpus), writes to (bus, job store), and how it is tuned.

use anyhow::Result;
use log::warn;
use std::path::PathBuf;
use std::sync::Arc;

use crate::engine::cursor::{RowCursor, SqliteCursor};
use crate::engine::db_ops::{DbConfig, JobRepository};
use crate::engine::pump::{BatchDecision, BatchHook, StreamSession};
use crate::error::CursorError;
use crate::sink::{EventBus, JsonLinesBus, Watermarks};
use crate::utils::config::PackagePaths;
use crate::{Opts, ResourceName};

/// Enumerates every record of a resource, in one long read transaction.
pub trait CorpusSource: Send + Sync {
    fn open(&self, resource: ResourceName, batch_size: usize)
    -> Result<Box<dyn RowCursor>, CursorError>;
}

/// Corpus backed by the resource's table.
pub struct SqliteCorpus {
    db: DbConfig,
}

impl SqliteCorpus {
    pub fn new(db: DbConfig) -> Self {
        Self { db }
    }

    /// Instances publish ids only; authorities publish the full record.
    pub fn corpus_sql(resource: ResourceName) -> String {
        if resource.publishes_record() {
            format!("SELECT id, jsonb FROM {}", resource.table())
        } else {
            format!("SELECT id FROM {}", resource.table())
        }
    }
}

impl CorpusSource for SqliteCorpus {
    fn open(
        &self,
        resource: ResourceName,
        batch_size: usize,
    ) -> Result<Box<dyn RowCursor>, CursorError> {
        let cursor = SqliteCursor::open(&self.db, &Self::corpus_sql(resource), Vec::new(), batch_size)?;
        Ok(Box::new(cursor))
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ReindexTuning {
    pub batch_size: usize,
    pub marks: Watermarks,
    pub progress_every: u64,
}

impl From<&Opts> for ReindexTuning {
    fn from(opts: &Opts) -> Self {
        Self {
            batch_size: opts.batch_size,
            marks: opts.event_watermarks,
            progress_every: opts.progress_every.max(1),
        }
    }
}

/// Shared by the controller and every pass it launches.
#[derive(Clone)]
pub struct ReindexContext {
    pub jobs: Arc<JobRepository>,
    pub corpus: Arc<dyn CorpusSource>,
    pub bus: Arc<dyn EventBus>,
    pub tuning: ReindexTuning,
}

impl ReindexContext {
    pub fn new(
        jobs: Arc<JobRepository>,
        corpus: Arc<dyn CorpusSource>,
        bus: Arc<dyn EventBus>,
        tuning: ReindexTuning,
    ) -> Self {
        Self {
            jobs,
            corpus,
            bus,
            tuning,
        }
    }

    /// Job store and corpus on `db`, events appended to `opts.events_path` (or `<package>.events`).
    pub fn from_opts(db: &DbConfig, opts: &Opts) -> Result<Self> {
        let events_path = opts
            .events_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(PackagePaths::get().events_filename()));
        Ok(Self::new(
            Arc::new(JobRepository::open(db)?),
            Arc::new(SqliteCorpus::new(db.clone())),
            Arc::new(JsonLinesBus::open(&events_path)?),
            ReindexTuning::from(opts),
        ))
    }
}

/// Batch hook of a job pass: persists progress and re-reads the cancel flag from the store.
pub struct JobProgressHook<'a> {
    jobs: &'a JobRepository,
    job_id: &'a str,
    every: u64,
    persisted: u64,
}

impl<'a> JobProgressHook<'a> {
    pub fn new(jobs: &'a JobRepository, job_id: &'a str, every: u64) -> Self {
        Self {
            jobs,
            job_id,
            every: every.max(1),
            persisted: 0,
        }
    }

    fn persist_progress(&mut self, rows_emitted: u64) {
        if rows_emitted / self.every <= self.persisted / self.every {
            return;
        }
        match self.jobs.record_progress(self.job_id, rows_emitted) {
            Ok(_) => self.persisted = rows_emitted,
            Err(e) => warn!("job {}: progress not persisted: {:#}", self.job_id, e),
        }
    }
}

impl BatchHook for JobProgressHook<'_> {
    fn before_batch(&mut self, session: &StreamSession) -> BatchDecision {
        self.persist_progress(session.rows_emitted);
        match self.jobs.cancel_requested(self.job_id) {
            Ok(true) => BatchDecision::Stop,
            Ok(false) => BatchDecision::Continue,
            Err(e) => {
                warn!("job {}: cancel flag unreadable: {:#}", self.job_id, e);
                BatchDecision::Continue
            }
        }
    }
}
