//! Job controller: start, cancel, and observe full-corpus publication passes.
//!
//! A reindex republishes every record of a resource to the resource's topic. An iteration
//! streams every instance id to a topic the caller names. Both run on their own named thread,
//! independent of whoever started them. Their only shared state with the outside world is the
//! persisted job record: the pass writes status and progress, `cancel` raises a flag the pass
//! re-reads before every batch.

use anyhow::{Context, anyhow};
use chrono::{SecondsFormat, Utc};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use super::context::{JobProgressHook, ReindexContext};
use super::error_handler::{failure_status, final_status, panic_message};
use crate::engine::pump::{PumpOutcome, PumpReport, pump};
use crate::error::JobError;
use crate::sink::{EventSink, OutputSink};
use crate::{IterationParams, JobStatus, ReindexJob, ResourceName};

/// Kafka's topic name limit.
const MAX_TOPIC_LEN: usize = 249;

pub struct ReindexController {
    ctx: ReindexContext,
    passes: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl ReindexController {
    pub fn new(ctx: ReindexContext) -> Self {
        Self {
            ctx,
            passes: Mutex::new(HashMap::new()),
        }
    }

    /// Persist a new `IN_PROGRESS` reindex job and launch its pass. Returns the record as persisted.
    pub fn start(&self, resource: ResourceName) -> Result<ReindexJob, JobError> {
        let job = ReindexJob::reindex(new_job_id(), resource, submitted_now());
        self.launch(job)
    }

    /// Persist a new `IN_PROGRESS` iteration job streaming every instance id to
    /// `params.topic_name`, and launch its pass.
    pub fn start_iteration(&self, params: &IterationParams) -> Result<ReindexJob, JobError> {
        validate_iteration(params)?;
        let job = ReindexJob::iteration(new_job_id(), params, submitted_now());
        self.launch(job)
    }

    fn launch(&self, job: ReindexJob) -> Result<ReindexJob, JobError> {
        self.ctx.jobs.insert(&job)?;
        info!(
            "{} job {} started: {} -> {}",
            job.kind, job.id, job.resource_name, job.topic_name
        );

        let ctx = self.ctx.clone();
        let pass_job = job.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-{}", job.kind.as_str().to_ascii_lowercase(), job.id))
            .spawn(move || run_pass(&ctx, &pass_job));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.ctx.jobs.complete(&job.id, JobStatus::Failed, 0)?;
                return Err(JobError::Store(anyhow!(e).context("spawn job pass")));
            }
        };

        let mut passes = self
            .passes
            .lock()
            .map_err(|_| anyhow!("job pass table lock poisoned"))?;
        passes.retain(|_, h| !h.is_finished());
        passes.insert(job.id.clone(), handle);
        Ok(job)
    }

    /// Ask a running job to stop. Idempotent; a no-op on finished jobs.
    pub fn cancel(&self, job_id: &str) -> Result<ReindexJob, JobError> {
        let job = self
            .ctx
            .jobs
            .request_cancel(job_id)?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        if job.job_status.is_terminal() {
            debug!("cancel of finished job {} ({}) ignored", job.id, job.job_status);
        } else {
            info!("Cancel requested for {} job {}", job.kind, job.id);
        }
        Ok(job)
    }

    /// Current persisted snapshot.
    pub fn get(&self, job_id: &str) -> Result<ReindexJob, JobError> {
        self.ctx
            .jobs
            .get(job_id)?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    pub fn list(&self) -> Result<Vec<ReindexJob>, JobError> {
        Ok(self.ctx.jobs.list()?)
    }

    /// Block until this controller's pass for `job_id` has ended, then return the final record.
    /// Jobs started elsewhere are returned as currently persisted.
    pub fn wait(&self, job_id: &str) -> Result<ReindexJob, JobError> {
        let handle = self
            .passes
            .lock()
            .map_err(|_| anyhow!("job pass table lock poisoned"))?
            .remove(job_id);
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            warn!("pass thread for job {} ended abnormally", job_id);
        }
        self.get(job_id)
    }
}

/// One full pass. Never returns an error: every failure ends up as a persisted status.
fn run_pass(ctx: &ReindexContext, job: &ReindexJob) {
    let emitted = Arc::new(AtomicU64::new(0));
    let result = panic::catch_unwind(AssertUnwindSafe(|| publish_corpus(ctx, job, &emitted)));
    // Rows accepted by the sink stay published whatever ended the pass.
    let so_far = || emitted.load(Ordering::Acquire);
    let (status, published) = match result {
        Ok(Ok(report)) => {
            if let PumpOutcome::FailedBeforeStart(e) | PumpOutcome::FailedMidStream(e) =
                &report.outcome
            {
                error!("{} job {} failed after {} events: {}", job.kind, job.id, report.rows_emitted, e);
            }
            let status = final_status(&report.outcome, cancel_pending(ctx, &job.id));
            (status, report.rows_emitted)
        }
        Ok(Err(e)) => {
            error!("{} job {} failed: {:#}", job.kind, job.id, e);
            (failure_status(cancel_pending(ctx, &job.id)), so_far())
        }
        Err(payload) => {
            error!("{} job {} panicked: {}", job.kind, job.id, panic_message(payload.as_ref()));
            (failure_status(cancel_pending(ctx, &job.id)), so_far())
        }
    };

    match ctx.jobs.complete(&job.id, status, published) {
        Ok(true) => info!("{} job {} finished: {} ({} events)", job.kind, job.id, status, published),
        Ok(false) => warn!("{} job {} was already finished", job.kind, job.id),
        Err(e) => error!("{} job {}: final status not persisted: {:#}", job.kind, job.id, e),
    }
}

fn cancel_pending(ctx: &ReindexContext, job_id: &str) -> bool {
    ctx.jobs.cancel_requested(job_id).unwrap_or(false)
}

fn publish_corpus(
    ctx: &ReindexContext,
    job: &ReindexJob,
    emitted: &Arc<AtomicU64>,
) -> anyhow::Result<PumpReport> {
    let cursor = ctx
        .corpus
        .open(job.resource_name, ctx.tuning.batch_size)
        .context("open corpus cursor")?;
    let mut sink = EventSink::new(Arc::clone(&ctx.bus), job, ctx.tuning.marks)?
        .with_counter(Arc::clone(emitted));
    let mut hook = JobProgressHook::new(&ctx.jobs, &job.id, ctx.tuning.progress_every);
    let report = pump(cursor, &mut sink, Some(&mut hook));

    if matches!(
        report.outcome,
        PumpOutcome::Cancelled | PumpOutcome::FailedBeforeStart(_)
    ) {
        // Events already accepted still go out; nothing is rolled back.
        sink.finish().context("flush queued events")?;
    }
    Ok(report)
}

fn new_job_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn submitted_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn validate_iteration(params: &IterationParams) -> Result<(), JobError> {
    let topic = params.topic_name.as_str();
    let topic_ok = !topic.is_empty()
        && topic.len() <= MAX_TOPIC_LEN
        && topic
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !topic_ok {
        return Err(JobError::InvalidParams(format!("topic name '{topic}'")));
    }
    let event_type = params.event_type();
    if event_type.is_empty() || event_type.chars().any(char::is_whitespace) {
        return Err(JobError::InvalidParams(format!("event type '{event_type}'")));
    }
    Ok(())
}
