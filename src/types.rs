//! Public and internal types for the invstream API and pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::sink::Watermarks;
use crate::utils::config::{FlowControl, JobConsts, STREAM_BATCH_SIZE};

/// One row yielded by a cursor: the record id plus, when the query selected it, the JSON document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: String,
    pub jsonb: Option<serde_json::Value>,
}

impl Row {
    /// Row carrying only an id (reindex of instances).
    pub fn id_only(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            jsonb: None,
        }
    }
}

/// Join depth implied by a field qualifier. Ordered: a deeper level carries every shallower entity's columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScopeLevel {
    Base,
    JoinedL1,
    JoinedL2,
}

impl ScopeLevel {
    pub const ALL: [ScopeLevel; 3] = [ScopeLevel::Base, ScopeLevel::JoinedL1, ScopeLevel::JoinedL2];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeLevel::Base => "BASE",
            ScopeLevel::JoinedL1 => "JOINED_L1",
            ScopeLevel::JoinedL2 => "JOINED_L2",
        }
    }
}

impl fmt::Display for ScopeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScopeLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScopeLevel::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::anyhow!("unknown scope level: {s}"))
    }
}

/// Resource a reindex job republishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceName {
    Instance,
    Authority,
}

impl ResourceName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceName::Instance => "INSTANCE",
            ResourceName::Authority => "AUTHORITY",
        }
    }

    /// Backing table enumerated by a reindex pass.
    pub fn table(&self) -> &'static str {
        match self {
            ResourceName::Instance => "instance",
            ResourceName::Authority => "authority",
        }
    }

    /// Authority events carry the full record; instance events carry the id only.
    pub fn publishes_record(&self) -> bool {
        matches!(self, ResourceName::Authority)
    }

    /// Topic a reindex of this resource publishes to.
    pub fn topic(&self) -> String {
        format!("{}.{}", JobConsts::TOPIC_PREFIX, self.table())
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INSTANCE" => Ok(ResourceName::Instance),
            "AUTHORITY" => Ok(ResourceName::Authority),
            other => Err(anyhow::anyhow!("unknown resource name: {other}")),
        }
    }
}

/// Reindex job lifecycle. Moves only from `InProgress` to one terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    InProgress,
    IdsPublished,
    IdPublishingCancelled,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::IdsPublished => "IDS_PUBLISHED",
            JobStatus::IdPublishingCancelled => "ID_PUBLISHING_CANCELLED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::InProgress)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN_PROGRESS" => Ok(JobStatus::InProgress),
            "IDS_PUBLISHED" => Ok(JobStatus::IdsPublished),
            "ID_PUBLISHING_CANCELLED" => Ok(JobStatus::IdPublishingCancelled),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(anyhow::anyhow!("unknown job status: {other}")),
        }
    }
}

/// What a job publishes: a resource reindex, or instance ids iterated to a caller's topic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    Reindex,
    Iteration,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Reindex => "REINDEX",
            JobKind::Iteration => "ITERATION",
        }
    }

    /// Header naming the job on each event.
    pub fn job_id_header(&self) -> &'static str {
        match self {
            JobKind::Reindex => JobConsts::REINDEX_JOB_ID_HEADER,
            JobKind::Iteration => JobConsts::ITERATION_JOB_ID_HEADER,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "REINDEX" => Ok(JobKind::Reindex),
            "ITERATION" => Ok(JobKind::Iteration),
            other => Err(anyhow::anyhow!("unknown job kind: {other}")),
        }
    }
}

/// Caller's side of an iteration job: where the ids go and how the events are typed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationParams {
    pub topic_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
}

impl IterationParams {
    pub fn new(topic_name: impl Into<String>) -> Self {
        Self {
            topic_name: topic_name.into(),
            event_type: None,
        }
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn event_type(&self) -> &str {
        self.event_type
            .as_deref()
            .unwrap_or(JobConsts::ITERATION_EVENT_TYPE)
    }
}

/// Persisted job (same shape as a row in the `reindex_job` table). Reindex and iteration jobs
/// share the record, the status lifecycle and the cancel flag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReindexJob {
    pub id: String,
    pub kind: JobKind,
    pub resource_name: ResourceName,
    /// Topic every event of the job is published to.
    pub topic_name: String,
    /// Payload `type` of every event.
    pub event_type: String,
    pub job_status: JobStatus,
    /// RFC 3339 submission time.
    pub submitted_date: String,
    pub published: u64,
    pub cancel_requested: bool,
}

impl ReindexJob {
    /// New `IN_PROGRESS` reindex of `resource`, submitted at `submitted_date`.
    pub fn reindex(id: String, resource: ResourceName, submitted_date: String) -> Self {
        Self {
            id,
            kind: JobKind::Reindex,
            resource_name: resource,
            topic_name: resource.topic(),
            event_type: JobConsts::REINDEX_EVENT_TYPE.to_string(),
            job_status: JobStatus::InProgress,
            submitted_date,
            published: 0,
            cancel_requested: false,
        }
    }

    /// New `IN_PROGRESS` iteration over every instance id.
    pub fn iteration(id: String, params: &IterationParams, submitted_date: String) -> Self {
        Self {
            id,
            kind: JobKind::Iteration,
            resource_name: ResourceName::Instance,
            topic_name: params.topic_name.clone(),
            event_type: params.event_type().to_string(),
            job_status: JobStatus::InProgress,
            submitted_date,
            published: 0,
            cancel_requested: false,
        }
    }
}

/// Full options (CLI, config file, and library callers).
#[derive(Clone, Debug)]
pub struct Opts {
    /// SQLite database path. When None, uses `<cwd>/<package db filename>` (e.g. `.invstream`).
    pub db_path: Option<PathBuf>,
    /// Rows per cursor batch; also the granularity of cancellation checks.
    pub batch_size: usize,
    /// Flow-control marks for HTTP responses, in buffered bytes.
    pub http_watermarks: Watermarks,
    /// Flow-control marks for the event bus, in undelivered messages.
    pub event_watermarks: Watermarks,
    /// Persist reindex progress every this many rows.
    pub progress_every: u64,
    /// Append-only file receiving reindex events (JSON lines). When None, `<package>.events`.
    pub events_path: Option<PathBuf>,
    /// Debug logging and progress display.
    pub verbose: bool,
    /// Open the database with SQLCipher.
    pub encrypt: bool,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            db_path: None,
            batch_size: STREAM_BATCH_SIZE,
            http_watermarks: FlowControl::http(),
            event_watermarks: FlowControl::events(),
            progress_every: JobConsts::UPDATE_PUBLISHED_EVERY,
            events_path: None,
            verbose: false,
            encrypt: false,
        }
    }
}
