//! Typed errors at the component seams.
//!
//! Routing and pre-start errors are synchronous and name the offending field. Mid-stream and
//! background failures never reach a caller: they surface as a forced disconnect or a persisted
//! `FAILED` job status.

use thiserror::Error;

/// Predicate cannot be routed. Raised before any query runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("unrecognized field qualifier '{qualifier}' on field '{field}'")]
    UnknownQualifier { qualifier: String, field: String },
    #[error("invalid field path '{field}'")]
    InvalidField { field: String },
}

impl RoutingError {
    /// Field the caller should fix.
    pub fn field(&self) -> &str {
        match self {
            RoutingError::UnknownQualifier { field, .. } | RoutingError::InvalidField { field } => {
                field
            }
        }
    }
}

/// View catalog rejected at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("no view configured for scope level {0}")]
    MissingView(crate::ScopeLevel),
    #[error("more than one view configured for scope level {0}")]
    DuplicateView(crate::ScopeLevel),
    #[error("view '{view}' has no column alias for scope level {level}")]
    MissingAlias {
        view: String,
        level: crate::ScopeLevel,
    },
    #[error("qualifier '{qualifier}' cannot map to scope level BASE")]
    BaseQualifier { qualifier: String },
    #[error("'{0}' is not a valid SQL identifier")]
    InvalidIdentifier(String),
}

/// Backing store failed to produce rows.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CursorError {
    #[error("query rejected: {0}")]
    Rejected(String),
    #[error("row read failed: {0}")]
    Read(String),
    #[error("cursor reader stopped unexpectedly")]
    ReaderGone,
}

/// Sink could not accept or deliver a row (the consumer itself is still attached).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("row encoding failed: {0}")]
    Encode(String),
    #[error("delivery failed: {0}")]
    Delivery(String),
    #[error("sink already finished")]
    Finished,
}

/// Job submission, lookup and persistence errors for synchronous callers.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job '{0}' not found")]
    NotFound(String),
    #[error("invalid iteration job: {0}")]
    InvalidParams(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Failure inside one pump run, from either end of the stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error(transparent)]
    Cursor(#[from] CursorError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}
