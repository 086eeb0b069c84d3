//! invstream: bulk record distribution for an inventory metadata store.
//!
//! Parsed, field-qualified predicates are routed to the shallowest pre-joined view that covers
//! them ([`router`]), large result sets are streamed to a consumer under flow control
//! ([`engine::pump`], [`sink`]), and full-corpus jobs publish every record as events with
//! persisted, cancellable progress ([`pipeline`]): reindex jobs per resource, iteration jobs
//! streaming instance ids to a caller's topic.

pub mod catalog;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod predicate;
pub mod router;
pub mod search;
pub mod sink;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use types::*;

pub use catalog::{ViewCatalog, ViewDescriptor};
pub use error::{CatalogError, CursorError, JobError, RoutingError, SinkError, StreamError};
pub use predicate::{CompareOp, FieldRef, Literal, Predicate, SearchRequest, SortKey};
pub use router::{RoutedQuery, route};

use std::path::Path;

use engine::db_ops::{DbConfig, open_db};
use pipeline::{ReindexContext, ReindexController};

/// Result alias used by public invstream API
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Open (or create) the database at `path`, apply the schema, and return a controller whose
/// passes read from it and append events to `opts.events_path`.
pub fn reindex_controller(path: &Path, passphrase: Option<&str>, opts: &Opts) -> Result<ReindexController> {
    open_db(path, passphrase)?;
    let db = DbConfig::new(path).with_passphrase(passphrase.map(str::to_string));
    Ok(ReindexController::new(ReindexContext::from_opts(&db, opts)?))
}
