//! Job pipeline (reindex and iteration): context, controller, outcome handling.

pub mod context;
pub mod error_handler;
pub mod orchestrator;

pub use context::{CorpusSource, JobProgressHook, ReindexContext, ReindexTuning, SqliteCorpus};
pub use error_handler::{failure_status, final_status};
pub use orchestrator::ReindexController;
