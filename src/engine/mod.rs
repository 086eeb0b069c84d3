//! Engine: storage, cursors, the stream pump, and the CLI.

pub mod arg_parser;
pub mod cli;
pub mod cursor;
pub mod db_ops;
pub mod progress;
pub mod pump;

pub use arg_parser::{Cli, Commands, ReindexCommand};
pub use cli::handle_run;
pub use cursor::{IterCursor, RowCursor, SqliteCursor};
pub use db_ops::{DbConfig, JobRepository, open_db, open_db_or_detect_encrypted};
pub use pump::{BatchDecision, BatchHook, PumpOutcome, PumpReport, StreamSession, pump};
