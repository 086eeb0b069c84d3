use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use crate::ResourceName;
use crate::utils::config::PackagePaths;

/// Route inventory queries, stream results, and run reindex jobs.
#[derive(Clone, Parser)]
#[command(name = "invstream")]
#[command(about = "Route inventory queries to pre-joined views, stream results, run reindex jobs.")]
pub struct Cli {
    /// Path to the inventory database. Default: `.invstream` in the current directory.
    #[arg(long, short, global = true)]
    pub db: Option<PathBuf>,

    /// Verbose output.
    #[arg(long, short = 'v', global = true, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,

    /// Open the database with SQLCipher. Prompts for passphrase (or use INVSTREAM_DB_KEY / .env).
    #[arg(long, short = 'x', global = true, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub encrypt: Option<bool>,

    /// Rows per cursor batch.
    #[arg(long, global = true)]
    pub batch_size: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Subcommand)]
pub enum Commands {
    /// Show the view, SQL, and parameters a query routes to. Nothing is executed.
    Route {
        /// Predicate or search request as JSON (`@FILE` reads it from a file).
        #[arg(long, short)]
        query: String,
    },
    /// Run a query and stream the matching records to stdout as one JSON array.
    Search {
        /// Predicate or search request as JSON (`@FILE` reads it from a file).
        #[arg(long, short)]
        query: String,
        #[arg(long)]
        limit: Option<u64>,
        #[arg(long)]
        offset: Option<u64>,
        /// Write a full chunked HTTP response instead of the bare body.
        #[arg(long)]
        http: bool,
    },
    /// Republish every record of a resource as events, or iterate instance ids to a topic.
    Reindex {
        #[command(subcommand)]
        action: ReindexCommand,
    },
}

#[derive(Clone, Subcommand)]
pub enum ReindexCommand {
    /// Start a job. The pass runs in this process; Ctrl+C requests cancellation.
    Start {
        #[arg(value_enum)]
        resource: ResourceArg,
        /// Poll the job record and show live progress.
        #[arg(long, short)]
        wait: bool,
    },
    /// Start an iteration job: every instance id is published to TOPIC.
    Iterate {
        /// Destination topic.
        #[arg(long, short)]
        topic: String,
        /// Payload type of each event. Default: ITERATE.
        #[arg(long)]
        event_type: Option<String>,
        /// Poll the job record and show live progress.
        #[arg(long, short)]
        wait: bool,
    },
    /// Request cancellation. No-op for finished jobs.
    Cancel { id: String },
    /// Show one job.
    Get { id: String },
    /// Show all jobs, newest first.
    List,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ResourceArg {
    Instance,
    Authority,
}

impl From<ResourceArg> for ResourceName {
    fn from(arg: ResourceArg) -> Self {
        match arg {
            ResourceArg::Instance => ResourceName::Instance,
            ResourceArg::Authority => ResourceName::Authority,
        }
    }
}

impl Cli {
    /// Database path: `--db`, else the configured path, else the package db filename in `dir`.
    pub fn db_path(&self, configured: Option<&Path>, dir: &Path) -> PathBuf {
        self.db
            .clone()
            .or_else(|| configured.map(Path::to_path_buf))
            .unwrap_or_else(|| dir.join(PackagePaths::get().db_filename()))
    }
}
