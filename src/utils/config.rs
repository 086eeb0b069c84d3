//! Application configuration constants.
//! Tuning and thresholds in one place.

use std::sync::OnceLock;

use crate::sink::Watermarks;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived paths: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    pkg_name: &'static str,
    db_filename: String,
    settings_filename: String,
    events_filename: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache paths from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                pkg_name: pkg,
                db_filename: format!(".{pkg}"),
                settings_filename: format!(".{pkg}.toml"),
                events_filename: format!("{pkg}.events"),
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    pub fn db_filename(&self) -> &str {
        &self.db_filename
    }

    pub fn settings_filename(&self) -> &str {
        &self.settings_filename
    }

    pub fn events_filename(&self) -> &str {
        &self.events_filename
    }
}

// ---- Streaming ----

/// Rows per cursor batch. Cancellation is checked between batches, so this bounds detection latency.
pub const STREAM_BATCH_SIZE: usize = 100;

/// Batches the cursor reader thread may run ahead of the pump.
pub const CURSOR_CHANNEL_CAP: usize = 4;

/// Outbound flow-control marks per sink kind.
pub struct FlowControl;

impl FlowControl {
    /// HTTP: bytes buffered toward the client before the pump suspends.
    pub const HTTP_HIGH_WATER_BYTES: usize = 64 * 1024;
    /// HTTP: resume once the client has taken the buffer down to this.
    pub const HTTP_LOW_WATER_BYTES: usize = 16 * 1024;
    /// Event bus: undelivered messages before the pump suspends.
    pub const EVENT_HIGH_WATER: usize = 1_000;
    pub const EVENT_LOW_WATER: usize = 250;

    pub fn http() -> Watermarks {
        Watermarks::new(Self::HTTP_HIGH_WATER_BYTES, Self::HTTP_LOW_WATER_BYTES)
    }

    pub fn events() -> Watermarks {
        Watermarks::new(Self::EVENT_HIGH_WATER, Self::EVENT_LOW_WATER)
    }
}

// ---- Reindex and iteration jobs ----

/// Reindex job tuning.
pub struct JobConsts;

impl JobConsts {
    /// Persist `published` every this many rows while the job is running.
    pub const UPDATE_PUBLISHED_EVERY: u64 = 1_000;
    /// Poll interval while `reindex start` follows its job.
    pub const WAIT_POLL_MS: u64 = 250;
    /// Header carried by every reindex event.
    pub const REINDEX_JOB_ID_HEADER: &'static str = "reindex-job-id";
    /// Payload type of reindex events.
    pub const REINDEX_EVENT_TYPE: &'static str = "REINDEX";
    /// Header carried by every iteration event.
    pub const ITERATION_JOB_ID_HEADER: &'static str = "iteration-job-id";
    /// Payload type of iteration events when the caller names none.
    pub const ITERATION_EVENT_TYPE: &'static str = "ITERATE";
    /// Reindex events go to `<prefix>.<resource>`.
    pub const TOPIC_PREFIX: &'static str = "inventory";
}

// ---- Database ----

/// How long a writer waits on a locked database before giving up (cancel vs. progress update).
pub const DB_BUSY_TIMEOUT_MS: u64 = 5_000;
