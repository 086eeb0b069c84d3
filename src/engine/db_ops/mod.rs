//! Database operations: schema, open, job persistence, record loading.

mod jobs;
mod open;
mod records;

pub use jobs::JobRepository;
pub use open::{DbConfig, open_db, open_db_or_detect_encrypted};
pub use records::{insert_authority, insert_holdings_record, insert_instance, insert_item};

/// WAL tuning pragmas (synchronous, autocheckpoint, size limit). Use after PRAGMA journal_mode = WAL.
pub(crate) const WAL_PRAGMAS: &str = r#"
        PRAGMA synchronous = NORMAL;
        PRAGMA wal_autocheckpoint = 10000;
        PRAGMA journal_size_limit = 67108864;
        "#;

/// Inventory records, the two pre-joined views the router targets, and the reindex job table.
/// Documents are stored as JSON text and read with `json_extract`.
pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS instance (
    id TEXT PRIMARY KEY,
    jsonb TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS holdings_record (
    id TEXT PRIMARY KEY,
    instance_id TEXT NOT NULL REFERENCES instance(id),
    jsonb TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_holdings_record_instance_id ON holdings_record(instance_id);

CREATE TABLE IF NOT EXISTS item (
    id TEXT PRIMARY KEY,
    holdings_record_id TEXT NOT NULL REFERENCES holdings_record(id),
    jsonb TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_item_holdings_record_id ON item(holdings_record_id);

CREATE TABLE IF NOT EXISTS authority (
    id TEXT PRIMARY KEY,
    jsonb TEXT NOT NULL
);

CREATE VIEW IF NOT EXISTS instance_holding_view AS
    SELECT instance.id AS id,
           instance.jsonb AS jsonb,
           holdings_record.jsonb AS ho_jsonb
    FROM instance
    LEFT JOIN holdings_record ON holdings_record.instance_id = instance.id;

CREATE VIEW IF NOT EXISTS instance_holding_item_view AS
    SELECT instance.id AS id,
           instance.jsonb AS jsonb,
           holdings_record.jsonb AS ho_jsonb,
           item.jsonb AS it_jsonb
    FROM instance
    LEFT JOIN holdings_record ON holdings_record.instance_id = instance.id
    LEFT JOIN item ON item.holdings_record_id = holdings_record.id;

CREATE TABLE IF NOT EXISTS reindex_job (
    id TEXT PRIMARY KEY,
    job_kind TEXT NOT NULL DEFAULT 'REINDEX',
    resource_name TEXT NOT NULL,
    topic_name TEXT NOT NULL,
    event_type TEXT NOT NULL,
    job_status TEXT NOT NULL,
    submitted_date TEXT NOT NULL,
    published INTEGER NOT NULL DEFAULT 0,
    cancel_requested INTEGER NOT NULL DEFAULT 0
);
"#;
