//! DB tests: schema and views on a file database, job store invariants.

use invstream::engine::db_ops::{
    DbConfig, JobRepository, insert_holdings_record, insert_instance, insert_item, open_db,
};
use invstream::{IterationParams, JobKind, JobStatus, ReindexJob, ResourceName};
use serde_json::json;
use tempfile::TempDir;

fn temp_db() -> (TempDir, DbConfig) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".invstream");
    open_db(&path, None).unwrap();
    (dir, DbConfig::new(path))
}

fn new_job(id: &str, submitted: &str) -> ReindexJob {
    ReindexJob::reindex(id.to_string(), ResourceName::Instance, submitted.to_string())
}

// --- schema ---

#[test]
fn test_open_db_is_idempotent() {
    let (_dir, db) = temp_db();
    open_db(&db.path, None).unwrap();
    let conn = db.connect().unwrap();
    let mode: String = conn
        .query_row("PRAGMA journal_mode", [], |r| r.get(0))
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
}

#[test]
fn test_joined_views_carry_every_level() {
    let (_dir, db) = temp_db();
    let conn = db.connect().unwrap();
    insert_instance(&conn, "in1", &json!({"title": "Moby Dick"})).unwrap();
    insert_instance(&conn, "in2", &json!({"title": "Walden"})).unwrap();
    insert_holdings_record(&conn, "ho1", "in1", &json!({"callNumber": "PS2384"})).unwrap();
    insert_item(&conn, "it1", "ho1", &json!({"barcode": "111"})).unwrap();
    insert_item(&conn, "it2", "ho1", &json!({"barcode": "222"})).unwrap();

    let l1: i64 = conn
        .query_row("SELECT count(*) FROM instance_holding_view", [], |r| r.get(0))
        .unwrap();
    // in2 has no holdings and still appears once
    assert_eq!(l1, 2);

    let (title, call, barcode): (String, String, String) = conn
        .query_row(
            "SELECT json_extract(jsonb, '$.title'), json_extract(ho_jsonb, '$.callNumber'),
                    json_extract(it_jsonb, '$.barcode')
             FROM instance_holding_item_view WHERE it_jsonb IS NOT NULL ORDER BY 3 LIMIT 1",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .unwrap();
    assert_eq!((title.as_str(), call.as_str(), barcode.as_str()), ("Moby Dick", "PS2384", "111"));
}

// --- job store ---

#[test]
fn test_job_round_trip_and_list_order() {
    let (_dir, db) = temp_db();
    let jobs = JobRepository::open(&db).unwrap();
    jobs.insert(&new_job("a", "2026-01-01T00:00:00.000Z")).unwrap();
    jobs.insert(&new_job("b", "2026-01-02T00:00:00.000Z")).unwrap();

    assert_eq!(jobs.get("a").unwrap(), Some(new_job("a", "2026-01-01T00:00:00.000Z")));
    assert_eq!(jobs.get("missing").unwrap(), None);
    let ids: Vec<String> = jobs.list().unwrap().into_iter().map(|j| j.id).collect();
    assert_eq!(ids, vec!["b", "a"]);
}

#[test]
fn test_iteration_job_keeps_topic_and_event_type() {
    let (_dir, db) = temp_db();
    let jobs = JobRepository::open(&db).unwrap();
    let params = IterationParams::new("search.reindex").with_event_type("MIGRATE");
    let job = ReindexJob::iteration("it".to_string(), &params, "2026-01-03T00:00:00.000Z".to_string());
    jobs.insert(&job).unwrap();
    jobs.insert(&new_job("re", "2026-01-01T00:00:00.000Z")).unwrap();

    let stored = jobs.get("it").unwrap().unwrap();
    assert_eq!(stored, job);
    assert_eq!(stored.kind, JobKind::Iteration);
    assert_eq!(stored.resource_name, ResourceName::Instance);
    assert_eq!(stored.topic_name, "search.reindex");
    assert_eq!(stored.event_type, "MIGRATE");

    let reindex = jobs.get("re").unwrap().unwrap();
    assert_eq!(reindex.kind, JobKind::Reindex);
    assert_eq!(reindex.topic_name, "inventory.instance");
    assert_eq!(reindex.event_type, "REINDEX");
    assert_eq!(reindex.job_status, JobStatus::InProgress);
}

#[test]
fn test_progress_never_moves_backward() {
    let (_dir, db) = temp_db();
    let jobs = JobRepository::open(&db).unwrap();
    jobs.insert(&new_job("a", "2026-01-01T00:00:00.000Z")).unwrap();

    assert!(jobs.record_progress("a", 2_000).unwrap());
    assert!(jobs.record_progress("a", 1_000).unwrap());
    assert_eq!(jobs.get("a").unwrap().unwrap().published, 2_000);
}

#[test]
fn test_terminal_status_is_final() {
    let (_dir, db) = temp_db();
    let jobs = JobRepository::open(&db).unwrap();
    jobs.insert(&new_job("a", "2026-01-01T00:00:00.000Z")).unwrap();

    assert!(jobs.complete("a", JobStatus::IdsPublished, 10).unwrap());
    assert!(!jobs.complete("a", JobStatus::Failed, 20).unwrap());
    assert!(!jobs.record_progress("a", 30).unwrap());

    let job = jobs.get("a").unwrap().unwrap();
    assert_eq!(job.job_status, JobStatus::IdsPublished);
    assert_eq!(job.published, 10);
    assert!(jobs.complete("a", JobStatus::InProgress, 0).is_err());
}

#[test]
fn test_cancel_flag_only_on_running_jobs() {
    let (_dir, db) = temp_db();
    let jobs = JobRepository::open(&db).unwrap();
    jobs.insert(&new_job("run", "2026-01-01T00:00:00.000Z")).unwrap();
    jobs.insert(&new_job("done", "2026-01-01T00:00:00.000Z")).unwrap();
    jobs.complete("done", JobStatus::IdsPublished, 5).unwrap();

    assert!(!jobs.cancel_requested("run").unwrap());
    let job = jobs.request_cancel("run").unwrap().unwrap();
    assert!(job.cancel_requested);
    assert!(jobs.cancel_requested("run").unwrap());
    // idempotent
    assert!(jobs.request_cancel("run").unwrap().unwrap().cancel_requested);

    let done = jobs.request_cancel("done").unwrap().unwrap();
    assert!(!done.cancel_requested);
    assert_eq!(done.job_status, JobStatus::IdsPublished);

    assert_eq!(jobs.request_cancel("nope").unwrap(), None);
}

#[test]
fn test_cancel_visible_across_connections() {
    let (_dir, db) = temp_db();
    let writer = JobRepository::open(&db).unwrap();
    let reader = JobRepository::open(&db).unwrap();
    writer.insert(&new_job("a", "2026-01-01T00:00:00.000Z")).unwrap();
    writer.request_cancel("a").unwrap();
    assert!(reader.cancel_requested("a").unwrap());
}
