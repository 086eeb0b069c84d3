//! End-to-end search: route, query the bundled views, stream the JSON array.

use invstream::engine::db_ops::{
    DbConfig, insert_holdings_record, insert_instance, insert_item, open_db,
};
use invstream::engine::pump::PumpOutcome;
use invstream::search::{SearchContext, search};
use invstream::sink::{Framing, HttpSink, ResponseStream, Watermarks};
use invstream::{
    CompareOp, FieldRef, Predicate, RoutingError, ScopeLevel, SearchRequest, SortKey, ViewCatalog,
    ViewDescriptor,
};
use serde_json::{Value, json};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.0.lock().unwrap()).unwrap()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ResponseStream for SharedBuf {}

/// Three instances:
/// in1 "Moby Dick": two holdings at loc-a, items 111 and 222
/// in2 "Walden": one holding at loc-b, item 333
/// in3 "Typee": no holdings
fn inventory() -> (TempDir, DbConfig) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".invstream");
    open_db(&path, None).unwrap();
    let db = DbConfig::new(path);
    let conn = db.connect().unwrap();
    insert_instance(&conn, "in1", &json!({"id": "in1", "title": "Moby Dick"})).unwrap();
    insert_instance(&conn, "in2", &json!({"id": "in2", "title": "Walden"})).unwrap();
    insert_instance(&conn, "in3", &json!({"id": "in3", "title": "Typee"})).unwrap();
    insert_holdings_record(&conn, "ho1", "in1", &json!({"permanentLocationId": "loc-a"})).unwrap();
    insert_holdings_record(&conn, "ho2", "in1", &json!({"permanentLocationId": "loc-a"})).unwrap();
    insert_holdings_record(&conn, "ho3", "in2", &json!({"permanentLocationId": "loc-b"})).unwrap();
    insert_item(&conn, "it1", "ho1", &json!({"barcode": "111"})).unwrap();
    insert_item(&conn, "it2", "ho2", &json!({"barcode": "222"})).unwrap();
    insert_item(&conn, "it3", "ho3", &json!({"barcode": "333"})).unwrap();
    (dir, db)
}

fn context(catalog: ViewCatalog, db: DbConfig) -> SearchContext {
    SearchContext {
        catalog,
        db,
        batch_size: 2,
    }
}

fn by_title(predicate: Predicate) -> SearchRequest {
    let mut request = SearchRequest::new(predicate);
    request.sort.push(SortKey {
        field: FieldRef::base("title"),
        descending: false,
    });
    request
}

fn run(ctx: &SearchContext, request: &SearchRequest) -> (Result<PumpOutcome, RoutingError>, SharedBuf) {
    let buf = SharedBuf::default();
    let mut sink = HttpSink::new(buf.clone(), Framing::Identity, Watermarks::new(1 << 16, 1 << 12)).unwrap();
    let result = search(ctx, request, &mut sink).map(|report| report.outcome);
    drop(sink);
    (result, buf)
}

fn ids(body: &Value) -> Vec<&str> {
    body.as_array()
        .unwrap()
        .iter()
        .map(|doc| doc["id"].as_str().unwrap())
        .collect()
}

// --- results ---

#[test]
fn test_base_search() {
    let (_dir, db) = inventory();
    let ctx = context(ViewCatalog::inventory(), db);
    let request = by_title(Predicate::compare(FieldRef::base("title"), CompareOp::Matches, "*e*"));
    let (outcome, buf) = run(&ctx, &request);
    assert_eq!(outcome.unwrap(), PumpOutcome::Completed);
    let body = buf.json();
    assert_eq!(ids(&body), vec!["in3", "in2"]);
    assert_eq!(body[1], json!({"id": "in2", "title": "Walden"}));
}

#[test]
fn test_holdings_search_returns_each_instance_once() {
    let (_dir, db) = inventory();
    let ctx = context(ViewCatalog::inventory(), db);
    let request = by_title(Predicate::compare(
        FieldRef::qualified("holdingsRecords", "permanentLocationId"),
        CompareOp::Eq,
        "loc-a",
    ));
    let (outcome, buf) = run(&ctx, &request);
    assert_eq!(outcome.unwrap(), PumpOutcome::Completed);
    assert_eq!(ids(&buf.json()), vec!["in1"]);
}

#[test]
fn test_mixed_levels_search() {
    let (_dir, db) = inventory();
    let ctx = context(ViewCatalog::inventory(), db);
    let request = by_title(Predicate::Or(vec![
        Predicate::compare(FieldRef::qualified("item", "barcode"), CompareOp::Eq, "333"),
        Predicate::compare(FieldRef::base("title"), CompareOp::Eq, "Typee"),
    ]));
    let (outcome, buf) = run(&ctx, &request);
    assert_eq!(outcome.unwrap(), PumpOutcome::Completed);
    assert_eq!(ids(&buf.json()), vec!["in3", "in2"]);
}

#[test]
fn test_paged_search() {
    let (_dir, db) = inventory();
    let ctx = context(ViewCatalog::inventory(), db);
    let mut request = by_title(Predicate::All);
    request.limit = Some(1);
    request.offset = 1;
    let (_, buf) = run(&ctx, &request);
    assert_eq!(ids(&buf.json()), vec!["in3"]);
}

#[test]
fn test_no_match_is_empty_array() {
    let (_dir, db) = inventory();
    let ctx = context(ViewCatalog::inventory(), db);
    let request = SearchRequest::new(Predicate::compare(
        FieldRef::qualified("item", "barcode"),
        CompareOp::Eq,
        "999",
    ));
    let (outcome, buf) = run(&ctx, &request);
    assert_eq!(outcome.unwrap(), PumpOutcome::Completed);
    assert_eq!(buf.json(), json!([]));
}

#[test]
fn test_holdings_sort_uses_extreme_value_per_instance() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".invstream");
    open_db(&path, None).unwrap();
    let db = DbConfig::new(path);
    let conn = db.connect().unwrap();
    insert_instance(&conn, "in1", &json!({"id": "in1", "title": "Moby Dick"})).unwrap();
    insert_instance(&conn, "in2", &json!({"id": "in2", "title": "Walden"})).unwrap();
    insert_holdings_record(&conn, "ho1", "in1", &json!({"callNumber": "B"})).unwrap();
    insert_holdings_record(&conn, "ho2", "in1", &json!({"callNumber": "Z"})).unwrap();
    insert_holdings_record(&conn, "ho3", "in2", &json!({"callNumber": "M"})).unwrap();
    drop(conn);
    let ctx = context(ViewCatalog::inventory(), db);

    let call_number = FieldRef::qualified("holdingsRecords", "callNumber");
    for descending in [false, true] {
        let mut request = SearchRequest::new(Predicate::compare(call_number.clone(), CompareOp::Ge, "A"));
        request.sort.push(SortKey {
            field: call_number.clone(),
            descending,
        });
        let (outcome, buf) = run(&ctx, &request);
        assert_eq!(outcome.unwrap(), PumpOutcome::Completed);
        // in1 spans B..Z, so it leads in both directions.
        assert_eq!(ids(&buf.json()), vec!["in1", "in2"], "descending={descending}");
    }
}

// --- errors ---

#[test]
fn test_unknown_qualifier_is_bad_request() {
    let (_dir, db) = inventory();
    let ctx = context(ViewCatalog::inventory(), db);
    let request = SearchRequest::new(Predicate::compare(
        FieldRef::qualified("orders", "poNumber"),
        CompareOp::Eq,
        "1",
    ));
    let (result, buf) = run(&ctx, &request);
    assert!(matches!(result, Err(RoutingError::UnknownQualifier { .. })));
    let body = buf.json();
    let error = &body["errors"][0];
    assert_eq!(error["code"], "invalid_query");
    assert_eq!(error["parameters"][0]["key"], "orders.poNumber");
}

#[test]
fn test_store_failure_before_first_row_is_server_error() {
    let (_dir, db) = inventory();
    let mut views = ViewCatalog::inventory().views().to_vec();
    views[1] = ViewDescriptor::new(
        ScopeLevel::JoinedL1,
        "missing_view",
        &[(ScopeLevel::Base, "jsonb"), (ScopeLevel::JoinedL1, "ho_jsonb")],
    );
    let catalog = ViewCatalog::new(views, "id", ViewCatalog::inventory().qualifiers().clone()).unwrap();
    let ctx = context(catalog, db);
    let request = SearchRequest::new(Predicate::compare(
        FieldRef::qualified("holdingsRecords", "permanentLocationId"),
        CompareOp::Eq,
        "loc-a",
    ));
    let (outcome, buf) = run(&ctx, &request);
    assert!(matches!(outcome.unwrap(), PumpOutcome::FailedBeforeStart(_)));
    assert_eq!(buf.json()["errors"][0]["code"], "query_failed");
}
