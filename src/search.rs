//! Ad-hoc search: route the request, open a cursor on the chosen view, pump rows into an HTTP sink.

use log::{debug, error, warn};
use serde_json::json;

use crate::catalog::ViewCatalog;
use crate::engine::cursor::SqliteCursor;
use crate::engine::db_ops::DbConfig;
use crate::engine::pump::{PumpOutcome, PumpReport, pump};
use crate::error::{RoutingError, StreamError};
use crate::predicate::SearchRequest;
use crate::router::route;
use crate::sink::HttpSink;

/// What a search needs besides the request.
#[derive(Clone, Debug)]
pub struct SearchContext {
    pub catalog: ViewCatalog,
    pub db: DbConfig,
    pub batch_size: usize,
}

/// Run one search into `sink`.
///
/// A routing error is answered with `400` before any query runs and returned to the caller.
/// A store failure before the first row is answered with `500`. Anything later has already
/// force-closed the response and is only logged.
pub fn search(
    ctx: &SearchContext,
    request: &SearchRequest,
    sink: &mut HttpSink,
) -> Result<PumpReport, RoutingError> {
    let routed = match route(&ctx.catalog, request) {
        Ok(routed) => routed,
        Err(e) => {
            let body = error_body(&e.to_string(), "invalid_query", Some(e.field()));
            if let Err(se) = sink.respond_error(400, "Bad Request", &body) {
                warn!("routing error not delivered: {}", se);
            }
            return Err(e);
        }
    };
    debug!("search routed to {} ({})", routed.view_name, routed.scope_level);

    let report = match SqliteCursor::open(&ctx.db, &routed.sql, routed.params, ctx.batch_size) {
        Ok(cursor) => pump(cursor, &mut *sink, None),
        Err(e) => PumpReport {
            outcome: PumpOutcome::FailedBeforeStart(StreamError::Cursor(e)),
            rows_emitted: 0,
            drain_waits: 0,
        },
    };

    match &report.outcome {
        PumpOutcome::FailedBeforeStart(e) => {
            let body = error_body(&e.to_string(), "query_failed", None);
            if let Err(se) = sink.respond_error(500, "Internal Server Error", &body) {
                warn!("query error not delivered: {}", se);
            }
        }
        PumpOutcome::FailedMidStream(e) => {
            error!(
                "search on {} failed after {} rows, connection closed: {}",
                routed.view_name, report.rows_emitted, e
            );
        }
        PumpOutcome::Disconnected => {
            debug!("client left after {} rows", report.rows_emitted);
        }
        PumpOutcome::Completed | PumpOutcome::Cancelled => {}
    }
    Ok(report)
}

/// Structured error body: `{"errors":[{"message", "code", "parameters"}]}`.
pub fn error_body(message: &str, code: &str, field: Option<&str>) -> serde_json::Value {
    let parameters: Vec<serde_json::Value> = field
        .map(|f| vec![json!({ "key": f })])
        .unwrap_or_default();
    json!({
        "errors": [{
            "message": message,
            "code": code,
            "parameters": parameters,
        }]
    })
}
