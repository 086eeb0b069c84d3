//! Row cursors: ordered rows delivered in batches.
//!
//! [`SqliteCursor`] keeps its connection and read transaction on a dedicated reader thread and
//! ships batches over a bounded channel, so the thread driving the pump never touches SQLite.

use crossbeam_channel::{Receiver, Sender, bounded};
use log::{debug, warn};
use rusqlite::types::Value as SqlValue;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use super::db_ops::DbConfig;
use crate::Row;
use crate::error::CursorError;
use crate::utils::config::CURSOR_CHANNEL_CAP;

/// Server-side cursor. Owned by exactly one pump run.
pub trait RowCursor {
    /// Next batch in cursor order; `Ok(None)` once exhausted.
    fn next_batch(&mut self) -> Result<Option<Vec<Row>>, CursorError>;

    /// Release the cursor and its transaction. Idempotent.
    fn close(&mut self);
}

impl<C: RowCursor + ?Sized> RowCursor for Box<C> {
    fn next_batch(&mut self) -> Result<Option<Vec<Row>>, CursorError> {
        (**self).next_batch()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

enum ReaderMsg {
    Batch(Vec<Row>),
    Done,
    Failed(CursorError),
}

/// Cursor over one SQL query, read inside one transaction on its own thread.
pub struct SqliteCursor {
    rx: Option<Receiver<ReaderMsg>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    exhausted: bool,
}

impl SqliteCursor {
    /// Start the reader. Query errors arrive on the first [`RowCursor::next_batch`].
    pub fn open(
        db: &DbConfig,
        sql: &str,
        params: Vec<SqlValue>,
        batch_size: usize,
    ) -> Result<Self, CursorError> {
        let (tx, rx) = bounded::<ReaderMsg>(CURSOR_CHANNEL_CAP);
        let stop = Arc::new(AtomicBool::new(false));
        let reader = Reader {
            db: db.clone(),
            sql: sql.to_string(),
            params,
            batch_size: batch_size.max(1),
            stop: Arc::clone(&stop),
        };
        let handle = thread::Builder::new()
            .name("cursor-reader".to_string())
            .spawn(move || reader.run(tx))
            .map_err(|e| CursorError::Rejected(format!("spawn cursor reader: {e}")))?;
        Ok(Self {
            rx: Some(rx),
            stop,
            handle: Some(handle),
            exhausted: false,
        })
    }
}

impl RowCursor for SqliteCursor {
    fn next_batch(&mut self) -> Result<Option<Vec<Row>>, CursorError> {
        if self.exhausted {
            return Ok(None);
        }
        let Some(rx) = self.rx.as_ref() else {
            return Ok(None);
        };
        match rx.recv() {
            Ok(ReaderMsg::Batch(rows)) => Ok(Some(rows)),
            Ok(ReaderMsg::Done) => {
                self.exhausted = true;
                Ok(None)
            }
            Ok(ReaderMsg::Failed(e)) => {
                self.exhausted = true;
                Err(e)
            }
            Err(_) => {
                self.exhausted = true;
                Err(CursorError::ReaderGone)
            }
        }
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // Dropping the receiver unblocks a reader parked on a full channel.
        self.rx.take();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("cursor reader panicked");
        }
    }
}

impl Drop for SqliteCursor {
    fn drop(&mut self) {
        self.close();
    }
}

struct Reader {
    db: DbConfig,
    sql: String,
    params: Vec<SqlValue>,
    batch_size: usize,
    stop: Arc<AtomicBool>,
}

impl Reader {
    fn run(self, tx: Sender<ReaderMsg>) {
        let msg = match self.read(&tx) {
            Ok(()) => ReaderMsg::Done,
            Err(e) => ReaderMsg::Failed(e),
        };
        let _ = tx.send(msg);
    }

    fn read(&self, tx: &Sender<ReaderMsg>) -> Result<(), CursorError> {
        let conn = self
            .db
            .connect()
            .map_err(|e| CursorError::Rejected(format!("{e:#}")))?;
        conn.execute_batch("BEGIN")
            .map_err(|e| CursorError::Rejected(e.to_string()))?;
        let result = self.stream(&conn, tx);
        // Read-only: ending the transaction either way releases the snapshot.
        if let Err(e) = conn.execute_batch("COMMIT") {
            debug!("cursor transaction end: {}", e);
        }
        result
    }

    fn stream(&self, conn: &rusqlite::Connection, tx: &Sender<ReaderMsg>) -> Result<(), CursorError> {
        let mut stmt = conn
            .prepare(&self.sql)
            .map_err(|e| CursorError::Rejected(e.to_string()))?;
        let with_doc = stmt.column_count() > 1;
        let mut rows = stmt
            .query(rusqlite::params_from_iter(self.params.iter()))
            .map_err(|e| CursorError::Rejected(e.to_string()))?;

        let mut batch = Vec::with_capacity(self.batch_size);
        let mut shipped = 0u64;
        loop {
            if self.stop.load(Ordering::SeqCst) {
                debug!("cursor stopped after {} rows", shipped);
                return Ok(());
            }
            let next = rows.next().map_err(|e| {
                if shipped == 0 && batch.is_empty() {
                    CursorError::Rejected(e.to_string())
                } else {
                    CursorError::Read(e.to_string())
                }
            })?;
            let Some(row) = next else { break };
            batch.push(decode_row(row, with_doc)?);
            if batch.len() == self.batch_size {
                shipped += batch.len() as u64;
                let full = std::mem::replace(&mut batch, Vec::with_capacity(self.batch_size));
                if tx.send(ReaderMsg::Batch(full)).is_err() {
                    return Ok(());
                }
            }
        }
        if !batch.is_empty() {
            let _ = tx.send(ReaderMsg::Batch(batch));
        }
        Ok(())
    }
}

fn decode_row(row: &rusqlite::Row<'_>, with_doc: bool) -> Result<Row, CursorError> {
    let read = |e: rusqlite::Error| CursorError::Read(e.to_string());
    let id = match row.get::<_, SqlValue>(0).map_err(read)? {
        SqlValue::Text(s) => s,
        SqlValue::Integer(n) => n.to_string(),
        other => return Err(CursorError::Read(format!("unexpected id value {other:?}"))),
    };
    let jsonb = if with_doc {
        match row.get::<_, Option<String>>(1).map_err(read)? {
            Some(text) => Some(
                serde_json::from_str(&text)
                    .map_err(|e| CursorError::Read(format!("record {id}: {e}")))?,
            ),
            None => None,
        }
    } else {
        None
    };
    Ok(Row { id, jsonb })
}

/// Cursor over any row iterator (synthetic corpora, tests).
pub struct IterCursor<I> {
    rows: Option<I>,
    batch_size: usize,
    deferred: Option<CursorError>,
}

impl<I> IterCursor<I>
where
    I: Iterator<Item = Result<Row, CursorError>>,
{
    pub fn new(rows: I, batch_size: usize) -> Self {
        Self {
            rows: Some(rows),
            batch_size: batch_size.max(1),
            deferred: None,
        }
    }

    /// True once closed.
    pub fn is_closed(&self) -> bool {
        self.rows.is_none()
    }
}

type OkRows = std::iter::Map<std::vec::IntoIter<Row>, fn(Row) -> Result<Row, CursorError>>;

fn ok_row(row: Row) -> Result<Row, CursorError> {
    Ok(row)
}

impl IterCursor<OkRows> {
    /// Cursor over rows already in memory.
    pub fn from_rows(rows: Vec<Row>, batch_size: usize) -> Self {
        let ok: fn(Row) -> Result<Row, CursorError> = ok_row;
        Self::new(rows.into_iter().map(ok), batch_size)
    }
}

impl<I> RowCursor for IterCursor<I>
where
    I: Iterator<Item = Result<Row, CursorError>>,
{
    fn next_batch(&mut self) -> Result<Option<Vec<Row>>, CursorError> {
        if let Some(e) = self.deferred.take() {
            return Err(e);
        }
        let Some(rows) = self.rows.as_mut() else {
            return Ok(None);
        };
        let mut batch = Vec::with_capacity(self.batch_size);
        for item in rows.by_ref() {
            match item {
                Ok(row) => batch.push(row),
                Err(e) if batch.is_empty() => return Err(e),
                Err(e) => {
                    // Hand out what was read; the error comes with the next call.
                    self.deferred = Some(e);
                    break;
                }
            }
            if batch.len() == self.batch_size {
                break;
            }
        }
        Ok((!batch.is_empty()).then_some(batch))
    }

    fn close(&mut self) {
        self.rows = None;
        self.deferred = None;
    }
}
