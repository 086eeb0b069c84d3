//! Stream pump: the control loop moving rows from a cursor to a sink under flow control.
//!
//! Rows are written strictly in cursor order, one at a time. A saturated sink stops the pump
//! from pulling further rows until the sink signals drain. Failures split on whether the
//! consumer has already seen output: before the first byte the caller can still answer with a
//! structured error; after it the sink is force-closed so a partial stream never looks complete.

use log::debug;

use super::cursor::RowCursor;
use crate::error::StreamError;
use crate::sink::{OutputSink, WriteStatus};

/// Counters of one pump run. Owned by that run; hooks see it read-only.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamSession {
    pub rows_emitted: u64,
    pub cancelled: bool,
    pub header_sent: bool,
    pub drain_waits: u64,
}

/// Answer of a [`BatchHook`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchDecision {
    Continue,
    Stop,
}

/// Consulted before every batch is pulled from the cursor.
pub trait BatchHook {
    fn before_batch(&mut self, session: &StreamSession) -> BatchDecision;
}

impl<F> BatchHook for F
where
    F: FnMut(&StreamSession) -> BatchDecision,
{
    fn before_batch(&mut self, session: &StreamSession) -> BatchDecision {
        self(session)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PumpOutcome {
    /// Cursor exhausted and the sink closed normally.
    Completed,
    /// A batch hook asked to stop.
    Cancelled,
    /// Failed before the consumer saw anything; the sink is untouched.
    FailedBeforeStart(StreamError),
    /// Failed after output began; the sink has been force-closed.
    FailedMidStream(StreamError),
    /// Consumer went away.
    Disconnected,
}

impl PumpOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PumpOutcome::Completed => "COMPLETED",
            PumpOutcome::Cancelled => "CANCELLED",
            PumpOutcome::FailedBeforeStart(_) => "FAILED_BEFORE_START",
            PumpOutcome::FailedMidStream(_) => "FAILED_MID_STREAM",
            PumpOutcome::Disconnected => "DISCONNECTED",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PumpReport {
    pub outcome: PumpOutcome,
    pub rows_emitted: u64,
    pub drain_waits: u64,
}

/// Pump every row of `cursor` into `sink`. The cursor is always closed on return.
///
/// On `Cancelled` and `FailedBeforeStart` the sink receives no further calls, so the caller
/// decides how to end it (flush published events, send an error response).
pub fn pump<C, S>(mut cursor: C, mut sink: S, mut on_batch: Option<&mut dyn BatchHook>) -> PumpReport
where
    C: RowCursor,
    S: OutputSink,
{
    let mut session = StreamSession::default();
    let outcome = run(&mut cursor, &mut sink, &mut on_batch, &mut session);
    cursor.close();
    debug!(
        "pump finished: {} after {} rows, {} drain waits",
        outcome.label(),
        session.rows_emitted,
        session.drain_waits
    );
    PumpReport {
        outcome,
        rows_emitted: session.rows_emitted,
        drain_waits: session.drain_waits,
    }
}

fn run<C, S>(
    cursor: &mut C,
    sink: &mut S,
    on_batch: &mut Option<&mut dyn BatchHook>,
    session: &mut StreamSession,
) -> PumpOutcome
where
    C: RowCursor,
    S: OutputSink,
{
    loop {
        if let Some(hook) = on_batch.as_deref_mut()
            && hook.before_batch(session) == BatchDecision::Stop
        {
            session.cancelled = true;
            return PumpOutcome::Cancelled;
        }

        let batch = match cursor.next_batch() {
            Ok(Some(batch)) => batch,
            Ok(None) => break,
            Err(e) => return fail(sink, session, e.into()),
        };

        for row in &batch {
            let mut status = match sink.write(row) {
                Ok(status) => status,
                Err(e) => return fail(sink, session, e.into()),
            };
            session.header_sent = sink.header_sent();
            if status != WriteStatus::Closed {
                session.rows_emitted += 1;
            }
            if status == WriteStatus::Saturated {
                session.drain_waits += 1;
                status = match sink.await_drain() {
                    Ok(status) => status,
                    Err(e) => return fail(sink, session, e.into()),
                };
            }
            if status == WriteStatus::Closed {
                sink.force_close();
                return PumpOutcome::Disconnected;
            }
        }
    }

    match sink.finish() {
        Ok(()) => {
            session.header_sent = sink.header_sent();
            PumpOutcome::Completed
        }
        Err(e) => fail(sink, session, e.into()),
    }
}

fn fail<S: OutputSink>(sink: &mut S, session: &mut StreamSession, error: StreamError) -> PumpOutcome {
    session.header_sent = sink.header_sent();
    if session.header_sent {
        sink.force_close();
        PumpOutcome::FailedMidStream(error)
    } else {
        PumpOutcome::FailedBeforeStart(error)
    }
}
