//! Output sinks: consumers of a row stream that can report saturation or a departed consumer.

pub mod event;
pub mod http;
pub mod outbound;

pub use event::{EventBus, EventMessage, EventSink, JsonLinesBus, MemoryBus, ReindexEventPayload};
pub use http::{Framing, HttpSink, ResponseStream};
pub use outbound::{Delivery, DeliveryFault, Outbound, Watermarks};

use crate::Row;
use crate::error::SinkError;

/// Result of handing one row (or a drain wait) to a sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteStatus {
    /// Accepted; keep writing.
    Ready,
    /// Accepted, but the outbound buffer is over its high-water mark. Stop pulling rows and
    /// call [`OutputSink::await_drain`] once.
    Saturated,
    /// Consumer is gone. Nothing more can be delivered and there is no one to report to.
    Closed,
}

/// Consumer of a row stream. Driven by exactly one pump; writes are strictly sequential.
pub trait OutputSink {
    /// Write one row. `Saturated` and `Ready` both mean the row was accepted.
    fn write(&mut self, row: &Row) -> Result<WriteStatus, SinkError>;

    /// Suspend until the sink has drained below its low-water mark. Returns `Ready` on drain,
    /// `Closed` if the consumer left while waiting.
    fn await_drain(&mut self) -> Result<WriteStatus, SinkError>;

    /// True once any byte or message has left for the consumer; the response head can no longer change.
    fn header_sent(&self) -> bool;

    /// Close normally after the last row (trailer, flush, wait for delivery).
    fn finish(&mut self) -> Result<(), SinkError>;

    /// Tear down without a trailer so the consumer cannot mistake a partial stream for success.
    fn force_close(&mut self);
}

impl<S: OutputSink + ?Sized> OutputSink for &mut S {
    fn write(&mut self, row: &Row) -> Result<WriteStatus, SinkError> {
        (**self).write(row)
    }

    fn await_drain(&mut self) -> Result<WriteStatus, SinkError> {
        (**self).await_drain()
    }

    fn header_sent(&self) -> bool {
        (**self).header_sent()
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        (**self).finish()
    }

    fn force_close(&mut self) {
        (**self).force_close()
    }
}
