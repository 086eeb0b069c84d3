//! HTTP sink: rows as elements of one JSON array in a chunked response.
//!
//! Status and content type are fixed at the first byte. Until then a failure can still become a
//! structured error response ([`HttpSink::respond_error`]); afterwards the only honest signal
//! left is dropping the connection without the terminating chunk.

use log::debug;
use std::io::{self, Write};
use std::net::{Shutdown, TcpStream};

use super::outbound::{Delivery, DeliveryFault, Outbound, Watermarks};
use super::{OutputSink, WriteStatus};
use crate::Row;
use crate::error::SinkError;

/// Byte stream carrying one response.
pub trait ResponseStream: Write + Send + 'static {
    /// Drop the connection without completing the response.
    fn force_close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ResponseStream for TcpStream {
    fn force_close(&mut self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

impl ResponseStream for io::Stdout {}

impl ResponseStream for std::fs::File {}

/// How the body is put on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Framing {
    /// Status line, headers, `Transfer-Encoding: chunked` body.
    Chunked,
    /// Bare body (pipes, stdout).
    Identity,
}

const RESPONSE_HEAD: &str = "HTTP/1.1 200 OK\r\n\
Content-Type: application/json\r\n\
Transfer-Encoding: chunked\r\n\
\r\n";

const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

struct StreamDelivery<W> {
    stream: W,
}

impl<W: ResponseStream> Delivery<Vec<u8>> for StreamDelivery<W> {
    fn deliver(&mut self, bytes: Vec<u8>) -> Result<(), DeliveryFault> {
        self.stream
            .write_all(&bytes)
            .and_then(|_| self.stream.flush())
            .map_err(|e| {
                debug!("response stream closed: {}", e);
                DeliveryFault::Gone
            })
    }

    fn close(&mut self, aborted: bool) {
        if aborted {
            let _ = self.stream.force_close();
        } else {
            let _ = self.stream.flush();
        }
    }
}

pub struct HttpSink {
    out: Outbound<Vec<u8>>,
    framing: Framing,
    header_sent: bool,
    elements: u64,
    finished: bool,
}

impl HttpSink {
    pub fn new<W: ResponseStream>(
        stream: W,
        framing: Framing,
        marks: Watermarks,
    ) -> anyhow::Result<Self> {
        let out = Outbound::spawn("http-sink", StreamDelivery { stream }, marks)?;
        Ok(Self {
            out,
            framing,
            header_sent: false,
            elements: 0,
            finished: false,
        })
    }

    /// Frame `body` (plus the response head on first use) and enqueue it.
    fn send_body(&mut self, body: &[u8], last: bool) -> Result<WriteStatus, SinkError> {
        let mut frame = Vec::with_capacity(body.len() + 16);
        if !self.header_sent && self.framing == Framing::Chunked {
            frame.extend_from_slice(RESPONSE_HEAD.as_bytes());
        }
        match self.framing {
            Framing::Chunked => {
                if !body.is_empty() {
                    frame.extend_from_slice(format!("{:X}\r\n", body.len()).as_bytes());
                    frame.extend_from_slice(body);
                    frame.extend_from_slice(b"\r\n");
                }
                if last {
                    frame.extend_from_slice(LAST_CHUNK);
                }
            }
            Framing::Identity => frame.extend_from_slice(body),
        }
        self.header_sent = true;
        let cost = frame.len();
        self.out.push(frame, cost)
    }

    /// Structured error instead of the stream. Only possible before the first byte went out.
    pub fn respond_error(
        &mut self,
        status: u16,
        reason: &str,
        body: &serde_json::Value,
    ) -> Result<(), SinkError> {
        if self.header_sent || self.finished {
            return Err(SinkError::Finished);
        }
        let payload = serde_json::to_vec(body).map_err(|e| SinkError::Encode(e.to_string()))?;
        let mut frame = Vec::with_capacity(payload.len() + 128);
        if self.framing == Framing::Chunked {
            frame.extend_from_slice(
                format!(
                    "HTTP/1.1 {status} {reason}\r\n\
                     Content-Type: application/json\r\n\
                     Content-Length: {}\r\n\
                     Connection: close\r\n\
                     \r\n",
                    payload.len()
                )
                .as_bytes(),
            );
        }
        frame.extend_from_slice(&payload);
        self.header_sent = true;
        let cost = frame.len();
        self.out.push(frame, cost)?;
        self.finished = true;
        self.out.finish()
    }

    /// Array elements written so far.
    pub fn elements(&self) -> u64 {
        self.elements
    }
}

fn element_json(row: &Row) -> Result<Vec<u8>, SinkError> {
    let encoded = match &row.jsonb {
        Some(doc) => serde_json::to_vec(doc),
        None => serde_json::to_vec(&serde_json::json!({ "id": row.id })),
    };
    encoded.map_err(|e| SinkError::Encode(e.to_string()))
}

impl OutputSink for HttpSink {
    fn write(&mut self, row: &Row) -> Result<WriteStatus, SinkError> {
        if self.finished {
            return Err(SinkError::Finished);
        }
        let element = element_json(row)?;
        let mut body = Vec::with_capacity(element.len() + 1);
        body.push(if self.elements == 0 { b'[' } else { b',' });
        body.extend_from_slice(&element);
        let status = self.send_body(&body, false)?;
        if status != WriteStatus::Closed {
            self.elements += 1;
        }
        Ok(status)
    }

    fn await_drain(&mut self) -> Result<WriteStatus, SinkError> {
        self.out.await_drain()
    }

    fn header_sent(&self) -> bool {
        self.header_sent
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        if self.finished {
            return Ok(());
        }
        let tail: &[u8] = if self.elements == 0 { b"[]" } else { b"]" };
        self.send_body(tail, true)?;
        self.finished = true;
        self.out.finish()
    }

    fn force_close(&mut self) {
        self.finished = true;
        self.out.abort();
    }
}
