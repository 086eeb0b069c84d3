//! Event sink: one message per row on an append-only bus.

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::outbound::{Delivery, DeliveryFault, Outbound, Watermarks};
use super::{OutputSink, WriteStatus};
use crate::error::SinkError;
use crate::{JobKind, ReindexJob, ResourceName, Row};

/// Body of a reindex or iteration event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReindexEventPayload {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Logical timestamp: position of the message within its job.
    pub ts: u64,
    /// Full record (authorities only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<serde_json::Value>,
}

/// One message on the bus, keyed by record id and tagged with topic, resource and job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    pub topic: String,
    pub key: String,
    pub resource_name: ResourceName,
    /// Carries the job id under `reindex-job-id` or `iteration-job-id`.
    pub headers: BTreeMap<String, String>,
    pub payload: ReindexEventPayload,
}

impl EventMessage {
    pub fn job_id(&self) -> Option<&str> {
        [JobKind::Reindex, JobKind::Iteration]
            .iter()
            .find_map(|kind| self.headers.get(kind.job_id_header()))
            .map(String::as_str)
    }
}

/// Append-only message bus. Appends from one sink arrive in order.
pub trait EventBus: Send + Sync {
    fn append(&self, message: &EventMessage) -> Result<()>;

    /// Push buffered messages out. Called once when a sink closes.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

impl<B: EventBus + ?Sized> EventBus for Arc<B> {
    fn append(&self, message: &EventMessage) -> Result<()> {
        (**self).append(message)
    }

    fn flush(&self) -> Result<()> {
        (**self).flush()
    }
}

/// In-process bus; keeps every message.
#[derive(Default)]
pub struct MemoryBus {
    messages: Mutex<Vec<EventMessage>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything appended so far.
    pub fn messages(&self) -> Vec<EventMessage> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventBus for MemoryBus {
    fn append(&self, message: &EventMessage) -> Result<()> {
        self.messages
            .lock()
            .map_err(|_| anyhow::anyhow!("memory bus lock poisoned"))?
            .push(message.clone());
        Ok(())
    }
}

/// File bus: one JSON object per line, opened in append mode.
pub struct JsonLinesBus {
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesBus {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open event log {}", path.display()))?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl EventBus for JsonLinesBus {
    fn append(&self, message: &EventMessage) -> Result<()> {
        let mut line = serde_json::to_vec(message).context("encode event")?;
        line.push(b'\n');
        self.writer
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?
            .write_all(&line)
            .context("append event")
    }

    fn flush(&self) -> Result<()> {
        self.writer
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?
            .flush()
            .context("flush event log")
    }
}

struct BusDelivery<B> {
    bus: B,
}

impl<B: EventBus + 'static> Delivery<EventMessage> for BusDelivery<B> {
    fn deliver(&mut self, message: EventMessage) -> std::result::Result<(), DeliveryFault> {
        self.bus
            .append(&message)
            .map_err(|e| DeliveryFault::Failed(format!("{e:#}")))
    }

    fn close(&mut self, _aborted: bool) {
        if let Err(e) = self.bus.flush() {
            warn!("event bus flush failed: {:#}", e);
        }
    }
}

/// Publishes each row of one job pass. Cost unit is one message.
pub struct EventSink {
    out: Outbound<EventMessage>,
    kind: JobKind,
    resource: ResourceName,
    topic: String,
    event_type: String,
    job_id: String,
    clock: u64,
    /// Rows accepted onto the queue; shared so the count outlives a panicking pass.
    accepted: Arc<AtomicU64>,
    finished: bool,
}

impl EventSink {
    /// Sink stamping every message with `job`'s topic, event type and job id header.
    pub fn new<B: EventBus + 'static>(bus: B, job: &ReindexJob, marks: Watermarks) -> Result<Self> {
        let out = Outbound::spawn("event-sink", BusDelivery { bus }, marks)?;
        Ok(Self {
            out,
            kind: job.kind,
            resource: job.resource_name,
            topic: job.topic_name.clone(),
            event_type: job.event_type.clone(),
            job_id: job.id.clone(),
            clock: 0,
            accepted: Arc::new(AtomicU64::new(0)),
            finished: false,
        })
    }

    /// Count accepted rows into `counter` instead of a private one.
    pub fn with_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        self.accepted = counter;
        self
    }

    /// Messages handed to the bus queue so far.
    pub fn sent(&self) -> u64 {
        self.accepted.load(Ordering::Acquire)
    }

    fn message(&mut self, row: &Row) -> EventMessage {
        self.clock += 1;
        let new = if self.kind == JobKind::Reindex && self.resource.publishes_record() {
            row.jsonb.clone()
        } else {
            None
        };
        EventMessage {
            topic: self.topic.clone(),
            key: row.id.clone(),
            resource_name: self.resource,
            headers: BTreeMap::from([(
                self.kind.job_id_header().to_string(),
                self.job_id.clone(),
            )]),
            payload: ReindexEventPayload {
                id: row.id.clone(),
                kind: self.event_type.clone(),
                ts: self.clock,
                new,
            },
        }
    }
}

impl OutputSink for EventSink {
    fn write(&mut self, row: &Row) -> std::result::Result<WriteStatus, SinkError> {
        if self.finished {
            return Err(SinkError::Finished);
        }
        let message = self.message(row);
        let status = self.out.push(message, 1)?;
        if status != WriteStatus::Closed {
            self.accepted.fetch_add(1, Ordering::AcqRel);
        }
        Ok(status)
    }

    fn await_drain(&mut self) -> std::result::Result<WriteStatus, SinkError> {
        self.out.await_drain()
    }

    fn header_sent(&self) -> bool {
        // Published events are never rolled back.
        self.clock > 0
    }

    fn finish(&mut self) -> std::result::Result<(), SinkError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.out.finish()
    }

    fn force_close(&mut self) {
        self.finished = true;
        self.out.abort();
    }
}
