//! Flow-controlled outbound queue shared by the sinks.
//!
//! The producer (the pump) enqueues items with a cost; a delivery thread drains them to the
//! consumer. Once pending cost passes the high-water mark the producer is told `Saturated`, and
//! [`Outbound::await_drain`] parks it until the delivery thread has taken pending cost down to
//! the low-water mark. Only the producer's own thread waits; the delivery thread never blocks on
//! the producer.

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use log::debug;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use super::WriteStatus;
use crate::error::SinkError;

/// High/low marks in the sink's cost unit (bytes for HTTP, messages for events).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Watermarks {
    pub high: usize,
    pub low: usize,
}

impl Watermarks {
    /// `low` is clamped to `high`.
    pub fn new(high: usize, low: usize) -> Self {
        Self {
            high,
            low: low.min(high),
        }
    }
}

/// Why delivery stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryFault {
    /// Consumer disconnected; nothing to report to.
    Gone,
    /// Consumer is there but rejected the item.
    Failed(String),
}

/// Consumer side of an [`Outbound`], run on the delivery thread.
pub trait Delivery<T>: Send + 'static {
    fn deliver(&mut self, item: T) -> std::result::Result<(), DeliveryFault>;

    /// Called once after the last item. `aborted` when the producer force-closed the queue.
    fn close(&mut self, _aborted: bool) {}
}

struct Shared {
    pending: AtomicUsize,
    waiting: AtomicBool,
    aborted: AtomicBool,
    fault: Mutex<Option<DeliveryFault>>,
}

impl Shared {
    fn fault(&self) -> Option<DeliveryFault> {
        self.fault.lock().ok().and_then(|f| f.clone())
    }

    fn set_fault(&self, fault: DeliveryFault) {
        if let Ok(mut slot) = self.fault.lock() {
            slot.get_or_insert(fault);
        }
    }
}

pub struct Outbound<T> {
    tx: Option<Sender<(T, usize)>>,
    drained_rx: Receiver<()>,
    shared: Arc<Shared>,
    marks: Watermarks,
    handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Outbound<T> {
    /// Start the delivery thread `name` draining into `delivery`.
    pub fn spawn<D: Delivery<T>>(name: &str, mut delivery: D, marks: Watermarks) -> Result<Self> {
        let (tx, rx) = unbounded::<(T, usize)>();
        let (drained_tx, drained_rx) = bounded::<()>(1);
        let shared = Arc::new(Shared {
            pending: AtomicUsize::new(0),
            waiting: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            fault: Mutex::new(None),
        });
        let shared_d = Arc::clone(&shared);
        let low = marks.low;
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let release = |cost: usize| {
                    let now = shared_d.pending.fetch_sub(cost, Ordering::SeqCst) - cost;
                    if now <= low && shared_d.waiting.swap(false, Ordering::SeqCst) {
                        let _ = drained_tx.try_send(());
                    }
                };
                for (item, cost) in rx.iter() {
                    if shared_d.aborted.load(Ordering::SeqCst) || shared_d.fault().is_some() {
                        release(cost);
                        continue;
                    }
                    if let Err(fault) = delivery.deliver(item) {
                        debug!("delivery stopped: {:?}", fault);
                        shared_d.set_fault(fault);
                        let _ = drained_tx.try_send(());
                    }
                    release(cost);
                }
                delivery.close(shared_d.aborted.load(Ordering::SeqCst));
            })
            .context("spawn delivery thread")?;
        Ok(Self {
            tx: Some(tx),
            drained_rx,
            shared,
            marks,
            handle: Some(handle),
        })
    }

    /// Enqueue one item. The item is accepted unless the consumer is gone or failed.
    pub fn push(&self, item: T, cost: usize) -> std::result::Result<WriteStatus, SinkError> {
        if let Some(status) = self.fault_status()? {
            return Ok(status);
        }
        let tx = self.tx.as_ref().ok_or(SinkError::Finished)?;
        let now = self.shared.pending.fetch_add(cost, Ordering::SeqCst) + cost;
        if tx.send((item, cost)).is_err() {
            self.shared.pending.fetch_sub(cost, Ordering::SeqCst);
            return Ok(self.fault_status()?.unwrap_or(WriteStatus::Closed));
        }
        if now > self.marks.high {
            self.shared.waiting.store(true, Ordering::SeqCst);
            Ok(WriteStatus::Saturated)
        } else {
            Ok(WriteStatus::Ready)
        }
    }

    /// Park until pending cost is at or below the low-water mark (or the consumer is gone).
    pub fn await_drain(&self) -> std::result::Result<WriteStatus, SinkError> {
        loop {
            if let Some(status) = self.fault_status()? {
                return Ok(status);
            }
            if self.shared.pending.load(Ordering::SeqCst) <= self.marks.low {
                self.shared.waiting.store(false, Ordering::SeqCst);
                return Ok(WriteStatus::Ready);
            }
            if self.drained_rx.recv().is_err() {
                // Delivery thread exited; whatever it left in `fault` decides.
                return Ok(self.fault_status()?.unwrap_or(WriteStatus::Ready));
            }
        }
    }

    /// Cost enqueued but not yet delivered.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Stop accepting items, deliver everything queued, and join the delivery thread.
    /// A departed consumer is not an error here; a failed one is.
    pub fn finish(&mut self) -> std::result::Result<(), SinkError> {
        self.tx.take();
        self.join();
        match self.shared.fault() {
            Some(DeliveryFault::Failed(msg)) => Err(SinkError::Delivery(msg)),
            _ => Ok(()),
        }
    }

    /// Drop everything still queued and join; the delivery side sees `close(true)`.
    pub fn abort(&mut self) {
        self.shared.aborted.store(true, Ordering::SeqCst);
        self.tx.take();
        self.join();
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            self.shared
                .set_fault(DeliveryFault::Failed("delivery thread panicked".to_string()));
        }
    }

    fn fault_status(&self) -> std::result::Result<Option<WriteStatus>, SinkError> {
        match self.shared.fault() {
            None => Ok(None),
            Some(DeliveryFault::Gone) => Ok(Some(WriteStatus::Closed)),
            Some(DeliveryFault::Failed(msg)) => Err(SinkError::Delivery(msg)),
        }
    }
}

impl<T> Drop for Outbound<T> {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
