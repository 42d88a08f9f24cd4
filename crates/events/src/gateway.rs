//! Cross-thread delegation.
//!
//! Handlers only run on the bus's owning thread. Dispatches made elsewhere are validated on the
//! calling thread and then passed to a [`DelegationGateway`], whose job is to get them back to
//! the owning thread and into [`Bus::apply_delegated`]. Batches must be applied in the order
//! they were delegated.

use std::sync::{Mutex, mpsc};
use std::time::Duration;

use nodebus_core::{BusError, BusResult};

use crate::bus::Bus;
use crate::record::EventRecord;

/// Hands event batches from any thread to the owning thread.
pub trait DelegationGateway: Send + Sync {
    fn delegate_events(&self, events: Vec<EventRecord>, is_undo: bool);
}

/// One delegated call.
#[derive(Debug, Clone, PartialEq)]
pub struct DelegatedBatch {
    pub events: Vec<EventRecord>,
    pub is_undo: bool,
}

/// Result of [`QueueGateway::drain`].
#[derive(Debug, Default)]
pub struct DrainReport {
    pub applied: usize,
    pub failed: Vec<BusError>,
}

/// FIFO gateway backed by a channel; the owning thread drains it from its own loop.
#[derive(Debug)]
pub struct QueueGateway {
    tx: mpsc::Sender<DelegatedBatch>,
    rx: Mutex<mpsc::Receiver<DelegatedBatch>>,
}

impl Default for QueueGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueGateway {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Apply every batch queued so far, in arrival order.
    ///
    /// A failing batch is logged and reported; later batches are still applied.
    pub fn drain(&self, bus: &Bus) -> BusResult<DrainReport> {
        let mut report = DrainReport::default();
        while let Some(batch) = self.try_next()? {
            self.apply(bus, batch, &mut report);
        }
        Ok(report)
    }

    /// Wait up to `timeout` for one batch and apply it. Returns whether a batch arrived.
    pub fn pump(&self, bus: &Bus, timeout: Duration) -> BusResult<bool> {
        let received = {
            let rx = self.rx.lock().map_err(|_| BusError::Poisoned)?;
            rx.recv_timeout(timeout).ok()
        };
        match received {
            Some(batch) => {
                let mut report = DrainReport::default();
                self.apply(bus, batch, &mut report);
                match report.failed.pop() {
                    Some(err) => Err(err),
                    None => Ok(true),
                }
            }
            None => Ok(false),
        }
    }

    // The lock is released before the batch is applied: handlers may delegate again.
    fn try_next(&self) -> BusResult<Option<DelegatedBatch>> {
        let rx = self.rx.lock().map_err(|_| BusError::Poisoned)?;
        Ok(rx.try_recv().ok())
    }

    fn apply(&self, bus: &Bus, batch: DelegatedBatch, report: &mut DrainReport) {
        match bus.apply_delegated(batch.events, batch.is_undo) {
            Ok(()) => report.applied += 1,
            Err(err) => {
                tracing::error!("failed to apply delegated events: {err:?}");
                report.failed.push(err);
            }
        }
    }
}

impl DelegationGateway for QueueGateway {
    fn delegate_events(&self, events: Vec<EventRecord>, is_undo: bool) {
        if self.tx.send(DelegatedBatch { events, is_undo }).is_err() {
            tracing::warn!("delegation queue is closed; dropping events");
        }
    }
}
