//! Pool-level events surfaced to the caller.

use super::message_protocols::Report;
use serde::Serialize;
use tokio::sync::mpsc;

/// A worker fault observed by the pool. Observational only: nothing is retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerFault {
    pub slot_index: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    /// One task finished on some slot.
    Report(Report),
    /// A worker process failed to spawn, misbehaved on its channel or became unreachable.
    Error(WorkerFault),
    /// Every slot is retired and the active worker count returned to zero.
    Done,
}

pub(crate) type EventSender = mpsc::UnboundedSender<PoolEvent>;

/// Receiving half of the pool's event stream. Ends once every lane has finished.
#[derive(Debug)]
pub struct PoolEvents {
    rx: mpsc::UnboundedReceiver<PoolEvent>,
}

impl PoolEvents {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<PoolEvent>) -> Self {
        Self { rx }
    }

    pub async fn recv(&mut self) -> Option<PoolEvent> {
        self.rx.recv().await
    }
}

pub(crate) fn emit_fault(events: &EventSender, slot_index: usize, message: impl Into<String>) {
    let fault = WorkerFault {
        slot_index,
        message: message.into(),
    };
    tracing::error!(slot_index, message = %fault.message, "Child error");
    // The caller may have stopped listening; faults are observational.
    let _ = events.send(PoolEvent::Error(fault));
}
