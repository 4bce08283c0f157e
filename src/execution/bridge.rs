//! Worker process bridge.
//!
//! Wraps the channel of one launched worker and translates its signals into
//! pool-level effects: reports and faults go to the event stream, `ready` and
//! `request_next` hand control back to the slot lane.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::events::{emit_fault, EventSender, PoolEvent};
use super::message_protocols::{PoolMessage, Report, Task, WorkerMessage};
use super::process::{LaunchSpec, WorkerChannel, WorkerLauncher, WorkerSignal};
use crate::error::{PoolError, Result};

pub struct WorkerBridge {
    slot_index: usize,
    pid: Option<u32>,
    outbound: mpsc::Sender<PoolMessage>,
    inbound: mpsc::Receiver<WorkerSignal>,
    events: EventSender,
}

impl std::fmt::Debug for WorkerBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerBridge")
            .field("slot_index", &self.slot_index)
            .field("pid", &self.pid)
            .finish()
    }
}

/// What the bridge saw while waiting on its worker.
enum Awaited {
    Ready,
    NextRequested,
}

impl WorkerBridge {
    pub async fn launch(
        launcher: &dyn WorkerLauncher,
        spec: LaunchSpec,
        events: EventSender,
    ) -> Result<Self> {
        let slot_index = spec.slot_index;
        let WorkerChannel {
            pid,
            outbound,
            inbound,
        } = launcher.launch(spec).await?;

        Ok(Self {
            slot_index,
            pid,
            outbound,
            inbound,
            events,
        })
    }

    pub fn slot_index(&self) -> usize {
        self.slot_index
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Wait for `ready`, then send `init` followed by the first task.
    pub async fn start(&mut self, dry_run: bool, task: Task) -> Result<()> {
        self.wait_for(Awaited::Ready).await?;
        self.send(PoolMessage::Init {
            slot_index: self.slot_index,
            dry_run,
        })
        .await?;
        self.send(PoolMessage::Task { task }).await
    }

    pub async fn send_task(&mut self, task: Task) -> Result<()> {
        self.send(PoolMessage::Task { task }).await
    }

    /// Forward reports and faults until the worker asks for its next task.
    pub async fn wait_for_next_request(&mut self) -> Result<()> {
        self.wait_for(Awaited::NextRequested).await
    }

    /// Tell the worker to exit. The bridge is consumed; the process is not awaited,
    /// but faults it raises on the way out still reach the event stream.
    pub async fn exit(mut self) -> Result<()> {
        debug!(slot_index = self.slot_index, "Worker exiting");
        self.send(PoolMessage::Exit).await?;
        tokio::spawn(self.drain());
        Ok(())
    }

    async fn drain(mut self) {
        while let Some(signal) = self.inbound.recv().await {
            match signal {
                WorkerSignal::Message(WorkerMessage::Report {
                    slot_index,
                    profile_name,
                    payload,
                    success,
                }) => self.forward_report(Report {
                    slot_index,
                    profile_name,
                    payload,
                    success,
                }),
                WorkerSignal::Message(message) => {
                    debug!(slot_index = self.slot_index, ?message, "Ignoring message after exit");
                }
                WorkerSignal::Error(message) => emit_fault(&self.events, self.slot_index, message),
                WorkerSignal::Exited { code, signal } => {
                    debug!(slot_index = self.slot_index, ?code, ?signal, "Retired worker exited");
                    break;
                }
            }
        }
    }

    fn forward_report(&self, report: Report) {
        debug!(
            slot_index = report.slot_index,
            profile_name = %report.profile_name,
            success = report.success,
            "Received report"
        );
        let _ = self.events.send(PoolEvent::Report(report));
    }

    async fn send(&mut self, message: PoolMessage) -> Result<()> {
        if self.outbound.send(message).await.is_err() {
            let reason = "worker channel closed".to_string();
            emit_fault(&self.events, self.slot_index, format!("Failed to send to worker: {reason}"));
            return Err(PoolError::WorkerLost {
                slot_index: self.slot_index,
                reason,
            });
        }
        Ok(())
    }

    async fn wait_for(&mut self, awaited: Awaited) -> Result<()> {
        loop {
            let signal = self.inbound.recv().await.ok_or_else(|| PoolError::WorkerLost {
                slot_index: self.slot_index,
                reason: "signal channel closed".to_string(),
            })?;

            match signal {
                WorkerSignal::Message(WorkerMessage::Ready) => {
                    if matches!(awaited, Awaited::Ready) {
                        return Ok(());
                    }
                    debug!(slot_index = self.slot_index, "Ignoring repeated ready");
                }
                WorkerSignal::Message(WorkerMessage::Report {
                    slot_index,
                    profile_name,
                    payload,
                    success,
                }) => self.forward_report(Report {
                    slot_index,
                    profile_name,
                    payload,
                    success,
                }),
                WorkerSignal::Message(WorkerMessage::RequestNext { slot_index }) => {
                    if slot_index != self.slot_index {
                        warn!(
                            expected = self.slot_index,
                            received = slot_index,
                            "Worker requested work for another slot; serving its own slot"
                        );
                    }
                    if matches!(awaited, Awaited::NextRequested) {
                        return Ok(());
                    }
                    warn!(slot_index = self.slot_index, "Next task requested before ready");
                }
                WorkerSignal::Error(message) => {
                    emit_fault(&self.events, self.slot_index, message);
                }
                WorkerSignal::Exited { code, signal } => {
                    return Err(PoolError::WorkerLost {
                        slot_index: self.slot_index,
                        reason: format!("exited unexpectedly (code {code:?}, signal {signal:?})"),
                    });
                }
            }
        }
    }
}
