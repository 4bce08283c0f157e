//! In-process worker doubles for exercising the pool without child processes.
//!
//! [`ScriptedLauncher`] implements [`WorkerLauncher`] by spawning a tokio task per
//! slot that plays the worker's side of the protocol according to a
//! [`WorkerScript`], recording every launch and every message the pool sends.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::{PoolError, Result};
use crate::execution::message_protocols::{PoolMessage, WorkerMessage};
use crate::execution::process::{LaunchSpec, WorkerChannel, WorkerLauncher, WorkerSignal};

/// How a scripted worker behaves.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WorkerScript {
    /// Report success for every task and ask for the next one.
    #[default]
    Echo,
    /// Refuse to launch.
    FailSpawn,
    /// Raise one process error while running the first task, then carry on.
    ErrorOnFirstTask,
    /// Exit without reporting when the first task arrives.
    CrashOnFirstTask,
    /// Echo, but take this long per task.
    Slow(Duration),
    /// Report the first task, stop reading instructions, then ask for the next task.
    HangUpAfterFirstTask,
}

#[derive(Default)]
struct Recorded {
    launches: Vec<LaunchSpec>,
    received: HashMap<usize, Vec<PoolMessage>>,
}

#[derive(Default)]
pub struct ScriptedLauncher {
    scripts: HashMap<usize, WorkerScript>,
    recorded: Arc<Mutex<Recorded>>,
    live: Arc<AtomicUsize>,
    peak_live: Arc<AtomicUsize>,
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, slot_index: usize, script: WorkerScript) -> Self {
        self.scripts.insert(slot_index, script);
        self
    }

    pub fn launches(&self) -> Vec<LaunchSpec> {
        self.recorded.lock().launches.clone()
    }

    /// Every message the pool sent to the worker of `slot_index`, in order.
    pub fn received(&self, slot_index: usize) -> Vec<PoolMessage> {
        self.recorded
            .lock()
            .received
            .get(&slot_index)
            .cloned()
            .unwrap_or_default()
    }

    pub fn tasks_received(&self, slot_index: usize) -> Vec<serde_json::Value> {
        self.received(slot_index)
            .into_iter()
            .filter_map(|message| match message {
                PoolMessage::Task { task } => Some(task.into_inner()),
                _ => None,
            })
            .collect()
    }

    /// Highest number of scripted workers alive at the same time.
    pub fn peak_live_workers(&self) -> usize {
        self.peak_live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerLauncher for ScriptedLauncher {
    async fn launch(&self, spec: LaunchSpec) -> Result<WorkerChannel> {
        let slot_index = spec.slot_index;
        let script = self.scripts.get(&slot_index).cloned().unwrap_or_default();
        self.recorded.lock().launches.push(spec);

        if script == WorkerScript::FailSpawn {
            return Err(PoolError::spawn(slot_index, "scripted spawn failure"));
        }

        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_live.fetch_max(live, Ordering::SeqCst);

        let (outbound_tx, outbound_rx) = mpsc::channel(16);
        let (signal_tx, signal_rx) = mpsc::channel(16);

        let worker = ScriptedWorker {
            slot_index,
            script,
            recorded: Arc::clone(&self.recorded),
            live: Arc::clone(&self.live),
        };
        tokio::spawn(worker.run(outbound_rx, signal_tx));

        Ok(WorkerChannel {
            pid: Some(10_000 + slot_index as u32),
            outbound: outbound_tx,
            inbound: signal_rx,
        })
    }
}

struct ScriptedWorker {
    slot_index: usize,
    script: WorkerScript,
    recorded: Arc<Mutex<Recorded>>,
    live: Arc<AtomicUsize>,
}

impl ScriptedWorker {
    async fn run(
        self,
        mut outbound: mpsc::Receiver<PoolMessage>,
        signals: mpsc::Sender<WorkerSignal>,
    ) {
        let _ = signals.send(WorkerSignal::Message(WorkerMessage::Ready)).await;

        let mut tasks_seen = 0usize;
        let mut hung_up = false;
        while let Some(message) = outbound.recv().await {
            self.recorded
                .lock()
                .received
                .entry(self.slot_index)
                .or_default()
                .push(message.clone());

            match message {
                PoolMessage::Init { .. } => {}
                PoolMessage::Task { task } => {
                    tasks_seen += 1;
                    let first = tasks_seen == 1;

                    match &self.script {
                        WorkerScript::CrashOnFirstTask if first => {
                            let _ = signals
                                .send(WorkerSignal::Exited {
                                    code: Some(1),
                                    signal: None,
                                })
                                .await;
                            break;
                        }
                        WorkerScript::ErrorOnFirstTask if first => {
                            let _ = signals
                                .send(WorkerSignal::Error("scripted worker error".to_string()))
                                .await;
                        }
                        WorkerScript::Slow(delay) => tokio::time::sleep(*delay).await,
                        _ => {}
                    }

                    let report = WorkerMessage::report(
                        self.slot_index,
                        "default",
                        json!({ "task": task.into_inner() }),
                        true,
                    );
                    let _ = signals.send(WorkerSignal::Message(report)).await;
                    if self.script == WorkerScript::HangUpAfterFirstTask {
                        hung_up = true;
                        break;
                    }
                    let _ = signals
                        .send(WorkerSignal::Message(WorkerMessage::RequestNext {
                            slot_index: self.slot_index,
                        }))
                        .await;
                }
                PoolMessage::Exit => break,
            }
        }

        if hung_up {
            drop(outbound);
            let _ = signals
                .send(WorkerSignal::Message(WorkerMessage::RequestNext {
                    slot_index: self.slot_index,
                }))
                .await;
        }

        self.live.fetch_sub(1, Ordering::SeqCst);
        let _ = signals
            .send(WorkerSignal::Exited {
                code: Some(0),
                signal: None,
            })
            .await;
    }
}
