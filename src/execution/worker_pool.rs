//! Pull-based worker pool orchestrator.
//!
//! `start()` launches one lane per slot. Each lane asks the caller for a task,
//! lazily spawns its worker on the first task, forwards every later task to the
//! same process and retires the slot once the caller replies with no task. A
//! single supervisor task owns the slot table and the active worker count and
//! emits [`PoolEvent::Done`] when the pool drains.
//!
//! # Examples
//!
//! ```rust,no_run
//! use parallel_worker_pool::execution::{PoolEvent, Task, WorkerPool};
//! use parallel_worker_pool::PoolConfig;
//!
//! # async fn example() -> parallel_worker_pool::Result<()> {
//! let pool = WorkerPool::with_process_launcher(PoolConfig::new(2))?;
//! let mut run = pool.start().await;
//!
//! let mut tasks = vec![Task::new("a.feature"), Task::new("b.feature")];
//! loop {
//!     tokio::select! {
//!         Some(request) = run.requests.recv() => request.reply(tasks.pop()),
//!         Some(event) = run.events.recv() => {
//!             if event == PoolEvent::Done {
//!                 break;
//!             }
//!         }
//!         else => break,
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use super::bridge::WorkerBridge;
use super::events::{emit_fault, EventSender, PoolEvent, PoolEvents};
use super::message_protocols::Task;
use super::process::{LaunchSpec, ProcessLauncher, WorkerLauncher};
use super::slot::{Slot, SlotState, SlotTable, SlotTransition};
use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::logging::log_slot_operation;

type TransitionSender = mpsc::UnboundedSender<(usize, SlotTransition)>;

/// A slot asking for its next task. Answer it exactly once through [`TaskRequest::reply`].
#[derive(Debug)]
pub struct TaskRequest {
    slot_index: usize,
    reply: TaskReply,
}

impl TaskRequest {
    pub fn slot_index(&self) -> usize {
        self.slot_index
    }

    /// `Some(task)` hands the slot more work; `None` retires it.
    pub fn reply(self, task: Option<Task>) {
        self.reply.send(task)
    }

    pub fn into_parts(self) -> (usize, TaskReply) {
        (self.slot_index, self.reply)
    }
}

/// Single-shot reply handle. Sending consumes it; dropping it counts as `None`.
#[derive(Debug)]
pub struct TaskReply {
    slot_index: usize,
    tx: oneshot::Sender<Option<Task>>,
}

impl TaskReply {
    /// Answer the request. The handle is consumed, so a slot is answered at most once:
    ///
    /// ```compile_fail
    /// use parallel_worker_pool::execution::{Task, TaskRequest};
    ///
    /// fn answer_twice(request: TaskRequest) {
    ///     let (_, reply) = request.into_parts();
    ///     reply.send(Some(Task::new("a.feature")));
    ///     reply.send(None);
    /// }
    /// ```
    ///
    /// ```compile_fail
    /// use parallel_worker_pool::execution::TaskRequest;
    ///
    /// fn answer_twice(request: TaskRequest) {
    ///     request.reply(None);
    ///     request.reply(None);
    /// }
    /// ```
    pub fn send(self, task: Option<Task>) {
        if self.tx.send(task).is_err() {
            debug!(slot_index = self.slot_index, "Reply for a lane that is gone");
        }
    }
}

/// Receiving half of the task request channel. Ends once every lane has finished.
#[derive(Debug)]
pub struct TaskRequests {
    rx: mpsc::Receiver<TaskRequest>,
}

impl TaskRequests {
    pub async fn recv(&mut self) -> Option<TaskRequest> {
        self.rx.recv().await
    }
}

/// Final view of a run once every lane has ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSummary {
    pub run_id: Uuid,
    pub slot_states: Vec<SlotState>,
    pub spawned_total: usize,
    pub active_workers: usize,
    pub stalled_slots: Vec<usize>,
    pub drained: bool,
}

/// Resolves when the supervisor has seen every lane finish.
#[derive(Debug)]
pub struct PoolCompletion {
    handle: JoinHandle<PoolSummary>,
}

impl PoolCompletion {
    pub async fn wait(self) -> Result<PoolSummary> {
        self.handle
            .await
            .map_err(|e| PoolError::SupervisorFailed(e.to_string()))
    }
}

/// Handles to a started pool.
#[derive(Debug)]
pub struct PoolRun {
    pub run_id: Uuid,
    pub requests: TaskRequests,
    pub events: PoolEvents,
    pub completion: PoolCompletion,
}

/// Worker pool over a fixed number of slots.
#[derive(Clone)]
pub struct WorkerPool {
    config: Arc<PoolConfig>,
    launcher: Arc<dyn WorkerLauncher>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    pub fn new(config: PoolConfig, launcher: Arc<dyn WorkerLauncher>) -> Result<Self> {
        config.validate()?;
        if config.debug_mode.is_enabled() {
            info!(
                mode = ?config.debug_mode,
                base_port = config.debug_base_port,
                "Debug ports starting from base port"
            );
        }
        Ok(Self {
            config: Arc::new(config),
            launcher,
        })
    }

    pub fn with_process_launcher(config: PoolConfig) -> Result<Self> {
        Self::new(config, Arc::new(ProcessLauncher::new()))
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Start every slot's lane. Returns once all lanes are spawned; completion of
    /// the work is signalled by [`PoolEvent::Done`] and [`PoolCompletion`].
    pub async fn start(&self) -> PoolRun {
        let run_id = Uuid::new_v4();
        let worker_count = self.config.worker_count;

        // One outstanding request per slot at most, so this never applies backpressure.
        let (request_tx, request_rx) = mpsc::channel(worker_count);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (transition_tx, transition_rx) = mpsc::unbounded_channel();

        let supervisor = tokio::spawn(
            supervise(run_id, SlotTable::new(worker_count), transition_rx, event_tx.clone())
                .instrument(tracing::info_span!("pool", %run_id)),
        );

        for slot_index in 0..worker_count {
            let lane = SlotLane {
                slot: Slot::new(slot_index),
                config: Arc::clone(&self.config),
                launcher: Arc::clone(&self.launcher),
                requests: request_tx.clone(),
                transitions: transition_tx.clone(),
                events: event_tx.clone(),
            };
            tokio::spawn(
                lane.run()
                    .instrument(tracing::info_span!("slot", %run_id, slot_index)),
            );
        }

        info!(%run_id, worker_count, "Started worker pool");

        PoolRun {
            run_id,
            requests: TaskRequests { rx: request_rx },
            events: PoolEvents::new(event_rx),
            completion: PoolCompletion { handle: supervisor },
        }
    }
}

/// Sole owner of the slot table. Runs until every lane has dropped its sender.
async fn supervise(
    run_id: Uuid,
    mut table: SlotTable,
    mut transitions: mpsc::UnboundedReceiver<(usize, SlotTransition)>,
    events: EventSender,
) -> PoolSummary {
    while let Some((slot_index, transition)) = transitions.recv().await {
        if table.record(slot_index, transition) {
            let _ = events.send(PoolEvent::Done);
        }
    }

    let summary = PoolSummary {
        run_id,
        slot_states: table.states().to_vec(),
        spawned_total: table.spawned_total(),
        active_workers: table.active_workers(),
        stalled_slots: table.stalled_slots(),
        drained: table.is_drained(),
    };
    info!(
        spawned_total = summary.spawned_total,
        drained = summary.drained,
        stalled = summary.stalled_slots.len(),
        "Worker pool finished"
    );
    summary
}

/// The pull loop of one slot.
struct SlotLane {
    slot: Slot<WorkerBridge>,
    config: Arc<PoolConfig>,
    launcher: Arc<dyn WorkerLauncher>,
    requests: mpsc::Sender<TaskRequest>,
    transitions: TransitionSender,
    events: EventSender,
}

impl SlotLane {
    async fn run(mut self) {
        loop {
            let task = self.request_next().await;

            let step = match (task, self.slot.state()) {
                (Some(task), SlotState::Empty) => self.spawn_and_start(task).await,
                (Some(task), _) => self.forward(task).await,
                (None, _) => {
                    self.retire().await;
                    return;
                }
            };

            let step = match step {
                Ok(()) => self.wait_for_next_request().await,
                Err(e) => Err(e),
            };

            if let Err(e) = step {
                self.notify(SlotTransition::Stalled {
                    reason: e.to_string(),
                });
                return;
            }
        }
    }

    async fn request_next(&self) -> Option<Task> {
        let slot_index = self.slot.index();
        let (tx, rx) = oneshot::channel();
        let request = TaskRequest {
            slot_index,
            reply: TaskReply { slot_index, tx },
        };

        if self.requests.send(request).await.is_err() {
            debug!(slot_index, "Task requests no longer received; retiring");
            return None;
        }

        // A dropped reply handle means no more work for this slot.
        rx.await.unwrap_or(None)
    }

    async fn spawn_and_start(&mut self, task: Task) -> Result<()> {
        let slot_index = self.slot.index();
        self.slot.begin_spawn()?;
        self.notify(SlotTransition::SpawnStarted);

        info!(slot_index, "Creating worker");
        let bridge = match self.launch(slot_index).await {
            Ok(bridge) => bridge,
            Err(e) => {
                emit_fault(&self.events, slot_index, e.to_string());
                return Err(e);
            }
        };

        self.notify(SlotTransition::Spawned { pid: bridge.pid() });
        log_slot_operation("spawn", slot_index, bridge.pid(), "spawning", None);
        let dry_run = self.config.dry_run;
        self.slot.attach(bridge)?.start(dry_run, task).await
    }

    async fn launch(&self, slot_index: usize) -> Result<WorkerBridge> {
        let spec = LaunchSpec::for_slot(&self.config, slot_index)?;
        WorkerBridge::launch(self.launcher.as_ref(), spec, self.events.clone()).await
    }

    async fn forward(&mut self, task: Task) -> Result<()> {
        self.bridge()?.send_task(task).await
    }

    async fn wait_for_next_request(&mut self) -> Result<()> {
        self.bridge()?.wait_for_next_request().await
    }

    fn bridge(&mut self) -> Result<&mut WorkerBridge> {
        let slot_index = self.slot.index();
        self.slot.process_mut().ok_or_else(|| PoolError::WorkerLost {
            slot_index,
            reason: "no worker attached".to_string(),
        })
    }

    async fn retire(&mut self) {
        let slot_index = self.slot.index();
        match self.slot.retire() {
            Ok(Some(bridge)) => {
                let pid = bridge.pid();
                if let Err(e) = bridge.exit().await {
                    warn!(slot_index, error = %e, "Exit instruction not delivered");
                }
                log_slot_operation("retire", slot_index, pid, "retired", None);
                self.notify(SlotTransition::Retired);
            }
            Ok(None) => {
                debug!(slot_index, "Slot retired without spawning a worker");
                self.notify(SlotTransition::Retired);
            }
            Err(e) => self.notify(SlotTransition::Stalled {
                reason: e.to_string(),
            }),
        }
    }

    fn notify(&self, transition: SlotTransition) {
        if self.transitions.send((self.slot.index(), transition)).is_err() {
            warn!(slot_index = self.slot.index(), "Supervisor is gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedLauncher, WorkerScript};
    use serde_json::json;

    #[test]
    fn test_zero_workers_rejected() {
        let launcher = Arc::new(ScriptedLauncher::new());
        let result = WorkerPool::new(PoolConfig::new(0), launcher);
        assert!(matches!(result, Err(PoolError::ConfigurationError(_))));
    }

    #[tokio::test]
    async fn test_start_issues_one_request_per_slot() {
        let launcher = Arc::new(ScriptedLauncher::new());
        let pool = WorkerPool::new(PoolConfig::new(3), launcher.clone()).unwrap();
        let mut run = pool.start().await;

        let mut slots = Vec::new();
        for _ in 0..3 {
            let request = run.requests.recv().await.unwrap();
            slots.push(request.slot_index());
            request.reply(None);
        }
        slots.sort_unstable();
        assert_eq!(slots, vec![0, 1, 2]);

        let summary = run.completion.wait().await.unwrap();
        assert_eq!(summary.spawned_total, 0);
        assert!(!summary.drained);
        assert!(summary.slot_states.iter().all(|s| *s == SlotState::Retired));
        assert!(launcher.launches().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_reply_retires_slot() {
        let launcher = Arc::new(ScriptedLauncher::new());
        let pool = WorkerPool::new(PoolConfig::new(1), launcher).unwrap();
        let mut run = pool.start().await;

        let request = run.requests.recv().await.unwrap();
        drop(request);

        let summary = run.completion.wait().await.unwrap();
        assert_eq!(summary.slot_states, vec![SlotState::Retired]);
    }

    #[tokio::test]
    async fn test_slot_reuses_its_worker() {
        let launcher = Arc::new(ScriptedLauncher::new());
        let pool = WorkerPool::new(PoolConfig::new(1).with_dry_run(true), launcher.clone()).unwrap();
        let mut run = pool.start().await;

        let mut tasks = vec![Task::new(json!("second")), Task::new(json!("first"))];
        while let Some(request) = run.requests.recv().await {
            request.reply(tasks.pop());
        }

        let summary = run.completion.wait().await.unwrap();
        assert_eq!(summary.spawned_total, 1);
        assert!(summary.drained);
        assert_eq!(launcher.launches().len(), 1);

        let received = launcher.received(0);
        assert_eq!(
            received.first(),
            Some(&crate::execution::PoolMessage::Init {
                slot_index: 0,
                dry_run: true
            })
        );
        assert_eq!(launcher.tasks_received(0), vec![json!("first"), json!("second")]);
        assert_eq!(received.last(), Some(&crate::execution::PoolMessage::Exit));
    }

    #[tokio::test]
    async fn test_exit_to_hung_up_worker_is_reported() {
        let launcher = Arc::new(
            ScriptedLauncher::new().with_script(0, WorkerScript::HangUpAfterFirstTask),
        );
        let pool = WorkerPool::new(PoolConfig::new(1), launcher).unwrap();

        let outcome = pool
            .start()
            .await
            .drive(crate::execution::QueueTaskSource::new(vec![Task::new(json!("a"))]))
            .await
            .unwrap();

        assert_eq!(outcome.reports.len(), 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].slot_index, 0);
        assert!(outcome.errors[0].message.contains("Failed to send to worker"));
        assert_eq!(outcome.done_signals, 1);
        assert_eq!(outcome.summary.slot_states, vec![SlotState::Retired]);
    }

    #[tokio::test]
    async fn test_spawn_failure_stalls_slot_and_reports_error() {
        let launcher = Arc::new(ScriptedLauncher::new().with_script(0, WorkerScript::FailSpawn));
        let pool = WorkerPool::new(PoolConfig::new(1), launcher).unwrap();
        let mut run = pool.start().await;

        let request = run.requests.recv().await.unwrap();
        request.reply(Some(Task::new(json!("x"))));

        match run.events.recv().await {
            Some(PoolEvent::Error(fault)) => assert_eq!(fault.slot_index, 0),
            other => panic!("Expected error event, got {other:?}"),
        }

        let summary = run.completion.wait().await.unwrap();
        assert_eq!(summary.slot_states, vec![SlotState::Spawning]);
        assert_eq!(summary.stalled_slots, vec![0]);
        assert_eq!(summary.active_workers, 0);
    }
}
