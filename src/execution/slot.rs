//! Slot state machine and the supervisor's slot table.
//!
//! A [`Slot`] is owned by its lane and holds the worker handle. The
//! [`SlotTable`] is owned by the supervisor and mirrors every slot's state from
//! the transitions lanes report, keeping the active worker count.

use crate::error::{PoolError, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

/// `Empty -> Spawning -> Running -> Retired`, or `Empty -> Retired` for a slot
/// that never received a task. `Retired` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Empty,
    Spawning,
    Running,
    Retired,
}

impl SlotState {
    pub fn can_transition_to(self, next: SlotState) -> bool {
        matches!(
            (self, next),
            (SlotState::Empty, SlotState::Spawning)
                | (SlotState::Empty, SlotState::Retired)
                | (SlotState::Spawning, SlotState::Running)
                | (SlotState::Running, SlotState::Retired)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == SlotState::Retired
    }
}

/// One execution lane. `process` is set exactly once and cleared on retirement.
#[derive(Debug)]
pub struct Slot<H> {
    index: usize,
    state: SlotState,
    process: Option<H>,
}

impl<H> Slot<H> {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            state: SlotState::Empty,
            process: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn process_mut(&mut self) -> Option<&mut H> {
        self.process.as_mut()
    }

    fn transition(&mut self, next: SlotState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(PoolError::InvalidSlotTransition {
                slot_index: self.index,
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    pub fn begin_spawn(&mut self) -> Result<()> {
        self.transition(SlotState::Spawning)
    }

    pub fn attach(&mut self, process: H) -> Result<&mut H> {
        self.transition(SlotState::Running)?;
        Ok(self.process.insert(process))
    }

    /// Retire the slot, handing back the process handle if one was ever attached.
    pub fn retire(&mut self) -> Result<Option<H>> {
        self.transition(SlotState::Retired)?;
        Ok(self.process.take())
    }
}

/// Transitions a lane reports to the supervisor.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotTransition {
    SpawnStarted,
    Spawned { pid: Option<u32> },
    Retired,
    /// The lane stopped pulling without retiring (spawn failure, lost worker).
    Stalled { reason: String },
}

/// Supervisor-owned view of every slot plus the active worker count.
#[derive(Debug)]
pub struct SlotTable {
    states: Vec<SlotState>,
    stalled: Vec<bool>,
    pids: Vec<Option<u32>>,
    active_workers: usize,
    spawned_total: usize,
    drained: bool,
}

impl SlotTable {
    pub fn new(worker_count: usize) -> Self {
        Self {
            states: vec![SlotState::Empty; worker_count],
            stalled: vec![false; worker_count],
            pids: vec![None; worker_count],
            active_workers: 0,
            spawned_total: 0,
            drained: false,
        }
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers
    }

    pub fn spawned_total(&self) -> usize {
        self.spawned_total
    }

    pub fn states(&self) -> &[SlotState] {
        &self.states
    }

    pub fn stalled_slots(&self) -> Vec<usize> {
        self.stalled
            .iter()
            .enumerate()
            .filter_map(|(index, stalled)| stalled.then_some(index))
            .collect()
    }

    pub fn is_drained(&self) -> bool {
        self.drained
    }

    /// Apply a lane's transition. Returns `true` exactly once: on the transition
    /// that drains the pool.
    pub fn record(&mut self, slot_index: usize, transition: SlotTransition) -> bool {
        let Some(current) = self.states.get(slot_index).copied() else {
            warn!(slot_index, "Transition for unknown slot ignored");
            return false;
        };

        match transition {
            SlotTransition::SpawnStarted => {
                self.states[slot_index] = SlotState::Spawning;
            }
            SlotTransition::Spawned { pid } => {
                self.states[slot_index] = SlotState::Running;
                self.pids[slot_index] = pid;
                self.active_workers += 1;
                self.spawned_total += 1;
                debug!(slot_index, ?pid, active_workers = self.active_workers, "Worker count");
            }
            SlotTransition::Retired => {
                if current == SlotState::Running {
                    self.active_workers = self.active_workers.saturating_sub(1);
                }
                self.states[slot_index] = SlotState::Retired;
                debug!(slot_index, active_workers = self.active_workers, "Worker count");
            }
            SlotTransition::Stalled { reason } => {
                warn!(slot_index, state = ?current, %reason, "Slot stalled");
                self.stalled[slot_index] = true;
            }
        }

        self.check_drained()
    }

    fn check_drained(&mut self) -> bool {
        if self.drained || self.spawned_total == 0 || self.active_workers != 0 {
            return false;
        }

        let pending = self
            .states
            .iter()
            .zip(&self.stalled)
            .any(|(state, stalled)| {
                !stalled && matches!(state, SlotState::Empty | SlotState::Spawning)
            });
        if pending {
            return false;
        }

        info!(spawned_total = self.spawned_total, "Last worker exited");
        self.drained = true;
        true
    }
}
