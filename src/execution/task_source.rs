//! Task sources and a driver that serves a pool from one.

use async_trait::async_trait;
use std::collections::VecDeque;
use tracing::debug;

use super::events::{PoolEvent, WorkerFault};
use super::message_protocols::{Report, Task};
use super::worker_pool::{PoolRun, PoolSummary};
use crate::error::Result;

/// Supplies tasks on demand. `None` ends the supply for that slot.
#[async_trait]
pub trait TaskSource: Send {
    async fn next_task(&mut self, slot_index: usize) -> Option<Task>;
}

/// First-come-first-served queue shared by every slot.
#[derive(Debug, Clone, Default)]
pub struct QueueTaskSource {
    queue: VecDeque<Task>,
}

impl QueueTaskSource {
    pub fn new(tasks: impl IntoIterator<Item = Task>) -> Self {
        Self {
            queue: tasks.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

#[async_trait]
impl TaskSource for QueueTaskSource {
    async fn next_task(&mut self, slot_index: usize) -> Option<Task> {
        let task = self.queue.pop_front();
        debug!(slot_index, has_task = task.is_some(), remaining = self.queue.len(), "Next task");
        task
    }
}

/// Everything observed while driving a run to completion.
#[derive(Debug, Clone)]
pub struct DriveOutcome {
    pub summary: PoolSummary,
    pub reports: Vec<Report>,
    pub errors: Vec<WorkerFault>,
    pub done_signals: usize,
}

impl PoolRun {
    /// Answer every task request from `source` and collect events until all
    /// lanes have finished.
    pub async fn drive<S: TaskSource>(self, mut source: S) -> Result<DriveOutcome> {
        let PoolRun {
            mut requests,
            mut events,
            completion,
            ..
        } = self;

        let mut reports = Vec::new();
        let mut errors = Vec::new();
        let mut done_signals = 0;
        let mut requests_open = true;
        let mut events_open = true;

        while requests_open || events_open {
            tokio::select! {
                request = requests.recv(), if requests_open => match request {
                    Some(request) => {
                        let (slot_index, reply) = request.into_parts();
                        reply.send(source.next_task(slot_index).await);
                    }
                    None => requests_open = false,
                },
                event = events.recv(), if events_open => match event {
                    Some(PoolEvent::Report(report)) => reports.push(report),
                    Some(PoolEvent::Error(fault)) => errors.push(fault),
                    Some(PoolEvent::Done) => done_signals += 1,
                    None => events_open = false,
                },
            }
        }

        let summary = completion.wait().await?;
        Ok(DriveOutcome {
            summary,
            reports,
            errors,
            done_signals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_queue_is_fifo_across_slots() {
        let mut source = QueueTaskSource::new(vec![
            Task::new(json!("a")),
            Task::new(json!("b")),
        ]);

        assert_eq!(source.next_task(1).await, Some(Task::new(json!("a"))));
        assert_eq!(source.next_task(0).await, Some(Task::new(json!("b"))));
        assert_eq!(source.next_task(1).await, None);
        assert_eq!(source.remaining(), 0);
    }
}
