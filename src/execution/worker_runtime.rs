//! Worker side of the pool protocol.
//!
//! A worker program announces `ready`, receives `init` once, then runs each
//! `task` through its [`TaskExecutor`], answering with a `report` followed by
//! `request_next`. It stops on `exit` or when the pool closes its stdin.

use async_trait::async_trait;
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use super::message_protocols::{PoolMessage, Task, WorkerMessage};
use crate::error::{PoolError, Result};

/// Profile name reported when an executor fails before naming one.
pub const UNKNOWN_PROFILE: &str = "unknown";

/// Settings the pool sends in `init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerContext {
    pub slot_index: usize,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub profile_name: String,
    pub payload: serde_json::Value,
    pub success: bool,
}

#[async_trait]
pub trait TaskExecutor: Send {
    async fn execute(&mut self, context: &WorkerContext, task: Task) -> anyhow::Result<TaskOutcome>;
}

pub struct WorkerRuntime<E> {
    executor: E,
    context: Option<WorkerContext>,
}

impl<E: TaskExecutor> WorkerRuntime<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            context: None,
        }
    }

    /// Serve the pool over this process's stdin/stdout.
    pub async fn run_stdio(self) -> Result<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        self.run(stdin, stdout).await
    }

    pub async fn run<R, W>(mut self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        write_message(&mut writer, &WorkerMessage::Ready).await?;

        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            let message = match PoolMessage::from_line(&line) {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "Invalid message from pool");
                    continue;
                }
            };

            match message {
                PoolMessage::Init {
                    slot_index,
                    dry_run,
                } => {
                    debug!(slot_index, dry_run, "Worker initialized");
                    self.context = Some(WorkerContext {
                        slot_index,
                        dry_run,
                    });
                }
                PoolMessage::Task { task } => {
                    let context = self.context.ok_or_else(|| {
                        PoolError::ProtocolError("task received before init".to_string())
                    })?;
                    let report = self.execute(&context, task).await;
                    write_message(&mut writer, &report).await?;
                    write_message(
                        &mut writer,
                        &WorkerMessage::RequestNext {
                            slot_index: context.slot_index,
                        },
                    )
                    .await?;
                }
                PoolMessage::Exit => {
                    info!("Worker received exit");
                    return Ok(());
                }
            }
        }

        debug!("Pool closed the channel");
        Ok(())
    }

    async fn execute(&mut self, context: &WorkerContext, task: Task) -> WorkerMessage {
        match self.executor.execute(context, task).await {
            Ok(outcome) => WorkerMessage::report(
                context.slot_index,
                outcome.profile_name,
                outcome.payload,
                outcome.success,
            ),
            Err(e) => {
                warn!(slot_index = context.slot_index, error = %e, "Task failed");
                WorkerMessage::report(
                    context.slot_index,
                    UNKNOWN_PROFILE,
                    json!({ "error": e.to_string() }),
                    false,
                )
            }
        }
    }
}

async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &WorkerMessage) -> Result<()> {
    writer.write_all(message.to_line()?.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
