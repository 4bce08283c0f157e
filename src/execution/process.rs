//! Worker process launching.
//!
//! [`WorkerLauncher`] is the seam between the pool and whatever runs a worker.
//! [`ProcessLauncher`] spawns a real child process and speaks newline-delimited
//! JSON over its stdin/stdout. Worker stderr is inherited by the parent.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::debug_port::debug_flag;
use super::message_protocols::{PoolMessage, WorkerMessage};
use crate::config::PoolConfig;
use crate::error::{PoolError, Result};

/// Default capacity of the per-worker message channels.
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Everything needed to start the worker for one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub slot_index: usize,
    pub program: PathBuf,
    /// Inherited startup arguments followed by the slot's debug flag, if any.
    pub args: Vec<String>,
}

impl LaunchSpec {
    pub fn for_slot(config: &PoolConfig, slot_index: usize) -> Result<Self> {
        let program = match &config.worker_program {
            Some(program) => program.clone(),
            None => std::env::current_exe().map_err(|e| {
                PoolError::spawn(slot_index, format!("Failed to get current executable: {e}"))
            })?,
        };

        let mut args = config.worker_args.clone();
        if let Some(flag) = debug_flag(config.debug_mode, slot_index, config.debug_base_port)? {
            debug!(slot_index, %flag, "Worker debug port");
            args.push(flag);
        }

        Ok(Self {
            slot_index,
            program,
            args,
        })
    }
}

/// Process-level events from one worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerSignal {
    Message(WorkerMessage),
    Error(String),
    Exited {
        code: Option<i32>,
        signal: Option<i32>,
    },
}

/// Both directions of a launched worker's message channel.
#[derive(Debug)]
pub struct WorkerChannel {
    pub pid: Option<u32>,
    pub outbound: mpsc::Sender<PoolMessage>,
    pub inbound: mpsc::Receiver<WorkerSignal>,
}

#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, spec: LaunchSpec) -> Result<WorkerChannel>;
}

/// Launches workers as child processes.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    channel_capacity: usize,
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, spec: LaunchSpec) -> Result<WorkerChannel> {
        let slot_index = spec.slot_index;

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|e| {
            PoolError::spawn(slot_index, format!("{}: {e}", spec.program.display()))
        })?;
        let pid = child.id();

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PoolError::spawn(slot_index, "Child stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PoolError::spawn(slot_index, "Child stdout not captured"))?;

        info!(slot_index, ?pid, program = %spec.program.display(), "Spawned worker process");

        let (outbound_tx, outbound_rx) = mpsc::channel(self.channel_capacity);
        let (signal_tx, signal_rx) = mpsc::channel(self.channel_capacity);

        tokio::spawn(write_messages(slot_index, stdin, outbound_rx, signal_tx.clone()));
        tokio::spawn(read_messages(slot_index, child, stdout, signal_tx));

        Ok(WorkerChannel {
            pid,
            outbound: outbound_tx,
            inbound: signal_rx,
        })
    }
}

/// Drain pool messages into the worker's stdin. Stdin is closed after `exit`.
async fn write_messages(
    slot_index: usize,
    mut stdin: ChildStdin,
    mut outbound: mpsc::Receiver<PoolMessage>,
    signals: mpsc::Sender<WorkerSignal>,
) {
    while let Some(message) = outbound.recv().await {
        let line = match message.to_line() {
            Ok(line) => line,
            Err(e) => {
                let _ = signals
                    .send(WorkerSignal::Error(format!("Failed to encode message: {e}")))
                    .await;
                continue;
            }
        };

        if let Err(e) = write_line(&mut stdin, &line).await {
            let _ = signals
                .send(WorkerSignal::Error(format!("Failed to send to worker: {e}")))
                .await;
            break;
        }

        if message == PoolMessage::Exit {
            break;
        }
    }
    debug!(slot_index, "Worker stdin closed");
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await
}

/// Parse worker stdout into signals, then reap the child.
async fn read_messages(
    slot_index: usize,
    mut child: Child,
    stdout: ChildStdout,
    signals: mpsc::Sender<WorkerSignal>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => {
                let signal = match WorkerMessage::from_line(&line) {
                    Ok(message) => {
                        debug!(slot_index, ?message, "Received message");
                        WorkerSignal::Message(message)
                    }
                    Err(e) => WorkerSignal::Error(format!("Invalid worker message: {e}")),
                };
                // The bridge is gone once its slot retired; keep draining until EOF.
                let _ = signals.send(signal).await;
            }
            Ok(None) => break,
            Err(e) => {
                let _ = signals
                    .send(WorkerSignal::Error(format!(
                        "Failed to receive from worker: {e}"
                    )))
                    .await;
                break;
            }
        }
    }

    let (code, signal) = match child.wait().await {
        Ok(status) => (status.code(), exit_signal(&status)),
        Err(e) => {
            warn!(slot_index, error = %e, "Failed to reap worker");
            (None, None)
        }
    };
    info!(slot_index, ?code, ?signal, "Child exited");
    let _ = signals.send(WorkerSignal::Exited { code, signal }).await;
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::debug_port::DebugMode;

    #[test]
    fn test_launch_spec_appends_debug_flag_after_inherited_args() {
        let config = PoolConfig::new(3)
            .with_worker_program("/usr/bin/worker", vec!["--require".into(), "steps".into()])
            .with_debug(DebugMode::Debug, 5858);

        let spec = LaunchSpec::for_slot(&config, 2).unwrap();
        assert_eq!(spec.program, PathBuf::from("/usr/bin/worker"));
        assert_eq!(spec.args, vec!["--require", "steps", "--debug=5860"]);
    }

    #[test]
    fn test_launch_spec_without_debug() {
        let config = PoolConfig::new(1).with_worker_program("worker", Vec::new());
        let spec = LaunchSpec::for_slot(&config, 0).unwrap();
        assert!(spec.args.is_empty());
    }

    #[test]
    fn test_launch_spec_defaults_to_current_exe() {
        let spec = LaunchSpec::for_slot(&PoolConfig::new(1), 0).unwrap();
        assert_eq!(spec.program, std::env::current_exe().unwrap());
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let config = PoolConfig::new(1).with_worker_program("/nonexistent/worker-binary", Vec::new());
        let spec = LaunchSpec::for_slot(&config, 0).unwrap();

        let result = ProcessLauncher::new().launch(spec).await;
        assert!(matches!(
            result,
            Err(PoolError::SpawnError { slot_index: 0, .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_garbage_output_becomes_error_signal() {
        let config = PoolConfig::new(1)
            .with_worker_program("/bin/sh", vec!["-c".into(), "echo not-json".into()]);
        let spec = LaunchSpec::for_slot(&config, 0).unwrap();

        let mut channel = ProcessLauncher::new().launch(spec).await.unwrap();
        match channel.inbound.recv().await {
            Some(WorkerSignal::Error(message)) => assert!(message.contains("Invalid worker message")),
            other => panic!("Expected Error signal, got {other:?}"),
        }
        assert_eq!(
            channel.inbound.recv().await,
            Some(WorkerSignal::Exited {
                code: Some(0),
                signal: None
            })
        );
    }
}
