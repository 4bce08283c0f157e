#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Parallel Worker Pool
//!
//! Spreads an unbounded, externally supplied stream of opaque tasks across a
//! fixed number of worker processes.
//!
//! ## Overview
//!
//! The pool owns `worker_count` slots. Every slot pulls: it asks the caller for
//! its next task, spawns a worker process the first time it gets one, reuses that
//! process for every later task and tells it to exit once the caller has no more
//! work for the slot. Exactly one task is in flight per slot, which is the only
//! flow control there is.
//!
//! ## Module Organization
//!
//! - [`execution`] - Slots, the worker bridge, the orchestrator and the wire protocol
//! - [`config`] - Pool options and their resolution into a [`PoolConfig`]
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//! - [`test_helpers`] - In-process worker doubles
//!
//! ## Worker protocol
//!
//! Workers speak newline-delimited JSON over stdin/stdout:
//!
//! | Direction     | `cmd`          | Fields                                         |
//! |---------------|----------------|------------------------------------------------|
//! | worker → pool | `ready`        |                                                |
//! | pool → worker | `init`         | `slot_index`, `dry_run`                        |
//! | pool → worker | `task`         | `task`                                         |
//! | worker → pool | `report`       | `slot_index`, `profile_name`, `payload`, `success` |
//! | worker → pool | `request_next` | `slot_index`                                   |
//! | pool → worker | `exit`         |                                                |
//!
//! Worker programs can use [`execution::WorkerRuntime`] to speak it.

pub mod config;
pub mod constants;
pub mod error;
pub mod execution;
pub mod logging;
pub mod test_helpers;

pub use config::{DebugPort, PoolConfig, PoolOptions};
pub use error::{PoolError, Result};
pub use execution::{
    DebugMode, PoolEvent, PoolRun, PoolSummary, QueueTaskSource, Report, Task, TaskSource,
    WorkerPool,
};
