pub mod bridge;
pub mod debug_port;
pub mod events;
pub mod message_protocols;
pub mod process;
pub mod slot;
pub mod task_source;
pub mod worker_pool;
pub mod worker_runtime;

pub use debug_port::{debug_flag, port_for, DebugMode};
pub use events::{PoolEvent, PoolEvents, WorkerFault};
pub use message_protocols::{PoolMessage, Report, Task, WorkerMessage};
pub use process::{LaunchSpec, ProcessLauncher, WorkerChannel, WorkerLauncher, WorkerSignal};
pub use slot::{SlotState, SlotTransition};
pub use task_source::{DriveOutcome, QueueTaskSource, TaskSource};
pub use worker_pool::{
    PoolCompletion, PoolRun, PoolSummary, TaskReply, TaskRequest, TaskRequests, WorkerPool,
};
pub use worker_runtime::{TaskExecutor, TaskOutcome, WorkerContext, WorkerRuntime};
