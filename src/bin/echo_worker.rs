//! Echo Worker Binary
//!
//! Minimal worker program for the pool protocol. Every task is reported back
//! with the arguments the worker was started with, so callers can see which
//! debug flag a slot received. A task object with `"fail": true` is reported as
//! failed; `"profile"` names the report's profile.

use async_trait::async_trait;
use serde_json::json;

use parallel_worker_pool::execution::{TaskExecutor, TaskOutcome, WorkerContext, WorkerRuntime};
use parallel_worker_pool::logging::init_worker_logging;
use parallel_worker_pool::Task;

struct EchoExecutor {
    args: Vec<String>,
}

#[async_trait]
impl TaskExecutor for EchoExecutor {
    async fn execute(&mut self, context: &WorkerContext, task: Task) -> anyhow::Result<TaskOutcome> {
        let task = task.into_inner();
        let profile_name = task
            .get("profile")
            .and_then(|p| p.as_str())
            .unwrap_or("default")
            .to_string();
        let success = task.get("fail").and_then(|f| f.as_bool()) != Some(true);

        Ok(TaskOutcome {
            profile_name,
            payload: json!({
                "task": task,
                "slot_index": context.slot_index,
                "dry_run": context.dry_run,
                "args": self.args,
                "pid": std::process::id(),
            }),
            success,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_worker_logging();

    let executor = EchoExecutor {
        args: std::env::args().skip(1).collect(),
    };
    WorkerRuntime::new(executor).run_stdio().await?;
    Ok(())
}
