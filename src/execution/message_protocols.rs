//! Messages exchanged between the pool and a worker process.
//!
//! Messages are JSON-serialized and newline-delimited, tagged by `cmd`.

use serde::{Deserialize, Serialize};

/// Opaque unit of work. The pool never looks inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Task(pub serde_json::Value);

impl Task {
    pub fn new(value: impl Into<serde_json::Value>) -> Self {
        Self(value.into())
    }

    pub fn into_inner(self) -> serde_json::Value {
        self.0
    }
}

/// Outcome of one task, forwarded upward without interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub slot_index: usize,
    pub profile_name: String,
    pub payload: serde_json::Value,
    pub success: bool,
}

/// Pool to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum PoolMessage {
    Init { slot_index: usize, dry_run: bool },
    Task { task: Task },
    Exit,
}

/// Worker to pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum WorkerMessage {
    Ready,
    Report {
        slot_index: usize,
        profile_name: String,
        payload: serde_json::Value,
        success: bool,
    },
    RequestNext { slot_index: usize },
}

impl PoolMessage {
    /// Serialize to JSON line (with newline).
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

impl WorkerMessage {
    pub fn report(
        slot_index: usize,
        profile_name: impl Into<String>,
        payload: serde_json::Value,
        success: bool,
    ) -> Self {
        Self::Report {
            slot_index,
            profile_name: profile_name.into(),
            payload,
            success,
        }
    }

    /// Serialize to JSON line (with newline).
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_init_wire_format() {
        let line = PoolMessage::Init {
            slot_index: 1,
            dry_run: true,
        }
        .to_line()
        .unwrap();

        assert!(line.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value, json!({"cmd": "init", "slot_index": 1, "dry_run": true}));
    }

    #[test]
    fn test_task_payload_is_untouched() {
        let payload = json!({"feature": "login.feature", "profile": {"tags": ["@smoke"]}});
        let line = PoolMessage::Task {
            task: Task::new(payload.clone()),
        }
        .to_line()
        .unwrap();

        match PoolMessage::from_line(&line).unwrap() {
            PoolMessage::Task { task } => assert_eq!(task.into_inner(), payload),
            other => panic!("Expected Task variant, got {other:?}"),
        }
    }

    #[test]
    fn test_worker_messages_parse() {
        assert_eq!(
            WorkerMessage::from_line(r#"{"cmd":"ready"}"#).unwrap(),
            WorkerMessage::Ready
        );
        assert_eq!(
            WorkerMessage::from_line("{\"cmd\":\"request_next\",\"slot_index\":3}\r\n").unwrap(),
            WorkerMessage::RequestNext { slot_index: 3 }
        );

        let report = WorkerMessage::from_line(
            r#"{"cmd":"report","slot_index":0,"profile_name":"default","payload":[1,2],"success":false}"#,
        )
        .unwrap();
        assert_eq!(report, WorkerMessage::report(0, "default", json!([1, 2]), false));
    }

    #[test]
    fn test_exit_has_no_fields() {
        let line = PoolMessage::Exit.to_line().unwrap();
        assert_eq!(line, "{\"cmd\":\"exit\"}\n");
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(WorkerMessage::from_line(r#"{"cmd":"start"}"#).is_err());
        assert!(WorkerMessage::from_line("not json").is_err());
    }
}
