//! Interpreter context records and code execution events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Public snapshot of an interpreter context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextInfo {
    #[serde(rename = "contextId")]
    pub id: String,
    pub language: String,
    pub cwd: String,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

/// One event of a streaming code execution.
///
/// Mirrors the kernel's publish channel at the interface level: stream
/// output, rich display payloads, the final result, errors, and the
/// completion marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum CodeEvent {
    Stdout {
        data: String,
    },
    Stderr {
        data: String,
    },
    DisplayData {
        data: Value,
    },
    ExecutionResult {
        data: Value,
        execution_count: u64,
    },
    Error {
        ename: String,
        evalue: String,
        traceback: Vec<String>,
    },
    ExecutionComplete {
        execution_count: u64,
    },
}

impl CodeEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ExecutionComplete { .. } | Self::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_info_uses_context_id_key() {
        let info = ContextInfo {
            id: "ctx_1".into(),
            language: "python".into(),
            cwd: "/workspace".into(),
            created_at: Utc::now(),
            last_used: Utc::now(),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["contextId"], "ctx_1");
        assert_eq!(json["language"], "python");
    }

    #[test]
    fn code_event_shapes() {
        let done = CodeEvent::ExecutionComplete { execution_count: 3 };
        let json = serde_json::to_value(&done).unwrap();
        assert_eq!(json["type"], "execution_complete");
        assert!(done.is_terminal());

        let err = CodeEvent::Error {
            ename: "NameError".into(),
            evalue: "name 'x' is not defined".into(),
            traceback: vec!["Traceback...".into()],
        };
        assert!(err.is_terminal());
    }
}
