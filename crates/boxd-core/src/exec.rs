//! Command execution records and streaming events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Final record of a synchronous `exec`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// `exit_code == 0`.
    pub success: bool,
    /// The command as submitted.
    pub command: String,
    /// Wall-clock duration of the round-trip in milliseconds.
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl ExecResult {
    pub fn new(
        command: impl Into<String>,
        stdout: String,
        stderr: String,
        exit_code: i32,
        duration_ms: u64,
    ) -> Self {
        Self {
            stdout,
            stderr,
            exit_code,
            success: exit_code == 0,
            command: command.into(),
            duration_ms,
            timestamp: Utc::now(),
        }
    }
}

/// One event of a streaming `exec`.
///
/// A stream is exactly one `start`, any number of `stdout`/`stderr` chunks
/// in emission order, and exactly one terminal `complete` or `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ExecEvent {
    Start { command: String },
    Stdout { data: String },
    Stderr { data: String },
    Complete { exit_code: i32 },
    Error { message: String },
}

impl ExecEvent {
    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_result_success_tracks_exit_code() {
        let ok = ExecResult::new("true", String::new(), String::new(), 0, 3);
        assert!(ok.success);
        let bad = ExecResult::new("false", String::new(), String::new(), 1, 3);
        assert!(!bad.success);
    }

    #[test]
    fn exec_event_wire_shape() {
        let event = ExecEvent::Stdout {
            data: "hello\n".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "stdout");
        assert_eq!(json["data"], "hello\n");

        let complete: ExecEvent =
            serde_json::from_str(r#"{"type":"complete","exitCode":0}"#).unwrap();
        assert!(complete.is_terminal());
    }
}
