//! Line-delimited JSON protocol between the daemon and a session host.
//!
//! One JSON object per line, requests on the child's stdin, replies on its
//! stdout. The child's stderr is a free-form log channel. Correlation is by
//! `id`; the `ready` hello and the `exit` request carry none.

use boxd_core::ExecEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Parent → child.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Run a command, reply once with `result` or `error`.
    Exec {
        id: Uuid,
        command: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },
    /// Run a command, emitting `stream_event`s followed by a terminal event.
    ExecStream {
        id: Uuid,
        command: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },
    /// Shut the host down cleanly.
    Exit,
}

/// Child → parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlReply {
    /// Sent once after the shell is up; the session is unusable before it.
    Ready,
    Result {
        id: Uuid,
        stdout: String,
        stderr: String,
        exit_code: i32,
    },
    Error {
        id: Uuid,
        error: String,
    },
    StreamEvent {
        id: Uuid,
        event: ExecEvent,
    },
}

/// Serialize a message as one protocol line (newline included).
pub fn encode_line<T: Serialize>(msg: &T) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(msg)?;
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trip() {
        let id = Uuid::new_v4();
        let req = ControlRequest::Exec {
            id,
            command: "echo hi".into(),
            cwd: None,
        };
        let line = encode_line(&req).unwrap();
        assert!(line.ends_with('\n'));
        assert!(!line[..line.len() - 1].contains('\n'));

        let parsed: ControlRequest = serde_json::from_str(line.trim()).unwrap();
        match parsed {
            ControlRequest::Exec {
                id: pid, command, ..
            } => {
                assert_eq!(pid, id);
                assert_eq!(command, "echo hi");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn cwd_omitted_when_absent() {
        let req = ControlRequest::Exec {
            id: Uuid::new_v4(),
            command: "true".into(),
            cwd: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("cwd").is_none());
        assert_eq!(json["op"], "exec");
    }

    #[test]
    fn reply_stream_event_carries_exec_event() {
        let reply = ControlReply::StreamEvent {
            id: Uuid::new_v4(),
            event: ExecEvent::Stdout {
                data: "chunk".into(),
            },
        };
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["op"], "stream_event");
        assert_eq!(json["event"]["type"], "stdout");
    }
}
