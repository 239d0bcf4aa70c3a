//! File operation result records and streaming read events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transport encoding of file content on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileEncoding {
    #[serde(rename = "utf-8")]
    Utf8,
    #[serde(rename = "base64")]
    Base64,
}

/// Result of a write/mkdir/delete/rename/move operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOpResult {
    pub success: bool,
    pub exit_code: i32,
    pub path: String,
    pub timestamp: DateTime<Utc>,
}

impl FileOpResult {
    pub fn ok(path: impl Into<String>) -> Self {
        Self {
            success: true,
            exit_code: 0,
            path: path.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Result of `read_file`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadFileResult {
    pub success: bool,
    pub exit_code: i32,
    pub path: String,
    /// UTF-8 text, or base64 when `is_binary`.
    pub content: String,
    pub encoding: FileEncoding,
    pub is_binary: bool,
    pub mime_type: String,
    /// Decoded size in bytes.
    pub size: u64,
    pub timestamp: DateTime<Utc>,
}

/// One directory entry from `list_files`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    /// Modification time as unix seconds.
    pub modified: i64,
}

/// Result of `list_files`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilesResult {
    pub success: bool,
    pub path: String,
    pub entries: Vec<FileEntry>,
    pub timestamp: DateTime<Utc>,
}

/// One event of a streaming file read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum FileStreamEvent {
    Chunk {
        data: String,
        encoding: FileEncoding,
    },
    Complete {
        size: u64,
        mime_type: String,
    },
    Error {
        message: String,
    },
}

/// Result of a `git clone` through a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitCheckoutResult {
    pub success: bool,
    pub repo_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub target_dir: String,
    pub stdout: String,
    pub stderr: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_wire_names() {
        assert_eq!(
            serde_json::to_string(&FileEncoding::Utf8).unwrap(),
            r#""utf-8""#
        );
        assert_eq!(
            serde_json::to_string(&FileEncoding::Base64).unwrap(),
            r#""base64""#
        );
    }

    #[test]
    fn file_stream_event_shape() {
        let event = FileStreamEvent::Chunk {
            data: "abc".into(),
            encoding: FileEncoding::Utf8,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "chunk");
        assert_eq!(json["encoding"], "utf-8");
    }
}
