//! File operations, composed as shell commands inside a session.
//!
//! Running through the shell (rather than the daemon's own fs) keeps every
//! operation subject to the session's cwd, environment and namespaces.
//! Content crosses the shell boundary base64-encoded so binary data and
//! marker-like bytes survive.

use crate::session::{ExecOptions, Session};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use boxd_core::files::{
    FileEncoding, FileEntry, FileOpResult, FileStreamEvent, ListFilesResult, ReadFileResult,
};
use boxd_core::{ExecEvent, Result, SandboxError};
use chrono::Utc;
use tokio::sync::mpsc;

/// Options for `list_files`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListFilesOptions {
    pub recursive: bool,
    pub include_hidden: bool,
}

impl Session {
    /// Write `content` to `path`. When `encoding` is base64 the content is
    /// decoded client-side semantics: it already is the file's raw bytes.
    pub async fn write_file(
        &self,
        path: &str,
        content: &str,
        encoding: Option<FileEncoding>,
    ) -> Result<FileOpResult> {
        let bytes: Vec<u8> = match encoding.unwrap_or(FileEncoding::Utf8) {
            FileEncoding::Utf8 => content.as_bytes().to_vec(),
            FileEncoding::Base64 => BASE64
                .decode(content.trim())
                .map_err(|e| SandboxError::Validation(format!("invalid base64 content: {e}")))?,
        };
        let payload = BASE64.encode(&bytes);

        let command = format!(
            "printf '%s' {} | base64 -d > {}",
            quote(&payload),
            quote(path)
        );
        let result = self.exec(&command, ExecOptions::default()).await?;
        if !result.success {
            return Err(classify_fs_error(path, &result.stderr, result.exit_code));
        }
        Ok(FileOpResult::ok(path))
    }

    /// Read `path`; text files come back as UTF-8, everything else base64.
    pub async fn read_file(&self, path: &str) -> Result<ReadFileResult> {
        let command = format!("base64 < {}", quote(path));
        let result = self.exec(&command, ExecOptions::default()).await?;
        if !result.success {
            return Err(classify_fs_error(path, &result.stderr, result.exit_code));
        }

        let encoded: String = result.stdout.split_whitespace().collect();
        let bytes = BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| SandboxError::Filesystem(format!("corrupt base64 transport: {e}")))?;

        let mime_type = sniff_mime(path);
        let text = is_text_mime(&mime_type)
            .then(|| String::from_utf8(bytes.clone()).ok())
            .flatten();

        let size = bytes.len() as u64;
        Ok(match text {
            Some(content) => ReadFileResult {
                success: true,
                exit_code: 0,
                path: path.to_string(),
                content,
                encoding: FileEncoding::Utf8,
                is_binary: false,
                mime_type,
                size,
                timestamp: Utc::now(),
            },
            None => ReadFileResult {
                success: true,
                exit_code: 0,
                path: path.to_string(),
                content: BASE64.encode(&bytes),
                encoding: FileEncoding::Base64,
                is_binary: true,
                mime_type,
                size,
                timestamp: Utc::now(),
            },
        })
    }

    /// Streaming read: decoded chunks as they arrive, then a terminal event.
    ///
    /// Chunks are decoded per complete base64 line; binary files stream as
    /// base64 chunks the consumer concatenates and decodes.
    pub async fn read_file_stream(&self, path: &str) -> Result<mpsc::Receiver<FileStreamEvent>> {
        let mime_type = sniff_mime(path);
        let as_text = is_text_mime(&mime_type);
        let command = format!("base64 < {}", quote(path));
        let mut exec_rx = self.exec_stream(&command, ExecOptions::default()).await?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut decoder = Base64LineDecoder::default();
            let mut total: u64 = 0;
            let mut stderr = String::new();

            while let Some(event) = exec_rx.recv().await {
                match event {
                    ExecEvent::Start { .. } => {}
                    ExecEvent::Stdout { data } => {
                        for bytes in decoder.push(&data) {
                            total += bytes.len() as u64;
                            let chunk = encode_chunk(&bytes, as_text);
                            if tx.send(chunk).await.is_err() {
                                return;
                            }
                        }
                    }
                    ExecEvent::Stderr { data } => stderr.push_str(&data),
                    ExecEvent::Complete { exit_code } => {
                        let event = if exit_code == 0 {
                            if let Some(bytes) = decoder.finish() {
                                total += bytes.len() as u64;
                                let chunk = encode_chunk(&bytes, as_text);
                                if tx.send(chunk).await.is_err() {
                                    return;
                                }
                            }
                            FileStreamEvent::Complete {
                                size: total,
                                mime_type: mime_type.clone(),
                            }
                        } else {
                            FileStreamEvent::Error {
                                message: stderr.trim().to_string(),
                            }
                        };
                        let _ = tx.send(event).await;
                        return;
                    }
                    ExecEvent::Error { message } => {
                        let _ = tx.send(FileStreamEvent::Error { message }).await;
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }

    pub async fn mkdir(&self, path: &str, recursive: bool) -> Result<FileOpResult> {
        let flag = if recursive { "-p " } else { "" };
        let command = format!("mkdir {flag}{}", quote(path));
        let result = self.exec(&command, ExecOptions::default()).await?;
        if !result.success {
            return Err(classify_fs_error(path, &result.stderr, result.exit_code));
        }
        Ok(FileOpResult::ok(path))
    }

    pub async fn delete_file(&self, path: &str) -> Result<FileOpResult> {
        let command = format!("rm -- {}", quote(path));
        let result = self.exec(&command, ExecOptions::default()).await?;
        if !result.success {
            return Err(classify_fs_error(path, &result.stderr, result.exit_code));
        }
        Ok(FileOpResult::ok(path))
    }

    pub async fn rename_file(&self, old_path: &str, new_path: &str) -> Result<FileOpResult> {
        self.move_file(old_path, new_path).await
    }

    pub async fn move_file(&self, source: &str, destination: &str) -> Result<FileOpResult> {
        let command = format!("mv -- {} {}", quote(source), quote(destination));
        let result = self.exec(&command, ExecOptions::default()).await?;
        if !result.success {
            return Err(classify_fs_error(source, &result.stderr, result.exit_code));
        }
        Ok(FileOpResult::ok(destination))
    }

    /// List a directory via `find`, parsing `%y|%s|%T@|%p` records.
    pub async fn list_files(
        &self,
        path: &str,
        opts: ListFilesOptions,
    ) -> Result<ListFilesResult> {
        let depth = if opts.recursive { "" } else { "-maxdepth 1 " };
        let command = format!(
            "find {} -mindepth 1 {depth}-printf '%y|%s|%T@|%p\\n'",
            quote(path)
        );
        let result = self.exec(&command, ExecOptions::default()).await?;
        if !result.success {
            return Err(classify_fs_error(path, &result.stderr, result.exit_code));
        }

        let mut entries: Vec<FileEntry> = result
            .stdout
            .lines()
            .filter_map(parse_find_record)
            .filter(|entry| opts.include_hidden || !is_hidden(path, &entry.path))
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(ListFilesResult {
            success: true,
            path: path.to_string(),
            entries,
            timestamp: Utc::now(),
        })
    }
}

fn encode_chunk(bytes: &[u8], as_text: bool) -> FileStreamEvent {
    if as_text {
        FileStreamEvent::Chunk {
            data: String::from_utf8_lossy(bytes).into_owned(),
            encoding: FileEncoding::Utf8,
        }
    } else {
        FileStreamEvent::Chunk {
            data: BASE64.encode(bytes),
            encoding: FileEncoding::Base64,
        }
    }
}

/// Accumulates base64 text and decodes only complete lines, so chunk
/// boundaries inside a base64 quantum never corrupt the output.
#[derive(Default)]
struct Base64LineDecoder {
    carry: String,
}

impl Base64LineDecoder {
    fn push(&mut self, data: &str) -> Vec<Vec<u8>> {
        self.carry.push_str(data);
        let mut out = Vec::new();
        while let Some(pos) = self.carry.find('\n') {
            let line: String = self.carry.drain(..=pos).collect();
            let line = line.trim();
            if !line.is_empty()
                && let Ok(bytes) = BASE64.decode(line.as_bytes())
            {
                out.push(bytes);
            }
        }
        out
    }

    fn finish(&mut self) -> Option<Vec<u8>> {
        let line = std::mem::take(&mut self.carry);
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        BASE64.decode(line.as_bytes()).ok()
    }
}

pub(crate) fn quote(s: &str) -> String {
    shlex::try_quote(s)
        .map(|q| q.into_owned())
        .unwrap_or_else(|_| format!("'{}'", s.replace('\'', r"'\''")))
}

/// Map shell stderr onto structured filesystem errors.
fn classify_fs_error(path: &str, stderr: &str, exit_code: i32) -> SandboxError {
    if stderr.contains("No such file or directory") {
        SandboxError::FileNotFound(path.to_string())
    } else {
        SandboxError::Filesystem(format!(
            "exit code {exit_code}: {}",
            stderr.trim()
        ))
    }
}

fn sniff_mime(path: &str) -> String {
    mime_guess::from_path(path)
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

/// Textness allowlist: `text/*`, JSON/XML/JS and structured-suffix types
/// travel as UTF-8; everything else is base64.
fn is_text_mime(mime: &str) -> bool {
    mime.starts_with("text/")
        || mime == "application/json"
        || mime == "application/javascript"
        || mime == "application/x-javascript"
        || mime == "application/xml"
        || mime == "application/x-sh"
        || mime == "application/toml"
        || mime == "application/x-yaml"
        || mime.ends_with("+json")
        || mime.ends_with("+xml")
}

/// `d|4096|1699999999.0000000000|/workspace/src`
fn parse_find_record(line: &str) -> Option<FileEntry> {
    let mut parts = line.splitn(4, '|');
    let kind = parts.next()?;
    let size = parts.next()?.parse::<u64>().ok()?;
    let modified = parts.next()?.split('.').next()?.parse::<i64>().ok()?;
    let path = parts.next()?;
    let name = path.rsplit('/').next().unwrap_or(path).to_string();
    Some(FileEntry {
        name,
        path: path.to_string(),
        is_dir: kind == "d",
        size,
        modified,
    })
}

/// Hidden iff any path component below the listing root starts with a dot.
fn is_hidden(root: &str, path: &str) -> bool {
    let below = path.strip_prefix(root).unwrap_or(path);
    below
        .split('/')
        .any(|component| component.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn textness_allowlist() {
        assert!(is_text_mime("text/plain"));
        assert!(is_text_mime("text/x-rust"));
        assert!(is_text_mime("application/json"));
        assert!(is_text_mime("application/javascript"));
        assert!(is_text_mime("image/svg+xml"));
        assert!(!is_text_mime("image/png"));
        assert!(!is_text_mime("application/octet-stream"));
        assert!(!is_text_mime("application/pdf"));
    }

    #[test]
    fn mime_sniffing_from_extension() {
        assert_eq!(sniff_mime("/a/b/notes.txt"), "text/plain");
        assert_eq!(sniff_mime("/a/b/photo.png"), "image/png");
        assert_eq!(sniff_mime("/a/b/unknown.zzz"), "application/octet-stream");
    }

    #[test]
    fn find_record_parsing() {
        let entry = parse_find_record("d|4096|1699999999.0000000000|/ws/src").unwrap();
        assert!(entry.is_dir);
        assert_eq!(entry.size, 4096);
        assert_eq!(entry.modified, 1_699_999_999);
        assert_eq!(entry.name, "src");

        let file = parse_find_record("f|120|1700000000.5|/ws/a|b.txt").unwrap();
        // Pipes in file names survive because the path is the final field.
        assert_eq!(file.path, "/ws/a|b.txt");
        assert!(parse_find_record("garbage").is_none());
    }

    #[test]
    fn hidden_detection_below_root() {
        assert!(is_hidden("/ws", "/ws/.git"));
        assert!(is_hidden("/ws", "/ws/.git/config"));
        assert!(is_hidden("/ws", "/ws/src/.cache/x"));
        assert!(!is_hidden("/ws", "/ws/src/main.rs"));
        // A hidden listing root does not hide its children.
        assert!(!is_hidden("/ws/.config", "/ws/.config/app.toml"));
    }

    #[test]
    fn base64_line_decoder_handles_split_lines() {
        let mut decoder = Base64LineDecoder::default();
        let encoded = BASE64.encode(b"hello world, this is long enough");
        let (head, tail) = encoded.split_at(10);

        assert!(decoder.push(head).is_empty());
        let mut rest = tail.to_string();
        rest.push('\n');
        let decoded = decoder.push(&rest);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0], b"hello world, this is long enough");
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn base64_line_decoder_finish_flushes_unterminated_line() {
        let mut decoder = Base64LineDecoder::default();
        decoder.push(&BASE64.encode(b"tail"));
        assert_eq!(decoder.finish().unwrap(), b"tail");
    }
}
