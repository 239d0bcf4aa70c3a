//! Session engine: named, long-lived shell execution contexts.
//!
//! Each session is fronted by a control child process (this same binary
//! re-executed in host mode) that owns one interactive shell, PID/mount
//! namespaced where the kernel allows. The parent side talks to it over
//! line-delimited JSON on stdin/stdout and exposes synchronous exec,
//! streaming exec, file operations, git checkout and background process
//! supervision on top of that wire.

pub mod fs;
pub mod git;
pub mod host;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod supervisor;
mod transport;

pub use registry::{SessionInfo, SessionRegistry};
pub use session::{ExecOptions, Session, SessionOptions};
pub use supervisor::{ProcessSet, StartProcessOptions};
