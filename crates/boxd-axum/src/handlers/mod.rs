//! Request handlers, grouped by concern.

pub mod contexts;
pub mod exec;
pub mod expose;
pub mod files;
pub mod git;
pub mod misc;
pub mod process;
pub mod proxy;
pub mod sessions;
