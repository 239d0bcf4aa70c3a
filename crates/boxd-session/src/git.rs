//! Repository checkout through a session (`git clone` in the shell).

use crate::fs::quote;
use crate::session::{ExecOptions, Session};
use boxd_core::files::GitCheckoutResult;
use boxd_core::{Result, SandboxError};
use chrono::Utc;

/// Options for `git_checkout`.
#[derive(Debug, Clone, Default)]
pub struct GitCheckoutOptions {
    pub branch: Option<String>,
    /// Clone destination; derived from the repository name when absent.
    pub target_dir: Option<String>,
}

impl Session {
    /// Clone a repository inside the session.
    pub async fn git_checkout(
        &self,
        repo_url: &str,
        opts: GitCheckoutOptions,
    ) -> Result<GitCheckoutResult> {
        if repo_url.trim().is_empty() {
            return Err(SandboxError::Validation("repository url is empty".into()));
        }

        let target_dir = opts
            .target_dir
            .clone()
            .unwrap_or_else(|| derive_target_dir(repo_url));

        let mut command = String::from("git clone ");
        if let Some(branch) = &opts.branch {
            command.push_str(&format!("--branch {} ", quote(branch)));
        }
        command.push_str(&format!("-- {} {}", quote(repo_url), quote(&target_dir)));

        let result = self.exec(&command, ExecOptions::default()).await?;
        if !result.success {
            return Err(classify_git_error(
                repo_url,
                opts.branch.as_deref(),
                &result.stderr,
            ));
        }

        Ok(GitCheckoutResult {
            success: true,
            repo_url: repo_url.to_string(),
            branch: opts.branch,
            target_dir,
            stdout: result.stdout,
            stderr: result.stderr,
            timestamp: Utc::now(),
        })
    }
}

/// `https://host/org/repo.git` → `repo`
fn derive_target_dir(repo_url: &str) -> String {
    let trimmed = repo_url.trim_end_matches('/');
    let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
    let name = last.trim_end_matches(".git");
    if name.is_empty() {
        "repo".to_string()
    } else {
        name.to_string()
    }
}

/// Map git's stderr onto structured errors.
fn classify_git_error(repo_url: &str, branch: Option<&str>, stderr: &str) -> SandboxError {
    let lower = stderr.to_lowercase();
    if lower.contains("remote branch") && lower.contains("not found") {
        SandboxError::GitInvalidRef(branch.unwrap_or_default().to_string())
    } else if lower.contains("repository") && lower.contains("not found")
        || lower.contains("could not read from remote repository")
        || lower.contains("does not appear to be a git repository")
    {
        SandboxError::RepoNotFound(repo_url.to_string())
    } else {
        SandboxError::GitOperationFailed(stderr.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_dir_derivation() {
        assert_eq!(derive_target_dir("https://github.com/org/repo.git"), "repo");
        assert_eq!(derive_target_dir("https://github.com/org/repo"), "repo");
        assert_eq!(derive_target_dir("git@host:org/tool.git/"), "tool");
    }

    #[test]
    fn git_error_classification() {
        let err = classify_git_error(
            "https://github.com/org/repo.git",
            Some("nope"),
            "fatal: Remote branch nope not found in upstream origin",
        );
        assert!(matches!(err, SandboxError::GitInvalidRef(_)));

        let err = classify_git_error(
            "https://github.com/org/missing.git",
            None,
            "remote: Repository not found.",
        );
        assert!(matches!(err, SandboxError::RepoNotFound(_)));

        let err = classify_git_error("u", None, "fatal: destination path exists");
        assert!(matches!(err, SandboxError::GitOperationFailed(_)));
    }
}
