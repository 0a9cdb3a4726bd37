//! Typed errors for discovery, git and GitHub operations
//!
//! Repository-scoped failures never surface as these errors at the engine
//! boundary; the engine folds them into [`crate::sync::SyncOutcome`] values.
//! Only [`DiscoveryError`] (and configuration errors, which are `anyhow`)
//! abort a whole run.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure to enumerate repositories under a root path
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// The root path does not exist
    #[error("Root path does not exist: {}", path.display())]
    NotFound { path: PathBuf },

    /// The root path exists but is not a directory
    #[error("Root path is not a directory: {}", path.display())]
    NotADirectory { path: PathBuf },

    /// The root path (or one of its entries) could not be read
    #[error("Failed to read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors reported by a [`crate::git::GitBackend`]
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Not a git repository: {}", path.display())]
    NotARepository { path: PathBuf },

    /// `git pull --ff-only` refused because the branches have diverged
    #[error("Cannot fast-forward '{branch}' from '{remote}': {stderr}")]
    NonFastForward {
        remote: String,
        branch: String,
        stderr: String,
    },

    #[error("Push of '{branch}' to '{remote}' was rejected: {stderr}")]
    PushRejected {
        remote: String,
        branch: String,
        stderr: String,
    },

    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("git {command} timed out after {}s", timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    #[error("Failed to execute git {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// Errors from the GitHub integration hook
#[derive(Error, Debug)]
pub enum GitHubError {
    #[error("No GitHub authentication found: {0}")]
    NoCredentials(String),

    #[error("Unknown auth method: {0}")]
    UnknownAuthMethod(String),

    #[error("Repository has no github.com remote")]
    NoGitHubRemote,

    #[error("GitHub API error: {0}")]
    Api(#[from] octocrab::Error),
}
