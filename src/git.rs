use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, trace};

use crate::config::RunConfig;
use crate::error::GitError;

/// A named remote attached to a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Remote {
    pub name: String,
    pub url: String,
}

impl Remote {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }

    /// Host part of the remote URL, lowercased. `None` for local paths.
    pub fn host(&self) -> Option<String> {
        parse_remote_url(&self.url).map(|(host, _)| host)
    }

    pub fn is_github(&self) -> bool {
        self.host().as_deref() == Some("github.com")
    }
}

/// Role a remote plays during a sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemoteRole {
    Origin,
    Upstream,
    Other,
}

impl RemoteRole {
    pub fn classify(name: &str, config: &RunConfig) -> Self {
        if name == "origin" {
            RemoteRole::Origin
        } else if config.is_upstream_name(name) {
            RemoteRole::Upstream
        } else {
            RemoteRole::Other
        }
    }
}

/// Point-in-time view of a local clone, as reported by a [`GitBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSnapshot {
    pub path: PathBuf,
    pub is_bare: bool,
    /// Tracked files modified (index or working tree)
    pub is_dirty: bool,
    /// Tracked modifications or untracked files
    pub is_dirty_with_untracked: bool,
    /// `None` on a detached HEAD
    pub active_branch: Option<String>,
    /// Remotes in configuration order
    pub remotes: Vec<Remote>,
    pub local_branches: Vec<String>,
}

impl RepoSnapshot {
    pub fn has_branch(&self, name: &str) -> bool {
        self.local_branches.iter().any(|b| b == name)
    }

    pub fn remote(&self, name: &str) -> Option<&Remote> {
        self.remotes.iter().find(|r| r.name == name)
    }
}

/// Git operations the sync engine relies on.
///
/// Inspection returns fresh snapshots; the mutating operations act on the
/// clone at `path` and report failures as [`GitError`] values.
#[async_trait]
pub trait GitBackend: Send + Sync {
    async fn open(&self, path: &Path) -> Result<RepoSnapshot, GitError>;

    async fn is_dirty(&self, path: &Path, include_untracked: bool) -> Result<bool, GitError>;

    async fn fetch(&self, path: &Path, remote: &str) -> Result<(), GitError>;

    /// Fast-forward the current branch to `remote`/`branch`
    async fn pull(&self, path: &Path, remote: &str, branch: &str) -> Result<(), GitError>;

    async fn push(&self, path: &Path, remote: &str, branch: &str) -> Result<(), GitError>;

    async fn checkout(&self, path: &Path, branch: &str) -> Result<(), GitError>;
}

/// [`GitBackend`] that drives the installed `git` executable
#[derive(Debug, Clone)]
pub struct GitCli {
    timeout: Duration,
}

impl GitCli {
    /// Create a backend whose git commands are killed after `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn output(&self, path: &Path, args: &[&str]) -> Result<Output, GitError> {
        let command = args.join(" ");
        trace!("git {} (in {})", command, path.display());

        let child = AsyncCommand::new("git")
            .args(args)
            .current_dir(path)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(source)) => Err(GitError::Spawn { command, source }),
            Err(_) => Err(GitError::Timeout {
                command,
                timeout: self.timeout,
            }),
        }
    }

    /// Run a git command and return its trimmed stdout, failing on a non-zero exit
    async fn run(&self, path: &Path, args: &[&str]) -> Result<String, GitError> {
        let output = self.output(path, args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.contains("not a git repository") {
                return Err(GitError::NotARepository {
                    path: path.to_path_buf(),
                });
            }
            return Err(GitError::CommandFailed {
                command: args.join(" "),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn is_bare(&self, path: &Path) -> Result<bool, GitError> {
        let out = self
            .run(path, &["rev-parse", "--is-bare-repository"])
            .await?;
        Ok(out == "true")
    }

    async fn active_branch(&self, path: &Path) -> Result<Option<String>, GitError> {
        // symbolic-ref exits 1 without output on a detached HEAD
        let output = self
            .output(path, &["symbolic-ref", "--short", "-q", "HEAD"])
            .await?;

        if output.status.success() {
            let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
            Ok(Some(branch).filter(|b| !b.is_empty()))
        } else {
            Ok(None)
        }
    }

    /// Remotes in configuration order. `git remote` sorts by name, so read the config instead.
    async fn remotes(&self, path: &Path) -> Result<Vec<Remote>, GitError> {
        let args = ["config", "--get-regexp", r"^remote\..*\.url$"];
        let output = self.output(path, &args).await?;

        // Exit status 1 means no key matched
        match output.status.code() {
            Some(0) => {}
            Some(1) => return Ok(Vec::new()),
            _ => {
                return Err(GitError::CommandFailed {
                    command: args.join(" "),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                })
            }
        }

        Ok(parse_remote_config(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn local_branches(&self, path: &Path) -> Result<Vec<String>, GitError> {
        let out = self
            .run(
                path,
                &["for-each-ref", "--format=%(refname:short)", "refs/heads/"],
            )
            .await?;

        Ok(out
            .lines()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[async_trait]
impl GitBackend for GitCli {
    async fn open(&self, path: &Path) -> Result<RepoSnapshot, GitError> {
        debug!("Inspecting repository: {}", path.display());

        if self.is_bare(path).await? {
            return Ok(RepoSnapshot {
                path: path.to_path_buf(),
                is_bare: true,
                is_dirty: false,
                is_dirty_with_untracked: false,
                active_branch: None,
                remotes: self.remotes(path).await?,
                local_branches: self.local_branches(path).await?,
            });
        }

        let is_dirty = self.is_dirty(path, false).await?;
        let is_dirty_with_untracked = is_dirty || self.is_dirty(path, true).await?;

        Ok(RepoSnapshot {
            path: path.to_path_buf(),
            is_bare: false,
            is_dirty,
            is_dirty_with_untracked,
            active_branch: self.active_branch(path).await?,
            remotes: self.remotes(path).await?,
            local_branches: self.local_branches(path).await?,
        })
    }

    async fn is_dirty(&self, path: &Path, include_untracked: bool) -> Result<bool, GitError> {
        let untracked = if include_untracked {
            "--untracked-files=normal"
        } else {
            "--untracked-files=no"
        };
        let out = self.run(path, &["status", "--porcelain", untracked]).await?;
        Ok(!out.is_empty())
    }

    async fn fetch(&self, path: &Path, remote: &str) -> Result<(), GitError> {
        self.run(path, &["fetch", remote]).await.map(drop)
    }

    async fn pull(&self, path: &Path, remote: &str, branch: &str) -> Result<(), GitError> {
        match self.run(path, &["pull", "--ff-only", remote, branch]).await {
            Err(GitError::CommandFailed { stderr, .. }) if is_non_fast_forward(&stderr) => {
                Err(GitError::NonFastForward {
                    remote: remote.to_string(),
                    branch: branch.to_string(),
                    stderr,
                })
            }
            other => other.map(drop),
        }
    }

    async fn push(&self, path: &Path, remote: &str, branch: &str) -> Result<(), GitError> {
        match self.run(path, &["push", remote, branch]).await {
            Err(GitError::CommandFailed { stderr, .. }) if is_push_rejection(&stderr) => {
                Err(GitError::PushRejected {
                    remote: remote.to_string(),
                    branch: branch.to_string(),
                    stderr,
                })
            }
            other => other.map(drop),
        }
    }

    async fn checkout(&self, path: &Path, branch: &str) -> Result<(), GitError> {
        self.run(path, &["checkout", branch]).await.map(drop)
    }
}

/// Parse `remote.<name>.url <url>` lines, keeping the first url of each remote
fn parse_remote_config(output: &str) -> Vec<Remote> {
    let mut remotes: Vec<Remote> = Vec::new();

    for line in output.lines() {
        let Some((key, url)) = line.split_once(' ') else {
            continue;
        };
        let Some(name) = key
            .strip_prefix("remote.")
            .and_then(|rest| rest.strip_suffix(".url"))
        else {
            continue;
        };

        if name.is_empty() || remotes.iter().any(|r| r.name == name) {
            continue;
        }
        remotes.push(Remote::new(name, url.trim()));
    }

    remotes
}

fn is_non_fast_forward(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("not possible to fast-forward") || stderr.contains("diverg")
}

fn is_push_rejection(stderr: &str) -> bool {
    stderr.contains("[rejected]") || stderr.contains("[remote rejected]")
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://(?:[^@/]*@)?([^/:]+)(?::\d+)?(/.*)?$")
            .expect("valid url regex")
    })
}

fn scp_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:[^@/]+@)?([^/:]+):(.+)$").expect("valid scp regex"))
}

/// Split a remote URL into `(host, path)`.
///
/// Understands `scheme://[user@]host[:port]/path` and scp-like
/// `[user@]host:path`. Local paths and `file://` URLs yield `None`.
pub fn parse_remote_url(url: &str) -> Option<(String, String)> {
    let url = url.trim();

    if url.contains("://") {
        let caps = url_regex().captures(url)?;
        let host = caps.get(1)?.as_str().to_lowercase();
        let path = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        return Some((host, path.trim_start_matches('/').to_string()));
    }

    let caps = scp_regex().captures(url)?;
    let host = caps.get(1)?.as_str().to_lowercase();
    Some((host, caps.get(2)?.as_str().trim_start_matches('/').to_string()))
}
