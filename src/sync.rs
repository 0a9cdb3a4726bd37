//! Sync Engine - per-repository synchronization state machine
//!
//! For each clone the engine decides whether it is safe to act, fetches the
//! eligible remotes, fast-forwards the default branch from `origin` and the
//! upstream remote, pushes it back to `origin`, and finally checks out the
//! branch the clone started on. Every repository ends in exactly one
//! [`SyncOutcome`]; failures are values, never errors that stop the run.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::config::RunConfig;
use crate::error::GitError;
use crate::git::{GitBackend, Remote, RemoteRole, RepoSnapshot};
use crate::github::GitHubHook;

/// Why a repository was left untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    Bare,
    /// Tracked files are modified
    Dirty,
    DetachedHead,
    NoOrigin,
    /// Untracked files present after fetching
    Untracked,
    /// No local copy of the branch being synchronized
    NoDefaultBranch,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::Bare => "bare repository",
            SkipReason::Dirty => "dirty working tree",
            SkipReason::DetachedHead => "detached HEAD",
            SkipReason::NoOrigin => "no origin remote",
            SkipReason::Untracked => "untracked files",
            SkipReason::NoDefaultBranch => "no local default branch",
        };
        f.write_str(s)
    }
}

/// Step at which a repository failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    Inspect,
    OriginFetch,
    Checkout,
    /// Pull needed a merge
    PullConflict,
    Pull,
    Push,
    /// Could not return to the original branch
    Restore,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Inspect => "inspect",
            FailureKind::OriginFetch => "origin-fetch",
            FailureKind::Checkout => "checkout",
            FailureKind::PullConflict => "pull-conflict",
            FailureKind::Pull => "pull",
            FailureKind::Push => "push",
            FailureKind::Restore => "restore",
        };
        f.write_str(s)
    }
}

/// Terminal state of one repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum SyncOutcome {
    /// `upstream` names the remote the branch was fast-forwarded from, if any
    Synced { upstream: Option<String> },
    Skipped { reason: SkipReason },
    Failed { kind: FailureKind, error: String },
}

impl SyncOutcome {
    fn failed(kind: FailureKind, error: &GitError) -> Self {
        SyncOutcome::Failed {
            kind,
            error: error.to_string(),
        }
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Synced { upstream: None } => write!(f, "synced"),
            SyncOutcome::Synced {
                upstream: Some(remote),
            } => write!(f, "synced (from '{}')", remote),
            SyncOutcome::Skipped { reason } => write!(f, "skipped ({})", reason),
            SyncOutcome::Failed { kind, error } => write!(f, "FAILED ({}): {}", kind, error),
        }
    }
}

/// Outcome of syncing one repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncDecision {
    pub path: PathBuf,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
}

impl SyncDecision {
    pub fn is_synced(&self) -> bool {
        matches!(self.outcome, SyncOutcome::Synced { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, SyncOutcome::Skipped { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, SyncOutcome::Failed { .. })
    }
}

impl fmt::Display for SyncDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.outcome)
    }
}

/// Results from a complete sync run
#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub total_repositories: usize,
    pub synced: usize,
    pub skipped: usize,
    pub failed: usize,
    pub duration: Duration,
    pub decisions: Vec<SyncDecision>,
}

impl SyncSummary {
    pub fn from_decisions(decisions: Vec<SyncDecision>, duration: Duration) -> Self {
        let synced = decisions.iter().filter(|d| d.is_synced()).count();
        let skipped = decisions.iter().filter(|d| d.is_skipped()).count();
        let failed = decisions.iter().filter(|d| d.is_failed()).count();

        Self {
            total_repositories: decisions.len(),
            synced,
            skipped,
            failed,
            duration,
            decisions,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Drives the per-repository state machine against a [`GitBackend`]
#[derive(Clone)]
pub struct SyncEngine {
    config: Arc<RunConfig>,
    git: Arc<dyn GitBackend>,
    github: Option<Arc<dyn GitHubHook>>,
}

impl SyncEngine {
    /// Create a new sync engine with the given run configuration and git backend
    pub fn new(config: RunConfig, git: Arc<dyn GitBackend>) -> Self {
        if config.dry_run {
            warn!("Running in dry-run mode - will not make any changes on disk");
        }

        Self {
            config: Arc::new(config),
            git,
            github: None,
        }
    }

    /// Attach the GitHub hook run for clones with a github.com remote
    pub fn with_github_hook(mut self, hook: Arc<dyn GitHubHook>) -> Self {
        self.github = Some(hook);
        self
    }

    /// Sync every repository, at most `max_parallel` at a time.
    ///
    /// Decisions come back in completion order.
    pub async fn sync_repos(&self, repos: Vec<PathBuf>) -> SyncSummary {
        let start_time = Instant::now();
        let parallel = self.config.max_parallel.max(1);

        info!(
            "Syncing {} repositories with concurrency {}",
            repos.len(),
            parallel
        );

        let semaphore = Arc::new(Semaphore::new(parallel));
        let mut pending = FuturesUnordered::new();

        for path in repos {
            let semaphore = semaphore.clone();
            pending.push(async move {
                // The semaphore is never closed
                let _permit = semaphore.acquire().await.ok();
                self.sync_repository(&path).await
            });
        }

        let mut decisions = Vec::new();
        while let Some(decision) = pending.next().await {
            debug!("Sync completed: {}", decision);
            decisions.push(decision);
        }

        let summary = SyncSummary::from_decisions(decisions, start_time.elapsed());

        info!(
            "Sync completed in {:.2}s: {} synced, {} skipped, {} failed",
            summary.duration.as_secs_f64(),
            summary.synced,
            summary.skipped,
            summary.failed
        );

        summary
    }

    /// Sync a single clone
    pub async fn sync_repository(&self, path: &Path) -> SyncDecision {
        info!("Syncing {}", path.display());

        let outcome = self.run(path).await;

        match &outcome {
            SyncOutcome::Synced { .. } => info!("{}: {}", path.display(), outcome),
            SyncOutcome::Skipped { .. } => warn!("{}: {}", path.display(), outcome),
            SyncOutcome::Failed { .. } => error!("{}: {}", path.display(), outcome),
        }

        SyncDecision {
            path: path.to_path_buf(),
            outcome,
        }
    }

    async fn run(&self, path: &Path) -> SyncOutcome {
        let repo = match self.git.open(path).await {
            Ok(repo) => repo,
            Err(e) => return SyncOutcome::failed(FailureKind::Inspect, &e),
        };

        if repo.is_bare {
            return SyncOutcome::Skipped {
                reason: SkipReason::Bare,
            };
        }

        if repo.is_dirty && !self.config.sync_dirty {
            return SyncOutcome::Skipped {
                reason: SkipReason::Dirty,
            };
        }

        let Some(original_branch) = repo.active_branch.clone() else {
            return SyncOutcome::Skipped {
                reason: SkipReason::DetachedHead,
            };
        };
        debug!("Current branch is '{}'", original_branch);

        let remotes = self.classify_remotes(&repo);
        if !remotes.iter().any(|(_, role)| *role == RemoteRole::Origin) {
            return SyncOutcome::Skipped {
                reason: SkipReason::NoOrigin,
            };
        }

        self.run_github_hook(&repo, &remotes).await;

        let upstream = match self.fetch_remotes(path, &remotes).await {
            Ok(upstream) => upstream,
            Err(e) => return SyncOutcome::failed(FailureKind::OriginFetch, &e),
        };

        // A fetch can leave new untracked files behind (submodules, hooks);
        // checkout must never run over them.
        match self.git.is_dirty(path, true).await {
            Ok(false) => {}
            Ok(true) => {
                let reason = match self.git.is_dirty(path, false).await {
                    Ok(true) => SkipReason::Dirty,
                    Ok(false) => SkipReason::Untracked,
                    Err(e) => return SyncOutcome::failed(FailureKind::Inspect, &e),
                };
                return SyncOutcome::Skipped { reason };
            }
            Err(e) => return SyncOutcome::failed(FailureKind::Inspect, &e),
        }

        let branch = self.config.default_branch.as_str();
        if !repo.has_branch(branch) {
            debug!("No local '{}' branch", branch);
            return SyncOutcome::Skipped {
                reason: SkipReason::NoDefaultBranch,
            };
        }

        if original_branch != branch {
            if let Err(e) = self.checkout(path, branch).await {
                return SyncOutcome::failed(FailureKind::Checkout, &e);
            }
        }

        let advanced = self.advance_branch(path, branch, upstream.as_deref()).await;

        // Restoring runs on both paths so the clone ends on the branch it started on
        let restored = self.checkout(path, &original_branch).await;

        match (advanced, restored) {
            (Ok(()), Ok(())) => SyncOutcome::Synced { upstream },
            (Ok(()), Err(e)) => SyncOutcome::failed(FailureKind::Restore, &e),
            (Err((kind, e)), Ok(())) => SyncOutcome::failed(kind, &e),
            (Err((kind, e)), Err(restore_err)) => {
                error!(
                    "Failed to restore branch '{}' in {}: {}",
                    original_branch,
                    path.display(),
                    restore_err
                );
                SyncOutcome::failed(kind, &e)
            }
        }
    }

    /// Remotes taking part in this sync, in enumeration order
    fn classify_remotes<'a>(&self, repo: &'a RepoSnapshot) -> Vec<(&'a Remote, RemoteRole)> {
        repo.remotes
            .iter()
            .map(|remote| (remote, RemoteRole::classify(&remote.name, &self.config)))
            .filter(|(remote, role)| {
                let keep = !self.config.origin_only || *role == RemoteRole::Origin;
                if !keep {
                    debug!("Skipping non-origin remote '{}'", remote.name);
                }
                keep
            })
            .collect()
    }

    async fn run_github_hook(&self, repo: &RepoSnapshot, remotes: &[(&Remote, RemoteRole)]) {
        if self.config.disable_github {
            return;
        }
        let Some(hook) = &self.github else {
            return;
        };
        if !remotes.iter().any(|(remote, _)| remote.is_github()) {
            return;
        }

        if let Err(e) = hook.handle(repo, &self.config, self.config.dry_run).await {
            warn!(
                "GitHub integration failed for {}: {}",
                repo.path.display(),
                e
            );
        }
    }

    /// Fetch every remote. Returns the upstream to sync from, if it is usable;
    /// only an `origin` failure is an error.
    async fn fetch_remotes(
        &self,
        path: &Path,
        remotes: &[(&Remote, RemoteRole)],
    ) -> Result<Option<String>, GitError> {
        let candidate = remotes
            .iter()
            .find(|(_, role)| *role == RemoteRole::Upstream)
            .map(|(remote, _)| remote.name.as_str());
        let mut upstream_fetched = false;

        for (remote, role) in remotes {
            match self.fetch(path, &remote.name).await {
                Ok(()) => {
                    if Some(remote.name.as_str()) == candidate {
                        upstream_fetched = true;
                    }
                }
                Err(e) if *role == RemoteRole::Origin => return Err(e),
                Err(e) if Some(remote.name.as_str()) == candidate => {
                    warn!(
                        "Failed to fetch upstream '{}'; not syncing from it: {}",
                        remote.name, e
                    );
                }
                Err(e) => warn!("Failed to fetch remote '{}': {}", remote.name, e),
            }
        }

        if self.config.no_upstream {
            if let Some(name) = candidate {
                debug!("Not syncing from upstream '{}' (no-upstream)", name);
            }
            return Ok(None);
        }

        Ok(candidate.filter(|_| upstream_fetched).map(str::to_string))
    }

    /// Fast-forward `branch` from origin, then from upstream and push it to origin
    async fn advance_branch(
        &self,
        path: &Path,
        branch: &str,
        upstream: Option<&str>,
    ) -> Result<(), (FailureKind, GitError)> {
        self.pull(path, "origin", branch)
            .await
            .map_err(|e| (pull_failure_kind(&e), e))?;

        if let Some(upstream) = upstream {
            self.pull(path, upstream, branch)
                .await
                .map_err(|e| (pull_failure_kind(&e), e))?;
            self.push(path, "origin", branch)
                .await
                .map_err(|e| (FailureKind::Push, e))?;
        }

        Ok(())
    }

    // Mutating operations; dry-run turns each into a log line

    async fn fetch(&self, path: &Path, remote: &str) -> Result<(), GitError> {
        if self.config.dry_run {
            info!("DRYRUN - would fetch remote '{}'", remote);
            return Ok(());
        }
        debug!("Fetching remote '{}'", remote);
        self.git.fetch(path, remote).await
    }

    async fn pull(&self, path: &Path, remote: &str, branch: &str) -> Result<(), GitError> {
        if self.config.dry_run {
            info!("DRYRUN - would pull '{}' from remote '{}'", branch, remote);
            return Ok(());
        }
        debug!("Pulling '{}' from remote '{}'", branch, remote);
        self.git.pull(path, remote, branch).await
    }

    async fn push(&self, path: &Path, remote: &str, branch: &str) -> Result<(), GitError> {
        if self.config.dry_run {
            info!("DRYRUN - would push '{}' to remote '{}'", branch, remote);
            return Ok(());
        }
        debug!("Pushing '{}' to remote '{}'", branch, remote);
        self.git.push(path, remote, branch).await
    }

    async fn checkout(&self, path: &Path, branch: &str) -> Result<(), GitError> {
        if self.config.dry_run {
            info!("DRYRUN - would check out branch '{}'", branch);
            return Ok(());
        }
        debug!("Checking out branch '{}'", branch);
        self.git.checkout(path, branch).await
    }
}

fn pull_failure_kind(error: &GitError) -> FailureKind {
    match error {
        GitError::NonFastForward { .. } => FailureKind::PullConflict,
        _ => FailureKind::Pull,
    }
}
