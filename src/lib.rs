//! clonesync - keep local git clones in sync with origin and upstream
//!
//! clonesync walks a clone, or a directory of clones, fetches every remote,
//! fast-forwards the default branch from `upstream` when there is one and
//! pushes the result back to `origin`. Clones with local modifications are
//! never touched, and each clone is left on the branch it started on.
//!
//! ## Modules
//!
//! - [`config`]: Configuration file and per-run policy
//! - [`discovery`]: Finding clones under a root path
//! - [`git`]: Repository snapshots and the git backend
//! - [`github`]: GitHub API integration hook
//! - [`sync`]: The per-repository sync state machine

pub mod config;
pub mod discovery;
pub mod error;
pub mod git;
pub mod github;
pub mod sync;

pub use config::{Config, ConfigSource, RunConfig, RunOverrides};
pub use discovery::LocalDiscovery;
pub use error::{DiscoveryError, GitError, GitHubError};
pub use git::{GitBackend, GitCli, Remote, RemoteRole, RepoSnapshot};
pub use github::{GitHubHook, RepoFlagsHook};
pub use sync::{FailureKind, SkipReason, SyncDecision, SyncEngine, SyncOutcome, SyncSummary};
