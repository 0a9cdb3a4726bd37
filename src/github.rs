use async_trait::async_trait;
use octocrab::Octocrab;
use std::env;
use std::process::Command;
use tracing::{debug, info, warn};

use crate::config::{GitHubConfig, RepoFlags, RunConfig};
use crate::error::GitHubError;
use crate::git::{parse_remote_url, RepoSnapshot};

/// Per-repository side effect run before fetching clones hosted on github.com.
///
/// The engine treats every outcome as advisory: errors are logged, never
/// escalated.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GitHubHook: Send + Sync {
    async fn handle(
        &self,
        repo: &RepoSnapshot,
        config: &RunConfig,
        dry_run: bool,
    ) -> Result<(), GitHubError>;
}

/// GitHub authentication strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStrategy {
    /// Use GitHub CLI authentication
    GitHubCLI,
    /// Use environment variable token
    EnvironmentToken,
    /// Use `github.token` from the global git configuration
    GitConfig,
}

/// Keeps repository settings on GitHub in the configured state
pub struct RepoFlagsHook {
    client: Octocrab,
    flags: RepoFlags,
    forks_only: bool,
}

impl RepoFlagsHook {
    /// Create the hook, authenticating with the configured strategy
    pub fn new(config: &GitHubConfig) -> Result<Self, GitHubError> {
        let (auth_strategy, token) = detect_authentication(&config.auth_method)?;

        info!("Using GitHub authentication strategy: {:?}", auth_strategy);

        let client = Octocrab::builder().personal_token(token).build()?;

        Ok(Self::with_client(client, config))
    }

    /// Create from an existing client
    pub fn with_client(client: Octocrab, config: &GitHubConfig) -> Self {
        Self {
            client,
            flags: config.repo_flags.clone(),
            forks_only: config.forks_only,
        }
    }
}

#[async_trait]
impl GitHubHook for RepoFlagsHook {
    async fn handle(
        &self,
        repo: &RepoSnapshot,
        _config: &RunConfig,
        dry_run: bool,
    ) -> Result<(), GitHubError> {
        if self.flags.is_empty() {
            debug!("No GitHub repository flags configured");
            return Ok(());
        }

        let (owner, name) = github_slug(repo).ok_or(GitHubError::NoGitHubRemote)?;

        debug!("Checking GitHub settings for {}/{}", owner, name);
        let current = self.client.repos(&owner, &name).get().await?;

        if self.forks_only && !current.fork.unwrap_or(false) {
            debug!("{}/{} is not a fork; leaving settings alone", owner, name);
            return Ok(());
        }

        let current_flags = RepoFlags {
            has_issues: current.has_issues,
            has_wiki: current.has_wiki,
            has_projects: current.has_projects,
        };
        let changes = flag_changes(&self.flags, &current_flags);

        if changes.is_empty() {
            debug!("GitHub settings already up to date for {}/{}", owner, name);
            return Ok(());
        }

        if dry_run {
            info!(
                "DRYRUN - would set {:?} on GitHub repository {}/{}",
                changes, owner, name
            );
            return Ok(());
        }

        let route = format!("/repos/{}/{}", owner, name);
        let _: serde_json::Value = self.client.patch(route, Some(&changes)).await?;

        info!("Updated GitHub settings for {}/{}: {:?}", owner, name, changes);
        Ok(())
    }
}

/// Desired flags that differ from the current ones
pub fn flag_changes(desired: &RepoFlags, current: &RepoFlags) -> RepoFlags {
    let differs = |want: Option<bool>, have: Option<bool>| want.filter(|w| Some(*w) != have);

    RepoFlags {
        has_issues: differs(desired.has_issues, current.has_issues),
        has_wiki: differs(desired.has_wiki, current.has_wiki),
        has_projects: differs(desired.has_projects, current.has_projects),
    }
}

/// `(owner, name)` of the GitHub repository behind a clone.
///
/// Prefers `origin`; falls back to the first github.com remote.
pub fn github_slug(repo: &RepoSnapshot) -> Option<(String, String)> {
    let remote = repo
        .remote("origin")
        .filter(|r| r.is_github())
        .or_else(|| repo.remotes.iter().find(|r| r.is_github()))?;

    let (_, path) = parse_remote_url(&remote.url)?;
    let path = path.trim_end_matches('/').trim_end_matches(".git");

    let mut parts = path.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty() => {
            Some((owner.to_string(), name.to_string()))
        }
        _ => None,
    }
}

/// Detect and obtain GitHub authentication
pub fn detect_authentication(auth_method: &str) -> Result<(AuthStrategy, String), GitHubError> {
    match auth_method {
        "auto" => {
            // Try GitHub CLI first, then environment token, then git config
            if let Ok(token) = try_github_cli() {
                Ok((AuthStrategy::GitHubCLI, token))
            } else if let Ok(token) = try_environment_token() {
                Ok((AuthStrategy::EnvironmentToken, token))
            } else if let Ok(token) = try_git_config_token() {
                Ok((AuthStrategy::GitConfig, token))
            } else {
                Err(GitHubError::NoCredentials(
                    "authenticate the GitHub CLI (gh auth login), set GITHUB_TOKEN, \
                     or run: git config --global github.token <token>"
                        .to_string(),
                ))
            }
        }
        "gh_cli" => try_github_cli().map(|t| (AuthStrategy::GitHubCLI, t)),
        "token" => try_environment_token().map(|t| (AuthStrategy::EnvironmentToken, t)),
        "git_config" => try_git_config_token().map(|t| (AuthStrategy::GitConfig, t)),
        other => Err(GitHubError::UnknownAuthMethod(other.to_string())),
    }
}

/// Try to get token from GitHub CLI
fn try_github_cli() -> Result<String, GitHubError> {
    debug!("Attempting GitHub CLI authentication");

    if !is_command_available("gh") {
        return Err(GitHubError::NoCredentials(
            "GitHub CLI (gh) is not installed".to_string(),
        ));
    }

    let token_output = Command::new("gh")
        .args(["auth", "token"])
        .output()
        .map_err(|e| GitHubError::NoCredentials(format!("failed to run gh: {}", e)))?;

    if !token_output.status.success() {
        return Err(GitHubError::NoCredentials(format!(
            "GitHub CLI is not authenticated: {}",
            String::from_utf8_lossy(&token_output.stderr).trim()
        )));
    }

    let token = String::from_utf8_lossy(&token_output.stdout)
        .trim()
        .to_string();

    if token.is_empty() {
        return Err(GitHubError::NoCredentials(
            "GitHub CLI returned empty token".to_string(),
        ));
    }

    debug!("Successfully obtained token from GitHub CLI");
    Ok(token)
}

/// Try to get token from environment variable
fn try_environment_token() -> Result<String, GitHubError> {
    debug!("Attempting environment variable authentication");

    let token = env::var("GITHUB_TOKEN")
        .map_err(|_| GitHubError::NoCredentials("GITHUB_TOKEN is not set".to_string()))?;

    if token.trim().is_empty() {
        return Err(GitHubError::NoCredentials("GITHUB_TOKEN is empty".to_string()));
    }

    if !looks_like_token(&token) {
        warn!("GITHUB_TOKEN doesn't look like a GitHub token");
    }

    Ok(token.trim().to_string())
}

/// Try to read `github.token` from the global git configuration
fn try_git_config_token() -> Result<String, GitHubError> {
    debug!("Attempting git config authentication");

    let output = Command::new("git")
        .args(["config", "--global", "github.token"])
        .output()
        .map_err(|e| GitHubError::NoCredentials(format!("failed to run git: {}", e)))?;

    if !output.status.success() {
        return Err(GitHubError::NoCredentials(
            "github.token is not set in the global git config".to_string(),
        ));
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    validate_git_config_token(&token)?;
    Ok(token)
}

fn validate_git_config_token(token: &str) -> Result<(), GitHubError> {
    if token.len() < 40 {
        return Err(GitHubError::NoCredentials(format!(
            "github.token in git config is {} characters; expected at least 40",
            token.len()
        )));
    }
    Ok(())
}

fn looks_like_token(token: &str) -> bool {
    ["ghp_", "gho_", "ghs_", "ghu_", "github_pat_"]
        .iter()
        .any(|prefix| token.starts_with(prefix))
}

/// Check if a command is available in PATH
fn is_command_available(command: &str) -> bool {
    Command::new("which")
        .arg(command)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}
