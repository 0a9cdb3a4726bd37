use anyhow::{bail, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for clonesync
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// Default root directory (a clone, or a directory of clones)
    #[serde(default)]
    pub root: Option<String>,

    /// Synchronization behavior settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// GitHub integration settings
    #[serde(default)]
    pub github: GitHubConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Synchronization configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    /// Also process clones with uncommitted tracked changes
    #[serde(default)]
    pub sync_dirty: bool,

    /// Only contact the `origin` remote
    #[serde(default)]
    pub origin_only: bool,

    /// Never pull from upstream or push the result to origin
    #[serde(default)]
    pub no_upstream: bool,

    /// Remote names treated as upstream
    #[serde(default = "default_upstream_names")]
    pub upstream_names: Vec<String>,

    /// Branch that is synchronized from upstream to origin
    #[serde(default = "default_branch")]
    pub default_branch: String,

    /// Maximum number of repositories processed at once
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Timeout for a single git command in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

/// GitHub configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitHubConfig {
    /// Enable the GitHub API integration
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Authentication method
    #[serde(default = "default_auth_method")]
    pub auth_method: String, // "auto", "gh_cli", "token", "git_config"

    /// Only touch repositories that are forks on GitHub
    #[serde(default = "default_true")]
    pub forks_only: bool,

    /// Repository settings enforced through the API
    #[serde(default)]
    pub repo_flags: RepoFlags,
}

/// Repository settings the GitHub hook keeps in the desired state.
/// Unset fields are left alone.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
pub struct RepoFlags {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_issues: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_wiki: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_projects: Option<bool>,
}

impl RepoFlags {
    pub fn is_empty(&self) -> bool {
        self.has_issues.is_none() && self.has_wiki.is_none() && self.has_projects.is_none()
    }
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String, // "compact", "full", "json"
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_upstream_names() -> Vec<String> {
    vec!["upstream".to_string()]
}
fn default_branch() -> String {
    "master".to_string()
}
fn default_max_parallel() -> usize {
    4
}
fn default_timeout() -> u64 {
    300
}
fn default_auth_method() -> String {
    "auto".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_dirty: false,
            origin_only: false,
            no_upstream: false,
            upstream_names: default_upstream_names(),
            default_branch: default_branch(),
            max_parallel: default_max_parallel(),
            timeout: default_timeout(),
        }
    }
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            auth_method: default_auth_method(),
            forks_only: default_true(),
            repo_flags: RepoFlags::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Command-line switches layered on top of the configuration file.
///
/// Switches can only turn behavior on; a `false` here leaves the file value.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub root: Option<PathBuf>,
    pub dry_run: bool,
    pub sync_dirty: bool,
    pub disable_github: bool,
    pub origin_only: bool,
    pub no_upstream: bool,
    pub max_parallel: Option<usize>,
}

/// Immutable policy for one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub root: PathBuf,
    pub dry_run: bool,
    pub sync_dirty: bool,
    pub disable_github: bool,
    pub origin_only: bool,
    pub no_upstream: bool,
    pub upstream_names: Vec<String>,
    pub default_branch: String,
    pub max_parallel: usize,
    pub timeout: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        let sync = SyncConfig::default();
        Self {
            root: PathBuf::from("."),
            dry_run: false,
            sync_dirty: sync.sync_dirty,
            disable_github: false,
            origin_only: sync.origin_only,
            no_upstream: sync.no_upstream,
            upstream_names: sync.upstream_names,
            default_branch: sync.default_branch,
            max_parallel: sync.max_parallel,
            timeout: Duration::from_secs(sync.timeout),
        }
    }
}

impl RunConfig {
    /// Whether `name` is one of the configured upstream aliases
    pub fn is_upstream_name(&self, name: &str) -> bool {
        self.upstream_names.iter().any(|n| n == name)
    }
}

/// Where the configuration in use came from
#[derive(Debug)]
pub enum ConfigSource {
    /// Read from an existing file
    File(PathBuf),
    /// No file existed; the defaults were written to this path
    Created(PathBuf),
    /// No file existed and writing the defaults failed
    Unsaved { path: PathBuf, error: anyhow::Error },
}

impl Config {
    /// Load configuration from the default location, writing out the defaults
    /// when no file exists yet.
    ///
    /// A failed write is not an error; it is reported through [`ConfigSource`]
    /// so the caller can log it once logging is set up.
    pub fn load_or_default() -> Result<(Self, ConfigSource)> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            let config = Self::load(&config_path)?;
            return Ok((config, ConfigSource::File(config_path)));
        }

        let config = Self::default();

        let written = config_path
            .parent()
            .map(|parent| {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))
            })
            .transpose()
            .and_then(|_| config.save(&config_path));

        let source = match written {
            Ok(()) => ConfigSource::Created(config_path),
            Err(error) => ConfigSource::Unsaved {
                path: config_path,
                error,
            },
        };

        Ok((config, source))
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("clonesync").join("config.yml"))
    }

    /// Expand environment variables and `~` in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        if let Some(root) = &self.root {
            self.root = Some(
                shellexpand::full(root)
                    .context("Failed to expand root path")?
                    .into_owned(),
            );
        }

        Ok(())
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sync.max_parallel == 0 {
            bail!("sync.max_parallel must be at least 1");
        }
        if self.sync.timeout == 0 {
            bail!("sync.timeout must be at least 1 second");
        }
        if self.sync.default_branch.trim().is_empty() {
            bail!("sync.default_branch must not be empty");
        }
        if self.sync.upstream_names.iter().any(|n| n == "origin") {
            bail!("sync.upstream_names must not contain 'origin'");
        }
        Ok(())
    }

    /// Combine the file settings with command-line switches
    pub fn run_config(&self, overrides: &RunOverrides) -> Result<RunConfig> {
        let root = match (&overrides.root, &self.root) {
            (Some(root), _) => expand_root(root)?,
            (None, Some(root)) => PathBuf::from(root),
            (None, None) => std::env::current_dir().context("Failed to get current directory")?,
        };

        let max_parallel = overrides.max_parallel.unwrap_or(self.sync.max_parallel);
        if max_parallel == 0 {
            bail!("--jobs must be at least 1");
        }

        Ok(RunConfig {
            root,
            dry_run: overrides.dry_run,
            sync_dirty: overrides.sync_dirty || self.sync.sync_dirty,
            disable_github: overrides.disable_github || !self.github.enabled,
            origin_only: overrides.origin_only || self.sync.origin_only,
            no_upstream: overrides.no_upstream || self.sync.no_upstream,
            upstream_names: self.sync.upstream_names.clone(),
            default_branch: self.sync.default_branch.clone(),
            max_parallel,
            timeout: Duration::from_secs(self.sync.timeout),
        })
    }
}

fn expand_root(root: &Path) -> Result<PathBuf> {
    let raw = root.to_string_lossy();
    let expanded = shellexpand::full(&raw).context("Failed to expand root path")?;
    Ok(PathBuf::from(expanded.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tempfile::TempDir;

    // Helper function to create a temporary config directory
    fn setup_test_config_dir() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_dir = temp_dir.path().join("clonesync");
        std::fs::create_dir_all(&config_dir).expect("Failed to create config dir");
        (temp_dir, config_dir)
    }

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert!(config.root.is_none());
        assert!(!config.sync.sync_dirty);
        assert!(!config.sync.origin_only);
        assert!(!config.sync.no_upstream);
        assert_eq!(config.sync.upstream_names, vec!["upstream".to_string()]);
        assert_eq!(config.sync.default_branch, "master");
        assert_eq!(config.sync.max_parallel, 4);
        assert_eq!(config.sync.timeout, 300);
        assert!(config.github.enabled);
        assert!(config.github.forks_only);
        assert!(config.github.repo_flags.is_empty());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    #[serial]
    fn test_expand_paths() {
        env::set_var("TEST_CLONESYNC_HOME", "/test/home");

        let mut config = Config {
            root: Some("${TEST_CLONESYNC_HOME}/src".to_string()),
            ..Default::default()
        };

        config.expand_paths().expect("Failed to expand paths");

        assert_eq!(config.root.as_deref(), Some("/test/home/src"));

        env::remove_var("TEST_CLONESYNC_HOME");
    }

    #[test]
    fn test_config_load_nonexistent_file() {
        let nonexistent_path = Path::new("/nonexistent/path/config.yml");
        let result = Config::load(nonexistent_path);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let (_temp_dir, config_dir) = setup_test_config_dir();
        let config_path = config_dir.join("config.yml");

        let mut config = Config::default();
        config.root = Some("/custom/path".to_string());
        config.sync.default_branch = "main".to_string();
        config.sync.upstream_names = vec!["upstream".to_string(), "canonical".to_string()];
        config.github.repo_flags.has_wiki = Some(false);

        config.save(&config_path).expect("Failed to save config");

        let loaded = Config::load(&config_path).expect("Failed to load config");

        assert_eq!(loaded.root.as_deref(), Some("/custom/path"));
        assert_eq!(loaded.sync.default_branch, "main");
        assert_eq!(loaded.sync.upstream_names.len(), 2);
        assert_eq!(loaded.github.repo_flags.has_wiki, Some(false));
        assert_eq!(loaded.github.repo_flags.has_issues, None);
    }

    #[test]
    fn test_config_default_path_xdg() {
        let default_path = Config::default_config_path().expect("Failed to get default path");
        assert!(default_path.to_string_lossy().contains("clonesync"));
        assert!(default_path.to_string_lossy().ends_with("config.yml"));
    }

    fn with_xdg_config_home<T>(value: &Path, f: impl FnOnce() -> T) -> T {
        let original = env::var_os("XDG_CONFIG_HOME");
        env::set_var("XDG_CONFIG_HOME", value);
        let result = f();
        match original {
            Some(val) => env::set_var("XDG_CONFIG_HOME", val),
            None => env::remove_var("XDG_CONFIG_HOME"),
        }
        result
    }

    #[test]
    #[serial]
    fn test_load_or_default_creates_then_reads_file() {
        let temp_dir = TempDir::new().unwrap();

        let (config, source) = with_xdg_config_home(temp_dir.path(), Config::load_or_default)
            .expect("defaults load");
        assert_eq!(config.sync.max_parallel, 4);
        let created = match source {
            ConfigSource::Created(path) => path,
            other => panic!("expected Created, got {:?}", other),
        };
        assert_eq!(created, temp_dir.path().join("clonesync").join("config.yml"));
        assert!(created.exists());

        let (_, source) = with_xdg_config_home(temp_dir.path(), Config::load_or_default)
            .expect("existing file loads");
        assert!(matches!(source, ConfigSource::File(path) if path == created));
    }

    #[test]
    #[serial]
    fn test_load_or_default_reports_unwritable_location() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("not-a-dir");
        std::fs::write(&blocker, "plain file").unwrap();

        let (config, source) = with_xdg_config_home(&blocker, Config::load_or_default)
            .expect("defaults are still used");

        assert_eq!(config.sync.default_branch, "master");
        assert!(matches!(source, ConfigSource::Unsaved { .. }));
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml_content = r#"
root: "/srv/clones"
sync:
  sync_dirty: true
  origin_only: true
  upstream_names: ["upstream", "canonical"]
  default_branch: "main"
  max_parallel: 8
  timeout: 60
github:
  enabled: false
  auth_method: "git_config"
  forks_only: false
  repo_flags:
    has_issues: false
    has_projects: false
logging:
  level: "debug"
  format: "json"
"#;

        let config: Config = serde_yaml::from_str(yaml_content).expect("Failed to parse YAML");

        assert_eq!(config.root.as_deref(), Some("/srv/clones"));
        assert!(config.sync.sync_dirty);
        assert!(config.sync.origin_only);
        assert!(!config.sync.no_upstream);
        assert_eq!(config.sync.upstream_names, vec!["upstream", "canonical"]);
        assert_eq!(config.sync.default_branch, "main");
        assert_eq!(config.sync.max_parallel, 8);
        assert_eq!(config.sync.timeout, 60);
        assert!(!config.github.enabled);
        assert_eq!(config.github.auth_method, "git_config");
        assert!(!config.github.forks_only);
        assert_eq!(config.github.repo_flags.has_issues, Some(false));
        assert_eq!(config.github.repo_flags.has_wiki, None);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.sync.max_parallel = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sync.upstream_names = vec!["origin".to_string()];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sync.default_branch = "  ".to_string();
        assert!(config.validate().is_err());

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_run_config_switches_only_enable() {
        let mut config = Config::default();
        config.sync.no_upstream = true;
        config.root = Some("/from/config".to_string());

        let overrides = RunOverrides {
            origin_only: true,
            dry_run: true,
            ..Default::default()
        };
        let run = config.run_config(&overrides).expect("run config");

        assert_eq!(run.root, PathBuf::from("/from/config"));
        assert!(run.dry_run);
        assert!(run.origin_only);
        assert!(run.no_upstream);
        assert!(!run.sync_dirty);
        assert!(!run.disable_github);
        assert_eq!(run.timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_run_config_cli_root_and_jobs() {
        let mut config = Config::default();
        config.github.enabled = false;

        let overrides = RunOverrides {
            root: Some(PathBuf::from("/from/cli")),
            max_parallel: Some(2),
            ..Default::default()
        };
        let run = config.run_config(&overrides).expect("run config");

        assert_eq!(run.root, PathBuf::from("/from/cli"));
        assert_eq!(run.max_parallel, 2);
        assert!(run.disable_github);

        let zero_jobs = RunOverrides {
            max_parallel: Some(0),
            ..Default::default()
        };
        assert!(config.run_config(&zero_jobs).is_err());
    }

    #[test]
    fn test_upstream_name_matching() {
        let run = RunConfig {
            upstream_names: vec!["upstream".to_string(), "canonical".to_string()],
            ..Default::default()
        };
        assert!(run.is_upstream_name("canonical"));
        assert!(run.is_upstream_name("upstream"));
        assert!(!run.is_upstream_name("origin"));
        assert!(!run.is_upstream_name("fork"));
    }
}
