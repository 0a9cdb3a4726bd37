/// Common test utilities and fixtures for clonesync tests
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Whether a usable `git` executable is on PATH
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Run git in `dir` with a fixed identity, panicking on failure
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "Test Author")
        .env("GIT_AUTHOR_EMAIL", "author@example.com")
        .env("GIT_COMMITTER_NAME", "Test Author")
        .env("GIT_COMMITTER_EMAIL", "author@example.com")
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("Failed to execute git");

    assert!(
        output.status.success(),
        "git {:?} failed in {}: {}",
        args,
        dir.display(),
        String::from_utf8_lossy(&output.stderr)
    );

    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A fork setup on local disk:
///
/// - `origin.git` and `upstream.git`: bare repositories sharing one root commit
/// - `workspace/tool`: a clone of origin with `upstream` added, checked out on `feature-x`
pub struct ForkFixture {
    pub temp_dir: TempDir,
    pub workspace: PathBuf,
    pub clone: PathBuf,
    pub origin: PathBuf,
    pub upstream: PathBuf,
}

impl ForkFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = temp_dir.path();

        let seed = base.join("seed");
        std::fs::create_dir_all(&seed).expect("Failed to create seed dir");
        git(&seed, &["init", "-q"]);
        git(&seed, &["symbolic-ref", "HEAD", "refs/heads/master"]);
        std::fs::write(seed.join("README"), "tool\n").expect("Failed to write README");
        git(&seed, &["add", "README"]);
        git(&seed, &["commit", "-q", "-m", "initial"]);

        let origin = base.join("origin.git");
        let upstream = base.join("upstream.git");
        git(base, &["clone", "-q", "--bare", path_str(&seed), path_str(&origin)]);
        git(base, &["clone", "-q", "--bare", path_str(&seed), path_str(&upstream)]);

        let workspace = base.join("workspace");
        std::fs::create_dir_all(&workspace).expect("Failed to create workspace");
        let clone = workspace.join("tool");
        git(base, &["clone", "-q", path_str(&origin), path_str(&clone)]);
        git(&clone, &["remote", "add", "upstream", path_str(&upstream)]);
        git(&clone, &["checkout", "-q", "-b", "feature-x"]);

        Self {
            temp_dir,
            workspace,
            clone,
            origin,
            upstream,
        }
    }

    /// Push a new commit to `master` of a bare remote; returns its sha
    pub fn commit_to(&self, remote: &Path, file: &str) -> String {
        let name = remote
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let work = self.temp_dir.path().join(format!("work-{}-{}", name, file));

        git(
            self.temp_dir.path(),
            &["clone", "-q", path_str(remote), path_str(&work)],
        );
        std::fs::write(work.join(file), format!("{}\n", file)).expect("Failed to write file");
        git(&work, &["add", file]);
        git(&work, &["commit", "-q", "-m", file]);
        git(&work, &["push", "-q", "origin", "master"]);

        git(&work, &["rev-parse", "HEAD"])
    }

    pub fn rev(&self, repo: &Path, rev: &str) -> String {
        git(repo, &["rev-parse", rev])
    }

    pub fn active_branch(&self) -> String {
        git(&self.clone, &["symbolic-ref", "--short", "HEAD"])
    }
}

pub fn path_str(path: &Path) -> &str {
    path.to_str().expect("temp paths are utf-8")
}
