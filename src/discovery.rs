//! Local repository discovery
//!
//! Finds the clones to synchronize under a root path: either the root itself
//! when it is a clone, or its immediate child directories that are clones.
//! Discovery never descends further than one level.

use path_clean::PathClean;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::DiscoveryError;

/// Enumerates clones below a root directory
#[derive(Debug, Clone)]
pub struct LocalDiscovery {
    root: PathBuf,
}

impl LocalDiscovery {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Discover repositories in directory-listing order.
    ///
    /// The order is whatever the filesystem returns; callers must not rely on it.
    pub fn discover(&self) -> Result<Vec<PathBuf>, DiscoveryError> {
        let root = &self.root;

        let metadata = std::fs::metadata(root).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => DiscoveryError::NotFound { path: root.clone() },
            _ => DiscoveryError::Unreadable {
                path: root.clone(),
                source,
            },
        })?;

        if !metadata.is_dir() {
            return Err(DiscoveryError::NotADirectory { path: root.clone() });
        }

        if is_clone(root) {
            info!("Syncing single clone at {}", root.display());
            return Ok(vec![root.clone()]);
        }

        debug!("Finding git directories under {}", root.display());

        let entries = std::fs::read_dir(root).map_err(|source| DiscoveryError::Unreadable {
            path: root.clone(),
            source,
        })?;

        let mut seen = HashSet::new();
        let mut repos = Vec::new();

        for entry in entries {
            let entry = entry.map_err(|source| DiscoveryError::Unreadable {
                path: root.clone(),
                source,
            })?;
            let path = entry.path();

            // Follows symlinks, so a linked clone counts once under its real path
            if !path.is_dir() || !is_clone(&path) {
                continue;
            }

            let resolved = std::fs::canonicalize(&path).unwrap_or_else(|_| path.clean());
            if !seen.insert(resolved) {
                debug!("Skipping duplicate clone: {}", path.display());
                continue;
            }

            repos.push(path);
        }

        info!(
            "Found {} git directories under {}",
            repos.len(),
            root.display()
        );
        Ok(repos)
    }
}

/// A clone has a `.git` entry: a directory, or a gitfile for worktrees and submodules
fn is_clone(path: &Path) -> bool {
    path.join(".git").exists()
}
