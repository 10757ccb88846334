// src/lock.rs

//! Per-repository concurrency gate
//!
//! An exclusive advisory `flock` on `{repo_dir}/{repo}.lock`, taken
//! non-blocking: a second invocation against a busy repo fails immediately
//! rather than queueing. The lock is released when the guard drops, on
//! every exit path; the lock file itself is unlinked best-effort (a stale
//! file never blocks acquisition, since only the flock matters).
//!
//! The process holds at most one repo lock at a time. Fan-out handlers
//! lock each repo around its own action; a nested acquire while one is
//! held is reported as an error rather than silently succeeding.

use crate::config::RepoConfig;
use crate::error::{Error, Result};
use crate::paths;
use fs2::FileExt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Set while any [`RepoLock`] is alive in this process.
static LOCK_HELD: AtomicBool = AtomicBool::new(false);

/// RAII guard over one repository's lock file.
#[derive(Debug)]
pub struct RepoLock {
    // Kept open to hold the flock.
    _file: File,
    path: PathBuf,
    repo: String,
}

impl RepoLock {
    /// Acquire the lock for `repo` inside `repo_dir`, without blocking.
    ///
    /// Fails if `repo_dir` does not exist, if another process holds the
    /// lock, or if this process already holds a repo lock.
    pub fn try_acquire(repo_dir: &Path, repo: &RepoConfig) -> Result<Self> {
        if !repo_dir.is_dir() {
            return Err(Error::MissingDirectory {
                path: repo_dir.to_path_buf(),
            });
        }

        if LOCK_HELD.swap(true, Ordering::SeqCst) {
            return Err(Error::Lock(format!(
                "cannot lock '{}': this process already holds a repository lock",
                repo.name
            )));
        }

        let path = paths::lock_path(repo_dir, repo);
        let guard = Self::flock(&path, &repo.name);
        if guard.is_err() {
            LOCK_HELD.store(false, Ordering::SeqCst);
        }
        guard
    }

    fn flock(path: &Path, repo: &str) -> Result<Self> {
        let file = File::create(path)
            .map_err(|e| Error::Lock(format!("cannot create {}: {e}", path.display())))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("acquired lock {}", path.display());
                Ok(Self {
                    _file: file,
                    path: path.to_path_buf(),
                    repo: repo.to_string(),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                Err(Error::LockContention(repo.to_string()))
            }
            Err(e) => Err(Error::Lock(format!(
                "cannot lock {}: {e}",
                path.display()
            ))),
        }
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        // Unlink first, then the flock releases with the descriptor.
        let _ = std::fs::remove_file(&self.path);
        LOCK_HELD.store(false, Ordering::SeqCst);
        debug!("released lock for '{}'", self.repo);
    }
}
