// src/error.rs

//! Crate-wide error type
//!
//! One variant per failure class the tool can surface. Fan-out handlers
//! decide per variant whether an error aborts the run or is suppressed by
//! `--ignore-errors`; everything that reaches `main` exits non-zero.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("repository '{0}' is locked by another process")]
    LockContention(String),

    #[error("lock error: {0}")]
    Lock(String),

    #[error("{path}: expected directory is missing")]
    MissingDirectory { path: PathBuf },

    #[error("{path}: expected file is missing")]
    MissingFile { path: PathBuf },

    #[error("download failed: {0}")]
    Download(String),

    #[error("validation failed for {path}: {reason}")]
    Validation { path: PathBuf, reason: String },

    #[error("metadata parse error: {0}")]
    Parse(String),

    #[error("{command} exited with {status}: {stderr}")]
    Subprocess {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("no backend registered for repository type '{0}'")]
    PluginNotFound(String),

    #[error("architecture '{arch}' is not configured for repository '{repo}'")]
    ArchNotConfigured { repo: String, arch: String },

    #[error("operation not valid: {0}")]
    OperationNotValid(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
