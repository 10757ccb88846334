// src/lib.rs

//! repotag
//!
//! Manages local mirrors of remote package repositories and snapshots the
//! mirrored state into named tags for promotion or rollback.
//!
//! # Architecture
//!
//! - One validated, immutable [`config::Config`] per process
//! - Backends (Yum, Apt, Plain) behind the [`backend::Backend`] trait,
//!   dispatched through an explicit registry
//! - Every mutating action holds the repo's advisory lock for its duration
//! - `head` is the writable tag; other tags are hardlink snapshots or
//!   symlink pointers built from it

pub mod backend;
pub mod config;
mod error;
pub mod fetch;
pub mod lock;
pub mod orchestrator;
pub mod output;
pub mod paths;
pub mod tag;
pub mod validate;

pub use backend::{create_backend, ActionOptions, Backend, BackendContext, Package, TagDiff};
pub use config::{Config, PackageFilter, RepoConfig, RepoKind, TagStyle, HEAD_TAG};
pub use error::{Error, Result};
pub use fetch::Fetcher;
pub use lock::RepoLock;
pub use orchestrator::Orchestrator;
pub use output::{OutputFormat, RepoListing, TagEntry, TagListing};
pub use tag::{create_tag, is_valid_tag_name, TagRequest};
pub use validate::{validate_file, Check, DigestAlgorithm};
