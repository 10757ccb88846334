// src/paths.rs

//! Tag directory resolution
//!
//! Pure path arithmetic over the configured layout; nothing here touches
//! the filesystem.

use crate::config::{Config, RepoConfig, TagStyle};
use std::path::PathBuf;

/// Directory holding one tag of one repository.
///
/// Topdir layout puts the tag segment first (`{data_dir}/{tag}/{local}`),
/// bottomdir puts it last (`{data_dir}/{local}/{tag}`).
pub fn repo_dir(config: &Config, repo: &RepoConfig, tag: &str) -> PathBuf {
    match config.tag_style {
        TagStyle::Topdir => config.data_dir.join(tag).join(&repo.local),
        TagStyle::Bottomdir => config.data_dir.join(&repo.local).join(tag),
    }
}

/// Lock file guarding all mutating actions on a repository.
pub fn lock_path(head_dir: &std::path::Path, repo: &RepoConfig) -> PathBuf {
    head_dir.join(format!("{}.lock", repo.name))
}
