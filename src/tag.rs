// src/tag.rs

//! Tag engine
//!
//! Promotes one tag directory into another. Two materializations:
//!
//! - **soft tag** — the destination is a symbolic link to the source tree.
//!   Cheap and atomic to repoint; follows the source as it mutates. Suited
//!   to promotion pointers like `prod`.
//! - **hard tag** — the destination replicates the source directory
//!   structure with every file hardlinked. An independent namespace whose
//!   files share inodes with the source at creation time; later mirror
//!   runs replace files in `head` by rename, so the snapshot keeps the old
//!   content.
//!
//! A configured `hard_tag_regex` forces hardlink mode for matching
//! destination tag names regardless of the symlink flag.

use crate::error::{Error, Result};
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Tag names are a single path segment, nothing fancy.
pub fn is_valid_tag_name(name: &str) -> bool {
    static TAG_NAME: OnceLock<Regex> = OnceLock::new();
    TAG_NAME
        .get_or_init(|| Regex::new("^[A-Za-z0-9_-]+$").unwrap())
        .is_match(name)
}

/// One tag-creation request, resolved by the orchestrator.
pub struct TagRequest<'a> {
    pub src_dir: &'a Path,
    pub dest_dir: &'a Path,
    pub dest_tag: &'a str,
    pub symlink: bool,
    pub force: bool,
    pub hard_tag_regex: Option<&'a Regex>,
}

/// Build `dest_dir` from `src_dir` per the request.
pub fn create_tag(req: &TagRequest) -> Result<()> {
    if !req.src_dir.is_dir() {
        return Err(Error::MissingDirectory {
            path: req.src_dir.to_path_buf(),
        });
    }

    let soft = req.symlink
        && !req
            .hard_tag_regex
            .map(|re| re.is_match(req.dest_tag))
            .unwrap_or(false);

    remove_existing_dest(req)?;

    if let Some(parent) = req.dest_dir.parent() {
        fs::create_dir_all(parent)?;
    }

    if soft {
        let target = req.src_dir.canonicalize()?;
        std::os::unix::fs::symlink(&target, req.dest_dir)?;
        info!(
            "tagged {} -> {} (symlink)",
            req.dest_dir.display(),
            target.display()
        );
    } else {
        link_tree(req.src_dir, req.dest_dir)?;
        info!(
            "tagged {} from {} (hardlink tree)",
            req.dest_dir.display(),
            req.src_dir.display()
        );
    }
    Ok(())
}

/// Clear the destination if something is already there.
///
/// A symlink or a non-empty directory requires `force`; an empty leftover
/// directory is silently reused.
fn remove_existing_dest(req: &TagRequest) -> Result<()> {
    let meta = match req.dest_dir.symlink_metadata() {
        Ok(meta) => meta,
        Err(_) => return Ok(()),
    };

    if meta.file_type().is_symlink() {
        if !req.force {
            return Err(Error::OperationNotValid(format!(
                "tag '{}' already exists at {} (use force to overwrite)",
                req.dest_tag,
                req.dest_dir.display()
            )));
        }
        fs::remove_file(req.dest_dir)?;
        return Ok(());
    }

    let empty = fs::read_dir(req.dest_dir)?.next().is_none();
    if empty {
        fs::remove_dir(req.dest_dir)?;
        return Ok(());
    }
    if !req.force {
        return Err(Error::OperationNotValid(format!(
            "tag '{}' already exists at {} (use force to overwrite)",
            req.dest_tag,
            req.dest_dir.display()
        )));
    }
    fs::remove_dir_all(req.dest_dir)?;
    Ok(())
}

/// Replicate `src` at `dest`, hardlinking every regular file.
fn link_tree(src: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|e| Error::Parse(format!("walk {}: {e}", src.display())))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .expect("walkdir yields children of src");
        let target = dest.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            // The live lock file is transient state, not repo content.
            let top_level = rel.parent() == Some(Path::new(""));
            if top_level && rel.to_string_lossy().ends_with(".lock") {
                continue;
            }
            if target.exists() {
                fs::remove_file(&target)?;
            }
            fs::hard_link(entry.path(), &target)?;
            debug!("linked {}", rel.display());
        }
        // Symlinks inside a repo tree are not expected; anything else is
        // skipped rather than guessed at.
    }
    Ok(())
}
