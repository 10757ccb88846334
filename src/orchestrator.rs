// src/orchestrator.rs

//! Action dispatch
//!
//! The orchestrator owns the validated config and turns one CLI action
//! into backend calls. `mirror` and `clean` fan out over a repo selector
//! (`all` or a regex); each selected repo is locked, operated on, and
//! unlocked individually, so a long fan-out never holds more than one
//! repo hostage at a time. An error aborts the fan-out unless the action
//! carries `ignore_errors`.

use crate::backend::{create_backend, ActionOptions, Backend, BackendContext, TagDiff};
use crate::config::{Config, RepoConfig, HEAD_TAG};
use crate::error::{Error, Result};
use crate::lock::RepoLock;
use crate::output::{RepoListing, TagEntry, TagListing};
use crate::paths;
use crate::tag::{is_valid_tag_name, TagRequest};
use regex::Regex;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

pub struct Orchestrator {
    config: Config,
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Expand a repo selector: a literal name, `all`, or (with `regex`) a
    /// pattern over configured repo names. Iteration order is sorted.
    fn select(&self, selector: &str, regex: bool) -> Result<Vec<&RepoConfig>> {
        if regex {
            let re = Regex::new(selector)
                .map_err(|e| Error::Config(format!("invalid repo pattern '{selector}': {e}")))?;
            let matched: Vec<&RepoConfig> = self
                .config
                .repos
                .values()
                .filter(|repo| re.is_match(&repo.name))
                .collect();
            if matched.is_empty() {
                warn!("no configured repo matches '{selector}'");
            }
            Ok(matched)
        } else if selector == "all" {
            Ok(self.config.repos.values().collect())
        } else {
            Ok(vec![self.config.repo(selector)?])
        }
    }

    fn context(&self, repo: &RepoConfig, opts: &ActionOptions) -> BackendContext {
        BackendContext {
            repo: repo.clone(),
            head_dir: paths::repo_dir(&self.config, repo, HEAD_TAG),
            opts: opts.clone(),
        }
    }

    /// Lock one repo's head directory and hand its backend to `f`.
    ///
    /// Mutating actions that may run against a fresh repo create the head
    /// directory first; the others require it to exist, which makes the
    /// lock acquisition itself the missing-repo check.
    fn with_locked_backend<F>(
        &self,
        repo: &RepoConfig,
        opts: &ActionOptions,
        create_dir: bool,
        f: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut dyn Backend) -> Result<()>,
    {
        let head_dir = paths::repo_dir(&self.config, repo, HEAD_TAG);
        if create_dir {
            fs::create_dir_all(&head_dir)?;
        }
        let _lock = RepoLock::try_acquire(&head_dir, repo)?;
        let mut backend = create_backend(self.context(repo, opts))?;
        f(backend.as_mut())
    }

    pub fn mirror(&self, selector: &str, regex: bool, opts: &ActionOptions) -> Result<()> {
        for repo in self.select(selector, regex)? {
            let outcome =
                self.with_locked_backend(repo, opts, true, |backend| backend.mirror());
            match outcome {
                Ok(()) => info!("mirrored '{}'", repo.name),
                Err(e) if opts.ignore_errors => {
                    warn!("skipping '{}': {e}", repo.name);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn clean(&self, selector: &str, regex: bool, opts: &ActionOptions) -> Result<()> {
        for repo in self.select(selector, regex)? {
            self.with_locked_backend(repo, opts, false, |backend| backend.clean())?;
        }
        Ok(())
    }

    pub fn init(&self, repo: &str, opts: &ActionOptions) -> Result<()> {
        let repo = self.config.repo(repo)?;
        self.with_locked_backend(repo, opts, true, |backend| {
            backend.init(opts.arch.as_deref())
        })
    }

    pub fn add_file(&self, repo: &str, arch: &str, files: &[PathBuf], opts: &ActionOptions) -> Result<()> {
        let repo = self.config.repo(repo)?;
        self.with_locked_backend(repo, opts, true, |backend| backend.add_file(arch, files))
    }

    pub fn del_file(&self, repo: &str, arch: &str, files: &[String], opts: &ActionOptions) -> Result<()> {
        let repo = self.config.repo(repo)?;
        self.with_locked_backend(repo, opts, false, |backend| backend.del_file(arch, files))
    }

    pub fn tag(
        &self,
        repo: &str,
        dest_tag: &str,
        src_tag: &str,
        symlink: bool,
        opts: &ActionOptions,
    ) -> Result<()> {
        for tag in [src_tag, dest_tag] {
            if !is_valid_tag_name(tag) {
                return Err(Error::OperationNotValid(format!("invalid tag name '{tag}'")));
            }
        }
        if dest_tag == HEAD_TAG {
            return Err(Error::OperationNotValid(
                "'head' is the writable tag and cannot be a tag destination".to_string(),
            ));
        }

        let repo = self.config.repo(repo)?;
        let src_dir = paths::repo_dir(&self.config, repo, src_tag);
        let dest_dir = paths::repo_dir(&self.config, repo, dest_tag);

        self.with_locked_backend(repo, opts, false, |backend| {
            backend.tag(&TagRequest {
                src_dir: &src_dir,
                dest_dir: &dest_dir,
                dest_tag,
                symlink,
                force: opts.force,
                hard_tag_regex: self.config.hard_tag_regex_for(repo),
            })
        })
    }

    /// Read-only: no lock is taken.
    pub fn diff(
        &self,
        repo: &str,
        arch: &str,
        dest_tag: &str,
        src_tag: &str,
        opts: &ActionOptions,
    ) -> Result<TagDiff> {
        for tag in [src_tag, dest_tag] {
            if !is_valid_tag_name(tag) {
                return Err(Error::OperationNotValid(format!("invalid tag name '{tag}'")));
            }
        }
        let repo = self.config.repo(repo)?;
        let src_dir = paths::repo_dir(&self.config, repo, src_tag);
        let dest_dir = paths::repo_dir(&self.config, repo, dest_tag);
        for dir in [&src_dir, &dest_dir] {
            if !dir.is_dir() {
                return Err(Error::MissingDirectory { path: dir.clone() });
            }
        }

        let backend = create_backend(self.context(repo, opts))?;
        backend.diff(arch, &src_dir, src_tag, &dest_dir, dest_tag)
    }

    /// Read-only: the repo catalog.
    pub fn list_repos(&self) -> Vec<RepoListing> {
        self.config
            .repos
            .values()
            .map(|repo| RepoListing {
                name: repo.name.clone(),
                kind: repo.kind.to_string(),
                mirrored: repo.is_mirrored(),
            })
            .collect()
    }

    /// Read-only: one repo's tags, hard tags annotated with the soft tags
    /// whose symlinks resolve to them.
    pub fn list_tags(&self, repo: &str) -> Result<TagListing> {
        let repo = self.config.repo(repo)?;

        let candidates = self.tag_candidates(repo)?;
        let mut hard: Vec<(String, PathBuf)> = Vec::new();
        let mut soft: Vec<(String, PathBuf)> = Vec::new();

        for (tag, dir) in candidates {
            let meta = match dir.symlink_metadata() {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            if meta.file_type().is_symlink() {
                match fs::canonicalize(&dir) {
                    Ok(target) => soft.push((tag, target)),
                    Err(_) => warn!("dangling tag symlink {}", dir.display()),
                }
            } else if meta.is_dir() {
                match fs::canonicalize(&dir) {
                    Ok(real) => hard.push((tag, real)),
                    Err(_) => continue,
                }
            }
        }

        let mut tags: Vec<TagEntry> = hard
            .iter()
            .map(|(tag, real)| TagEntry {
                tag: tag.clone(),
                soft: {
                    let mut names: Vec<String> = soft
                        .iter()
                        .filter(|(_, target)| target == real)
                        .map(|(name, _)| name.clone())
                        .collect();
                    names.sort();
                    names
                },
            })
            .collect();
        tags.sort_by(|a, b| a.tag.cmp(&b.tag));

        Ok(TagListing {
            repo: repo.name.clone(),
            tags,
        })
    }

    /// Enumerate `(tag, dir)` pairs for a repo under either layout.
    fn tag_candidates(&self, repo: &RepoConfig) -> Result<Vec<(String, PathBuf)>> {
        let mut out = Vec::new();
        match self.config.tag_style {
            crate::config::TagStyle::Topdir => {
                for entry in fs::read_dir(&self.config.data_dir)? {
                    let entry = entry?;
                    let tag = entry.file_name().to_string_lossy().into_owned();
                    let dir = entry.path().join(&repo.local);
                    if dir.symlink_metadata().is_ok() {
                        out.push((tag, dir));
                    }
                }
            }
            crate::config::TagStyle::Bottomdir => {
                let parent = self.config.data_dir.join(&repo.local);
                if !parent.is_dir() {
                    return Ok(out);
                }
                for entry in fs::read_dir(&parent)? {
                    let entry = entry?;
                    let tag = entry.file_name().to_string_lossy().into_owned();
                    out.push((tag, entry.path()));
                }
            }
        }
        Ok(out)
    }
}
