// src/backend/plain.rs

//! Plain backend
//!
//! Unstructured file trees with no index format: nothing to mirror and no
//! metadata to regenerate, but the tagging, add/del, and diff workflows
//! still apply. Diff compares the trees themselves rather than metadata.

use super::{ActionOptions, Backend, BackendContext, TagDiff};
use crate::config::{RepoConfig, RepoKind};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

pub struct PlainBackend {
    repo: RepoConfig,
    head_dir: PathBuf,
    opts: ActionOptions,
}

impl PlainBackend {
    pub fn create(ctx: BackendContext) -> Box<dyn Backend> {
        Box::new(Self {
            repo: ctx.repo,
            head_dir: ctx.head_dir,
            opts: ctx.opts,
        })
    }

    fn require_arch(&self, arch: &str) -> Result<()> {
        if self.repo.arch.iter().any(|a| a == arch) {
            Ok(())
        } else {
            Err(Error::ArchNotConfigured {
                repo: self.repo.name.clone(),
                arch: arch.to_string(),
            })
        }
    }

    /// Every regular file under `dir`, as sorted relative paths.
    fn tree_files(dir: &Path) -> Result<Vec<String>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(dir) {
            let entry = entry.map_err(|e| Error::Parse(format!("walk {}: {e}", dir.display())))?;
            if entry.file_type().is_file() {
                let rel = entry
                    .path()
                    .strip_prefix(dir)
                    .expect("walkdir yields children of dir");
                files.push(rel.to_string_lossy().into_owned());
            }
        }
        files.sort();
        Ok(files)
    }
}

impl Backend for PlainBackend {
    fn kind(&self) -> RepoKind {
        RepoKind::Plain
    }

    fn mirror(&mut self) -> Result<()> {
        Err(Error::OperationNotValid(format!(
            "plain repos are local-only; '{}' cannot be mirrored",
            self.repo.name
        )))
    }

    /// Nothing is metadata-referenced, so nothing qualifies for removal.
    fn clean(&self) -> Result<()> {
        info!("repo '{}' has no metadata; clean is a no-op", self.repo.name);
        Ok(())
    }

    fn init(&self, arch: Option<&str>) -> Result<()> {
        let arches: Vec<&str> = match arch {
            Some(arch) => {
                self.require_arch(arch)?;
                vec![arch]
            }
            None => self.repo.arch.iter().map(String::as_str).collect(),
        };
        for arch in arches {
            let dir = self.head_dir.join(arch);
            fs::create_dir_all(&dir)?;
            info!("initialized {}", dir.display());
        }
        Ok(())
    }

    fn add_file(&self, arch: &str, files: &[PathBuf]) -> Result<()> {
        self.require_arch(arch)?;
        let arch_dir = self.head_dir.join(arch);
        fs::create_dir_all(&arch_dir)?;

        for file in files {
            if !file.is_file() {
                return Err(Error::MissingFile { path: file.clone() });
            }
            let name = file.file_name().ok_or_else(|| {
                Error::OperationNotValid(format!("cannot add '{}': no file name", file.display()))
            })?;
            let dest = arch_dir.join(name);
            if dest.exists() && !self.opts.force {
                return Err(Error::OperationNotValid(format!(
                    "{} already exists (use force to overwrite)",
                    dest.display()
                )));
            }
            fs::copy(file, &dest)?;
            info!("added {}", dest.display());
        }
        Ok(())
    }

    fn del_file(&self, arch: &str, files: &[String]) -> Result<()> {
        self.require_arch(arch)?;
        let arch_dir = self.head_dir.join(arch);
        for name in files {
            let path = arch_dir.join(name);
            if !path.is_file() {
                return Err(Error::MissingFile { path });
            }
            fs::remove_file(&path)?;
            info!("removed {}", path.display());
        }
        Ok(())
    }

    fn diff(
        &self,
        arch: &str,
        src_dir: &Path,
        src_tag: &str,
        dest_dir: &Path,
        dest_tag: &str,
    ) -> Result<TagDiff> {
        self.require_arch(arch)?;
        let mut counts: BTreeMap<String, i64> = BTreeMap::new();
        for file in Self::tree_files(&dest_dir.join(arch))? {
            *counts.entry(file).or_insert(0) += 1;
        }
        for file in Self::tree_files(&src_dir.join(arch))? {
            *counts.entry(file).or_insert(0) -= 1;
        }

        Ok(TagDiff {
            src_tag: src_tag.to_string(),
            dest_tag: dest_tag.to_string(),
            src_only: counts
                .iter()
                .filter(|(_, n)| **n < 0)
                .map(|(name, _)| name.clone())
                .collect(),
            dest_only: counts
                .iter()
                .filter(|(_, n)| **n > 0)
                .map(|(name, _)| name.clone())
                .collect(),
        })
    }
}
