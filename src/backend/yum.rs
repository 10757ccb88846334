// src/backend/yum.rs

//! Yum backend
//!
//! Mirrors repositories in the repodata format: `repomd.xml` is always
//! re-downloaded (it is the root of trust for everything else), its child
//! metadata files are fetched when the local copy fails validation, and
//! the parsed primary document drives package planning. The first upstream
//! URL that serves a complete set of metadata is pinned for the rest of
//! the run; until something succeeds, failures move on to the next URL in
//! the configured failover order.
//!
//! Local (url-less) repos are maintained with the external `createrepo`
//! tool: `init`, `add_file`, and `del_file` all end by regenerating the
//! arch's repodata.

use super::repodata::{self, MetadataFile};
use super::{
    download_packages, join_url, sanitize_href, ActionOptions, Backend, BackendContext, Package,
    TagDiff,
};
use crate::config::{RepoConfig, RepoKind};
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::validate::validate_file;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const REPOMD_REL: &str = "repodata/repomd.xml";

pub struct YumBackend {
    repo: RepoConfig,
    head_dir: PathBuf,
    opts: ActionOptions,
    /// Index into `repo.urls` of the first upstream that served complete
    /// metadata this run.
    ok_url: Option<usize>,
}

impl YumBackend {
    pub fn create(ctx: BackendContext) -> Box<dyn Backend> {
        Box::new(Self {
            repo: ctx.repo,
            head_dir: ctx.head_dir,
            opts: ctx.opts,
            ok_url: None,
        })
    }

    /// Architectures this action covers: the one selected with `--arch`
    /// (which must be configured), or all configured ones.
    fn arches(&self) -> Result<Vec<String>> {
        match &self.opts.arch {
            Some(arch) => {
                if self.repo.arch.iter().any(|a| a == arch) {
                    Ok(vec![arch.clone()])
                } else {
                    Err(Error::ArchNotConfigured {
                        repo: self.repo.name.clone(),
                        arch: arch.clone(),
                    })
                }
            }
            None => Ok(self.repo.arch.clone()),
        }
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

    fn require_local_only(&self, what: &str) -> Result<()> {
        if self.repo.is_mirrored() {
            Err(Error::OperationNotValid(format!(
                "{what} is only valid for local repos, and '{}' mirrors an upstream",
                self.repo.name
            )))
        } else {
            Ok(())
        }
    }

    /// Upstream base URLs to try for one arch, in failover order, narrowed
    /// to the pinned URL once one has succeeded.
    fn candidate_urls(&self, arch: &str) -> Vec<(usize, String)> {
        let expanded = self.repo.urls_for_arch(arch);
        match self.ok_url {
            Some(index) => vec![(index, expanded[index].clone())],
            None => expanded.into_iter().enumerate().collect(),
        }
    }

    /// Refresh metadata for one arch, with URL failover, and return the
    /// planned package list.
    fn get_metadata(&mut self, fetcher: &Fetcher, arch: &str) -> Result<Vec<Package>> {
        let mut last_err = None;
        for (index, base) in self.candidate_urls(arch) {
            match self.fetch_metadata_from(fetcher, arch, &base) {
                Ok(packages) => {
                    self.ok_url = Some(index);
                    return Ok(packages);
                }
                Err(e) => {
                    warn!("metadata for {}/{arch} from {base}: {e}", self.repo.name);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            Error::OperationNotValid(format!("repo '{}' has no upstream urls", self.repo.name))
        }))
    }

    fn fetch_metadata_from(
        &self,
        fetcher: &Fetcher,
        arch: &str,
        base: &str,
    ) -> Result<Vec<Package>> {
        let arch_dir = self.head_dir.join(arch);
        fs::create_dir_all(arch_dir.join("repodata"))?;

        // Never short-circuit repomd.xml against the local copy: it is
        // what says whether anything else changed.
        let repomd_path = arch_dir.join(REPOMD_REL);
        fetcher.download_binary_file(&join_url(base, REPOMD_REL), &repomd_path, None)?;

        let files = repodata::parse_repomd(&repomd_path)?;
        let mut primary_path = None;

        for file in &files {
            let local = arch_dir.join(sanitize_href(&file.href)?);
            let check = file.validate_check(self.opts.checksums)?;

            if !validate_file(&local, &check) {
                if let Some(parent) = local.parent() {
                    fs::create_dir_all(parent)?;
                }
                fetcher.download_binary_file(&join_url(base, &file.href), &local, None)?;
                if !validate_file(&local, &check) {
                    return Err(Error::Validation {
                        path: local,
                        reason: format!("'{}' metadata does not match repomd.xml", file.kind),
                    });
                }
            }

            if file.kind == "primary" {
                primary_path = Some(local);
            }
        }

        let primary_path = primary_path.ok_or_else(|| {
            Error::Parse(format!(
                "{}: repomd.xml lists no primary metadata",
                repomd_path.display()
            ))
        })?;
        repodata::parse_primary(&primary_path)
    }

    /// Parse what is on disk under one arch directory; no network.
    fn read_metadata(&self, arch_dir: &Path) -> Result<(Vec<MetadataFile>, Vec<Package>)> {
        let files = repodata::parse_repomd(&arch_dir.join(REPOMD_REL))?;
        let primary = files
            .iter()
            .find(|f| f.kind == "primary")
            .ok_or_else(|| {
                Error::Parse(format!(
                    "{}: repomd.xml lists no primary metadata",
                    arch_dir.display()
                ))
            })?;
        let packages = repodata::parse_primary(&arch_dir.join(sanitize_href(&primary.href)?))?;
        Ok((files, packages))
    }

    fn mirror_arch(&mut self, fetcher: &Fetcher, arch: &str) -> Result<()> {
        info!("mirroring {}/{arch}", self.repo.name);
        let packages = self.get_metadata(fetcher, arch)?;

        let index = self.ok_url.expect("get_metadata pins a url on success");
        let base = self.repo.urls_for_arch(arch)[index].clone();

        download_packages(
            fetcher,
            &base,
            &self.head_dir.join(arch),
            &packages,
            self.repo.filter.as_ref(),
            &self.opts,
        )?;
        Ok(())
    }

    /// Regenerate one arch's repodata with the external createrepo tool.
    fn init_arch(&self, arch: &str) -> Result<()> {
        let arch_dir = self.head_dir.join(arch);
        fs::create_dir_all(arch_dir.join("Packages"))?;

        // Reuse digests from an earlier run unless a rebuild was forced.
        let update = arch_dir.join(REPOMD_REL).exists() && !self.opts.force;

        let mut cmd = Command::new("createrepo");
        cmd.arg("--basedir")
            .arg(&arch_dir)
            .arg("--outputdir")
            .arg(&arch_dir);
        if update {
            cmd.arg("--update");
        }
        cmd.arg(&arch_dir);

        debug!("running {:?}", cmd);
        let output = cmd.output().map_err(|e| Error::Subprocess {
            command: "createrepo".to_string(),
            status: "failed to start".to_string(),
            stderr: e.to_string(),
        })?;

        if !output.status.success() {
            return Err(Error::Subprocess {
                command: "createrepo".to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        info!("regenerated metadata for {}/{arch}", self.repo.name);
        Ok(())
    }
}

impl Backend for YumBackend {
    fn kind(&self) -> RepoKind {
        RepoKind::Yum
    }

    fn mirror(&mut self) -> Result<()> {
        if !self.repo.is_mirrored() {
            return Err(Error::OperationNotValid(format!(
                "repo '{}' has no url to mirror from",
                self.repo.name
            )));
        }

        let fetcher = Fetcher::new(self.repo.proxy.as_deref(), self.repo.ssl.as_ref())?;
        for arch in self.arches()? {
            match self.mirror_arch(&fetcher, &arch) {
                Ok(()) => {}
                Err(e) if self.opts.ignore_errors => {
                    debug!("skipping {}/{arch}: {e}", self.repo.name);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn clean(&self) -> Result<()> {
        for arch in self.arches()? {
            let arch_dir = self.head_dir.join(&arch);
            if !arch_dir.is_dir() {
                warn!("{}: nothing to clean", arch_dir.display());
                continue;
            }

            let referenced = match self.read_metadata(&arch_dir) {
                Ok((files, packages)) => {
                    let mut set = HashSet::new();
                    set.insert(PathBuf::from(REPOMD_REL));
                    for file in &files {
                        set.insert(sanitize_href(&file.href)?);
                    }
                    for package in &packages {
                        set.insert(sanitize_href(&package.location)?);
                    }
                    set
                }
                Err(e) if self.opts.force => {
                    // Forced clean of a repo with broken metadata keeps
                    // only the root document.
                    warn!("{}: metadata unreadable ({e}), forced clean", arch_dir.display());
                    HashSet::from([PathBuf::from(REPOMD_REL)])
                }
                Err(e) => return Err(e),
            };

            let mut removed = 0usize;
            for entry in WalkDir::new(&arch_dir) {
                let entry =
                    entry.map_err(|e| Error::Parse(format!("walk {}: {e}", arch_dir.display())))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = entry
                    .path()
                    .strip_prefix(&arch_dir)
                    .expect("walkdir yields children of arch_dir");
                if !referenced.contains(rel) {
                    fs::remove_file(entry.path())?;
                    removed += 1;
                    debug!("removed {}", rel.display());
                }
            }
            info!("cleaned {removed} files under {}", arch_dir.display());
        }
        Ok(())
    }

    fn init(&self, arch: Option<&str>) -> Result<()> {
        self.require_local_only("init")?;
        match arch {
            Some(arch) => {
                self.require_arch(arch)?;
                self.init_arch(arch)
            }
            None => {
                for arch in &self.repo.arch {
                    self.init_arch(arch)?;
                }
                Ok(())
            }
        }
    }

    fn add_file(&self, arch: &str, files: &[PathBuf]) -> Result<()> {
        self.require_arch(arch)?;
        self.require_local_only("add-file")?;

        let packages_dir = self.head_dir.join(arch).join("Packages");
        fs::create_dir_all(&packages_dir)?;

        for file in files {
            if !file.is_file() {
                return Err(Error::MissingFile { path: file.clone() });
            }
            let name = file
                .file_name()
                .ok_or_else(|| Error::OperationNotValid(format!(
                    "cannot add '{}': no file name",
                    file.display()
                )))?;
            let dest = packages_dir.join(name);
            if dest.exists() && !self.opts.force {
                return Err(Error::OperationNotValid(format!(
                    "{} already exists (use force to overwrite)",
                    dest.display()
                )));
            }
            fs::copy(file, &dest)?;
            info!("added {}", dest.display());
        }
        self.init_arch(arch)
    }

    fn del_file(&self, arch: &str, files: &[String]) -> Result<()> {
        self.require_arch(arch)?;
        self.require_local_only("del-file")?;

        let packages_dir = self.head_dir.join(arch).join("Packages");
        for name in files {
            let path = packages_dir.join(name);
            if !path.is_file() {
                return Err(Error::MissingFile { path });
            }
            fs::remove_file(&path)?;
            info!("removed {}", path.display());
        }
        self.init_arch(arch)
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
        let (_, src_packages) = self.read_metadata(&src_dir.join(arch))?;
        let (_, dest_packages) = self.read_metadata(&dest_dir.join(arch))?;

        // Multiset difference over rpm basenames: negative counts are
        // src-only, positive dest-only.
        let mut counts: BTreeMap<&str, i64> = BTreeMap::new();
        for package in &dest_packages {
            let basename = package.basename();
            if basename.ends_with(".rpm") {
                *counts.entry(basename).or_insert(0) += 1;
            }
        }
        for package in &src_packages {
            let basename = package.basename();
            if basename.ends_with(".rpm") {
                *counts.entry(basename).or_insert(0) -= 1;
            }
        }

        let src_only = counts
            .iter()
            .filter(|(_, n)| **n < 0)
            .map(|(name, _)| name.to_string())
            .collect();
        let dest_only = counts
            .iter()
            .filter(|(_, n)| **n > 0)
            .map(|(name, _)| name.to_string())
            .collect();

        Ok(TagDiff {
            src_tag: src_tag.to_string(),
            dest_tag: dest_tag.to_string(),
            src_only,
            dest_only,
        })
    }
}
