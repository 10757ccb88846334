// src/backend/mod.rs

//! Backend plugin interface
//!
//! Every repository type implements [`Backend`]; the orchestrator
//! dispatches through an explicit constructor registry keyed by
//! [`RepoKind`], so the set of backends is auditable at build time.
//! Shared plumbing for the download-planning pipeline (package records,
//! URL joining, href sanitization, the plan/validate/fetch loop) lives
//! here so Yum and Apt stay in lockstep.

mod apt;
mod plain;
mod repodata;
mod yum;

pub use apt::AptBackend;
pub use plain::PlainBackend;
pub use yum::YumBackend;

use crate::config::{PackageFilter, RepoConfig, RepoKind};
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::tag::TagRequest;
use crate::validate::{validate_file, Check, DigestAlgorithm};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Options shared by every action invocation.
#[derive(Debug, Clone, Default)]
pub struct ActionOptions {
    /// Restrict the action to one architecture.
    pub arch: Option<String>,
    /// Validate by digest even when a size is available.
    pub checksums: bool,
    pub force: bool,
    pub ignore_errors: bool,
}

/// Everything a backend needs to operate on one repository.
pub struct BackendContext {
    pub repo: RepoConfig,
    /// The head-tag directory of the repo.
    pub head_dir: PathBuf,
    pub opts: ActionOptions,
}

/// Result of a metadata diff between two tags of one repo.
#[derive(Debug, PartialEq, Eq)]
pub struct TagDiff {
    pub src_tag: String,
    pub dest_tag: String,
    /// Basenames referenced only on the source side, sorted.
    pub src_only: Vec<String>,
    /// Basenames referenced only on the destination side, sorted.
    pub dest_only: Vec<String>,
}

/// Uniform operation surface across repository types.
pub trait Backend {
    /// Self-identification, matched against the configured repo type.
    fn kind(&self) -> RepoKind;

    /// Update the repo's head tag from its upstream URLs.
    fn mirror(&mut self) -> Result<()>;

    /// Remove on-disk files not referenced by current metadata.
    fn clean(&self) -> Result<()>;

    /// Generate fresh metadata for a local (non-mirrored) repo.
    fn init(&self, arch: Option<&str>) -> Result<()>;

    /// Copy external files into the arch's package directory and
    /// regenerate its metadata.
    fn add_file(&self, arch: &str, files: &[PathBuf]) -> Result<()>;

    /// Remove named files and regenerate metadata.
    fn del_file(&self, arch: &str, files: &[String]) -> Result<()>;

    /// Metadata-level symmetric difference between two tag directories.
    fn diff(
        &self,
        arch: &str,
        src_dir: &Path,
        src_tag: &str,
        dest_dir: &Path,
        dest_tag: &str,
    ) -> Result<TagDiff>;

    /// Build a destination tag from a source tag. Tree mechanics are
    /// identical across backends.
    fn tag(&self, request: &TagRequest) -> Result<()> {
        crate::tag::create_tag(request)
    }

    /// Idempotent directory creation.
    fn make_dir(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        Ok(())
    }
}

type Constructor = fn(BackendContext) -> Box<dyn Backend>;

/// The full set of backends, keyed by the type they announce.
const REGISTRY: &[(RepoKind, Constructor)] = &[
    (RepoKind::Yum, YumBackend::create),
    (RepoKind::Apt, AptBackend::create),
    (RepoKind::Plain, PlainBackend::create),
];

/// Select the backend whose kind matches the repo's configured type.
pub fn create_backend(ctx: BackendContext) -> Result<Box<dyn Backend>> {
    let kind = ctx.repo.kind;
    for (registered, constructor) in REGISTRY {
        if *registered == kind {
            return Ok(constructor(ctx));
        }
    }
    Err(Error::PluginNotFound(kind.to_string()))
}

// ---------------------------------------------------------------------------
// Shared download-planning pipeline
// ---------------------------------------------------------------------------

/// One upstream package as planned from parsed metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub name: String,
    /// Path relative to the repository base URL and to the arch directory.
    pub location: String,
    pub size: Option<u64>,
    pub checksum: Option<(DigestAlgorithm, String)>,
}

impl Package {
    pub fn basename(&self) -> &str {
        self.location.rsplit('/').next().unwrap_or(&self.location)
    }

    /// The predicate deciding whether the local copy is up to date: the
    /// size when checksums are off and a size is known, else the digest.
    /// Metadata carrying neither is unusable.
    pub fn validate_check(&self, checksums: bool) -> Result<Check> {
        match (&self.size, &self.checksum) {
            (Some(size), _) if !checksums => Ok(Check::Size(*size)),
            (_, Some((algorithm, value))) => Ok(Check::Digest {
                algorithm: *algorithm,
                value: value.clone(),
            }),
            (Some(size), None) => Ok(Check::Size(*size)),
            (None, None) => Err(Error::Parse(format!(
                "package '{}' has neither size nor checksum",
                self.name
            ))),
        }
    }
}

/// Join a base URL and a relative path without doubling slashes.
pub(crate) fn join_url(base: &str, rel: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), rel.trim_start_matches('/'))
}

/// Constrain a metadata-supplied href to a relative path below the arch
/// directory. Upstream metadata is untrusted input.
pub(crate) fn sanitize_href(href: &str) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(href.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => {
                return Err(Error::Parse(format!(
                    "refusing metadata path '{href}' escaping the repository"
                )))
            }
        }
    }
    if out.as_os_str().is_empty() {
        return Err(Error::Parse(format!("empty metadata path '{href}'")));
    }
    Ok(out)
}

/// Download every planned package that is missing or stale.
///
/// Returns the number fetched. Per-package failures are suppressed when
/// `ignore_errors` is set; otherwise the first failure aborts.
pub(crate) fn download_packages(
    fetcher: &Fetcher,
    base_url: &str,
    arch_dir: &Path,
    packages: &[Package],
    filter: Option<&PackageFilter>,
    opts: &ActionOptions,
) -> Result<usize> {
    let bar = ProgressBar::new(packages.len() as u64).with_style(
        ProgressStyle::with_template("{msg:30} {bar:40} {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut fetched = 0;
    for package in packages {
        bar.inc(1);
        if let Some(filter) = filter {
            if !filter.keeps(&package.name, package.basename()) {
                debug!("filtered out {}", package.basename());
                continue;
            }
        }

        let check = package.validate_check(opts.checksums)?;
        let dest = arch_dir.join(sanitize_href(&package.location)?);
        if validate_file(&dest, &check) {
            continue;
        }

        bar.set_message(package.basename().to_string());
        match fetch_one(fetcher, base_url, package, &dest, &check) {
            Ok(()) => fetched += 1,
            Err(e) if opts.ignore_errors => {
                debug!("skipping {}: {e}", package.basename());
            }
            Err(e) => {
                bar.abandon();
                return Err(e);
            }
        }
    }
    bar.finish_and_clear();

    info!(
        "{} of {} packages fetched into {}",
        fetched,
        packages.len(),
        arch_dir.display()
    );
    Ok(fetched)
}

fn fetch_one(
    fetcher: &Fetcher,
    base_url: &str,
    package: &Package,
    dest: &Path,
    check: &Check,
) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fetcher.download_binary_file(&join_url(base_url, &package.location), dest, None)?;

    // A failed check here leaves the file for the next run to re-validate
    // and re-fetch; there is no in-run retry.
    if !validate_file(dest, check) {
        return Err(Error::Validation {
            path: dest.to_path_buf(),
            reason: "contents do not match upstream metadata".to_string(),
        });
    }
    Ok(())
}
