// src/backend/apt.rs

//! Apt backend
//!
//! Mirrors flat Debian-style repositories: a `Release` file at the base
//! URL carries checksum/size tables (`SHA256:`, `SHA1:`, `MD5Sum:`) over
//! the index files, and `Packages`/`Packages.gz` lists every package as an
//! RFC-822 stanza with `Filename`, `Size`, and digest fields. `Release` is
//! the root of trust and is always re-downloaded; everything downstream
//! follows the same plan/validate/fetch pipeline as the Yum backend,
//! including URL failover, pinning, filters, and `ignore_errors`.
//!
//! There is no metadata generator to shell out to, so the local-repo
//! operations (`init`, `add_file`, `del_file`) are not valid for Apt.

use super::{
    download_packages, join_url, sanitize_href, ActionOptions, Backend, BackendContext, Package,
    TagDiff,
};
use crate::config::{RepoConfig, RepoKind};
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::validate::{validate_file, Check, DigestAlgorithm};
use flate2::read::GzDecoder;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const RELEASE: &str = "Release";

/// One file listed in a `Release` checksum table.
#[derive(Debug, Clone)]
struct ReleaseEntry {
    path: String,
    size: u64,
    checksum: (DigestAlgorithm, String),
}

impl ReleaseEntry {
    fn validate_check(&self, checksums: bool) -> Check {
        if checksums {
            Check::Digest {
                algorithm: self.checksum.0,
                value: self.checksum.1.clone(),
            }
        } else {
            Check::Size(self.size)
        }
    }
}

pub struct AptBackend {
    repo: RepoConfig,
    head_dir: PathBuf,
    opts: ActionOptions,
    ok_url: Option<usize>,
}

impl AptBackend {
    pub fn create(ctx: BackendContext) -> Box<dyn Backend> {
        Box::new(Self {
            repo: ctx.repo,
            head_dir: ctx.head_dir,
            opts: ctx.opts,
            ok_url: None,
        })
    }

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

    fn candidate_urls(&self, arch: &str) -> Vec<(usize, String)> {
        let expanded = self.repo.urls_for_arch(arch);
        match self.ok_url {
            Some(index) => vec![(index, expanded[index].clone())],
            None => expanded.into_iter().enumerate().collect(),
        }
    }

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
        fs::create_dir_all(&arch_dir)?;

        let release_path = arch_dir.join(RELEASE);
        fetcher.download_binary_file(&join_url(base, RELEASE), &release_path, None)?;

        let entries = parse_release(&release_path)?;
        for entry in &entries {
            let local = arch_dir.join(sanitize_href(&entry.path)?);
            let check = entry.validate_check(self.opts.checksums);
            if !validate_file(&local, &check) {
                if let Some(parent) = local.parent() {
                    fs::create_dir_all(parent)?;
                }
                fetcher.download_binary_file(&join_url(base, &entry.path), &local, None)?;
                if !validate_file(&local, &check) {
                    return Err(Error::Validation {
                        path: local,
                        reason: "index does not match Release".to_string(),
                    });
                }
            }
        }

        let index = packages_index(&entries).ok_or_else(|| {
            Error::Parse(format!(
                "{}: Release lists no Packages index",
                release_path.display()
            ))
        })?;
        parse_packages(&arch_dir.join(sanitize_href(&index.path)?))
    }

    fn read_metadata(&self, arch_dir: &Path) -> Result<(Vec<ReleaseEntry>, Vec<Package>)> {
        let entries = parse_release(&arch_dir.join(RELEASE))?;
        let index = packages_index(&entries).ok_or_else(|| {
            Error::Parse(format!("{}: Release lists no Packages index", arch_dir.display()))
        })?;
        let packages = parse_packages(&arch_dir.join(sanitize_href(&index.path)?))?;
        Ok((entries, packages))
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

    fn not_supported(&self, what: &str) -> Error {
        Error::OperationNotValid(format!(
            "{what} is not supported for apt repos ('{}')",
            self.repo.name
        ))
    }
}

impl Backend for AptBackend {
    fn kind(&self) -> RepoKind {
        RepoKind::Apt
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

            let (entries, packages) = self.read_metadata(&arch_dir)?;
            let mut referenced = HashSet::new();
            referenced.insert(PathBuf::from(RELEASE));
            for entry in &entries {
                referenced.insert(sanitize_href(&entry.path)?);
            }
            for package in &packages {
                referenced.insert(sanitize_href(&package.location)?);
            }

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

    fn init(&self, _arch: Option<&str>) -> Result<()> {
        Err(self.not_supported("init"))
    }

    fn add_file(&self, _arch: &str, _files: &[PathBuf]) -> Result<()> {
        Err(self.not_supported("add-file"))
    }

    fn del_file(&self, _arch: &str, _files: &[String]) -> Result<()> {
        Err(self.not_supported("del-file"))
    }

    fn diff(
        &self,
        arch: &str,
        src_dir: &Path,
        src_tag: &str,
        dest_dir: &Path,
        dest_tag: &str,
    ) -> Result<TagDiff> {
        let (_, src_packages) = self.read_metadata(&src_dir.join(arch))?;
        let (_, dest_packages) = self.read_metadata(&dest_dir.join(arch))?;

        let mut counts: BTreeMap<&str, i64> = BTreeMap::new();
        for package in &dest_packages {
            let basename = package.basename();
            if basename.ends_with(".deb") {
                *counts.entry(basename).or_insert(0) += 1;
            }
        }
        for package in &src_packages {
            let basename = package.basename();
            if basename.ends_with(".deb") {
                *counts.entry(basename).or_insert(0) -= 1;
            }
        }

        Ok(TagDiff {
            src_tag: src_tag.to_string(),
            dest_tag: dest_tag.to_string(),
            src_only: counts
                .iter()
                .filter(|(_, n)| **n < 0)
                .map(|(name, _)| name.to_string())
                .collect(),
            dest_only: counts
                .iter()
                .filter(|(_, n)| **n > 0)
                .map(|(name, _)| name.to_string())
                .collect(),
        })
    }
}

// ---------------------------------------------------------------------------
// Release / Packages parsing
// ---------------------------------------------------------------------------

/// Prefer the compressed index when the Release lists both.
fn packages_index(entries: &[ReleaseEntry]) -> Option<&ReleaseEntry> {
    entries
        .iter()
        .find(|e| e.path == "Packages.gz")
        .or_else(|| entries.iter().find(|e| e.path == "Packages"))
}

/// Parse the checksum tables of a `Release` file.
///
/// Tables for different algorithms list the same paths; the strongest
/// algorithm wins for each file.
fn parse_release(path: &Path) -> Result<Vec<ReleaseEntry>> {
    let text = fs::read_to_string(path)
        .map_err(|e| Error::Parse(format!("cannot read {}: {e}", path.display())))?;
    parse_release_str(&text).map_err(|e| Error::Parse(format!("{}: {e}", path.display())))
}

fn parse_release_str(text: &str) -> Result<Vec<ReleaseEntry>> {
    let mut current: Option<DigestAlgorithm> = None;
    let mut by_path: HashMap<String, ReleaseEntry> = HashMap::new();

    for line in text.lines() {
        if !line.starts_with(' ') {
            current = match line.trim_end_matches(':') {
                "MD5Sum" => Some(DigestAlgorithm::Md5),
                "SHA1" => Some(DigestAlgorithm::Sha1),
                "SHA256" => Some(DigestAlgorithm::Sha256),
                "SHA512" => Some(DigestAlgorithm::Sha512),
                _ => None,
            };
            continue;
        }
        let Some(algorithm) = current else { continue };

        let mut fields = line.split_whitespace();
        let (Some(hex), Some(size), Some(rel)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(Error::Parse(format!("malformed Release line '{line}'")));
        };
        let size: u64 = size
            .parse()
            .map_err(|_| Error::Parse(format!("bad size in Release line '{line}'")))?;

        let entry = ReleaseEntry {
            path: rel.to_string(),
            size,
            checksum: (algorithm, hex.to_string()),
        };
        match by_path.get(rel) {
            Some(existing) if strength(existing.checksum.0) >= strength(algorithm) => {}
            _ => {
                by_path.insert(rel.to_string(), entry);
            }
        }
    }

    let mut entries: Vec<ReleaseEntry> = by_path.into_values().collect();
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

fn strength(algorithm: DigestAlgorithm) -> u8 {
    match algorithm {
        DigestAlgorithm::Md5 => 0,
        DigestAlgorithm::Sha1 => 1,
        DigestAlgorithm::Sha256 => 2,
        DigestAlgorithm::Sha512 => 3,
    }
}

/// Parse a `Packages` index (optionally gzipped) into package records
/// sorted by name.
fn parse_packages(path: &Path) -> Result<Vec<Package>> {
    let mut file = File::open(path)
        .map_err(|e| Error::Parse(format!("cannot read {}: {e}", path.display())))?;

    let mut text = String::new();
    let mut magic = [0u8; 2];
    let gzipped = file.read(&mut magic)? == 2 && magic == [0x1f, 0x8b];
    let file = File::open(path)?;
    if gzipped {
        GzDecoder::new(file)
            .read_to_string(&mut text)
            .map_err(|e| Error::Parse(format!("cannot ungzip {}: {e}", path.display())))?;
    } else {
        let mut file = file;
        file.read_to_string(&mut text)?;
    }

    parse_packages_str(&text).map_err(|e| Error::Parse(format!("{}: {e}", path.display())))
}

fn parse_packages_str(text: &str) -> Result<Vec<Package>> {
    let mut packages = Vec::new();

    for stanza in text.split("\n\n").filter(|s| !s.trim().is_empty()) {
        let mut name = None;
        let mut filename = None;
        let mut size = None;
        let mut digests: Vec<(DigestAlgorithm, String)> = Vec::new();

        for line in stanza.lines() {
            // Continuation lines (long descriptions) carry no fields.
            if line.starts_with(' ') || line.starts_with('\t') {
                continue;
            }
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match field {
                "Package" => name = Some(value.to_string()),
                "Filename" => filename = Some(value.to_string()),
                "Size" => {
                    size = Some(value.parse::<u64>().map_err(|_| {
                        Error::Parse(format!("bad Size '{value}'"))
                    })?)
                }
                "MD5sum" => digests.push((DigestAlgorithm::Md5, value.to_string())),
                "SHA1" => digests.push((DigestAlgorithm::Sha1, value.to_string())),
                "SHA256" => digests.push((DigestAlgorithm::Sha256, value.to_string())),
                "SHA512" => digests.push((DigestAlgorithm::Sha512, value.to_string())),
                _ => {}
            }
        }

        let name = name.ok_or_else(|| Error::Parse("stanza without Package field".into()))?;
        let filename = filename
            .ok_or_else(|| Error::Parse(format!("package '{name}' has no Filename")))?;
        digests.sort_by_key(|(algorithm, _)| std::cmp::Reverse(strength(*algorithm)));

        packages.push(Package {
            name,
            location: filename,
            size,
            checksum: digests.into_iter().next(),
        });
    }

    packages.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(packages)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RELEASE_TEXT: &str = "Origin: example\n\
Label: example\n\
MD5Sum:\n\
 0123456789abcdef0123456789abcdef 900 Packages\n\
 fedcba9876543210fedcba9876543210 450 Packages.gz\n\
SHA256:\n\
 aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa 900 Packages\n\
 bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb 450 Packages.gz\n";

    const PACKAGES_TEXT: &str = "Package: zsh\n\
Version: 5.9-4\n\
Architecture: amd64\n\
Filename: pool/z/zsh_5.9-4_amd64.deb\n\
Size: 123\n\
SHA256: cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc\n\
Description: shell\n then some more words\n\
\n\
Package: bash\n\
Version: 5.2-1\n\
Architecture: amd64\n\
Filename: pool/b/bash_5.2-1_amd64.deb\n\
Size: 456\n\
MD5sum: 00112233445566778899aabbccddeeff\n";

    #[test]
    fn test_parse_release_prefers_strongest_digest() {
        let entries = parse_release_str(RELEASE_TEXT).unwrap();
        assert_eq!(entries.len(), 2);
        let packages = entries.iter().find(|e| e.path == "Packages").unwrap();
        assert_eq!(packages.size, 900);
        assert_eq!(packages.checksum.0, DigestAlgorithm::Sha256);
        assert_eq!(packages.checksum.1, "a".repeat(64));
    }

    #[test]
    fn test_packages_index_prefers_gz() {
        let entries = parse_release_str(RELEASE_TEXT).unwrap();
        assert_eq!(packages_index(&entries).unwrap().path, "Packages.gz");
    }

    #[test]
    fn test_parse_packages_stanzas() {
        let packages = parse_packages_str(PACKAGES_TEXT).unwrap();
        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].name, "bash");
        assert_eq!(packages[0].location, "pool/b/bash_5.2-1_amd64.deb");
        assert_eq!(packages[0].size, Some(456));
        assert_eq!(packages[0].checksum.as_ref().unwrap().0, DigestAlgorithm::Md5);
        assert_eq!(packages[1].checksum.as_ref().unwrap().0, DigestAlgorithm::Sha256);
    }

    #[test]
    fn test_stanza_without_filename_rejected() {
        assert!(parse_packages_str("Package: broken\nSize: 1\n").is_err());
    }
}
