// src/backend/repodata.rs

//! Yum repodata parsing
//!
//! Two documents matter: `repodata/repomd.xml`, the root of trust listing
//! the other metadata files with their checksums and sizes, and the
//! `primary` document it points at, a (usually gzip-compressed) XML file
//! listing every package. Both are deserialized into typed structs; tree
//! parsing is fine at the sizes real repositories ship.

use super::Package;
use crate::error::{Error, Result};
use crate::validate::{Check, DigestAlgorithm};
use flate2::read::GzDecoder;
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// A child metadata file as listed in `repomd.xml`.
#[derive(Debug, Clone)]
pub struct MetadataFile {
    /// Descriptor type: `primary`, `filelists`, `other`, ...
    pub kind: String,
    /// Repo-relative path, as it appears in the document.
    pub href: String,
    pub size: Option<u64>,
    pub checksum: Option<(DigestAlgorithm, String)>,
}

impl MetadataFile {
    /// Validation predicate for the on-disk copy. Size wins when checksums
    /// are off and a size is present; a descriptor with neither record is
    /// unusable.
    pub fn validate_check(&self, checksums: bool) -> Result<Check> {
        match (&self.size, &self.checksum) {
            (Some(size), _) if !checksums => Ok(Check::Size(*size)),
            (_, Some((algorithm, value))) => Ok(Check::Digest {
                algorithm: *algorithm,
                value: value.clone(),
            }),
            (Some(size), None) => Ok(Check::Size(*size)),
            (None, None) => Err(Error::Parse(format!(
                "repomd entry '{}' has neither size nor checksum",
                self.kind
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// repomd.xml
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Repomd {
    #[serde(rename = "data", default)]
    data: Vec<RepomdData>,
}

#[derive(Debug, Deserialize)]
struct RepomdData {
    #[serde(rename = "type")]
    kind: String,
    location: XmlLocation,
    checksum: Option<XmlChecksum>,
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct XmlLocation {
    href: String,
}

#[derive(Debug, Deserialize)]
struct XmlChecksum {
    #[serde(rename = "type")]
    algorithm: String,
    #[serde(rename = "$value")]
    value: String,
}

impl XmlChecksum {
    fn parse(self) -> Result<(DigestAlgorithm, String)> {
        Ok((self.algorithm.parse()?, self.value.trim().to_string()))
    }
}

/// Parse a `repomd.xml` document from disk.
pub fn parse_repomd(path: &Path) -> Result<Vec<MetadataFile>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Parse(format!("cannot read {}: {e}", path.display())))?;
    parse_repomd_str(&text)
        .map_err(|e| Error::Parse(format!("{}: {e}", path.display())))
}

fn parse_repomd_str(text: &str) -> Result<Vec<MetadataFile>> {
    let repomd: Repomd =
        serde_xml_rs::from_str(text).map_err(|e| Error::Parse(e.to_string()))?;

    repomd
        .data
        .into_iter()
        .map(|entry| {
            Ok(MetadataFile {
                kind: entry.kind,
                href: entry.location.href,
                size: entry.size,
                checksum: entry.checksum.map(XmlChecksum::parse).transpose()?,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// primary.xml
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PrimaryMetadata {
    #[serde(rename = "package", default)]
    packages: Vec<PrimaryPackage>,
}

#[derive(Debug, Deserialize)]
struct PrimaryPackage {
    name: String,
    location: XmlLocation,
    checksum: Option<XmlChecksum>,
    size: Option<PrimarySize>,
}

/// `<size package=".." installed=".." archive=".."/>`; only the on-wire
/// package size matters here.
#[derive(Debug, Deserialize)]
struct PrimarySize {
    package: Option<u64>,
}

/// Parse a primary metadata file, transparently ungzipping `.gz` payloads,
/// into package records sorted by name.
pub fn parse_primary(path: &Path) -> Result<Vec<Package>> {
    let file = File::open(path)
        .map_err(|e| Error::Parse(format!("cannot read {}: {e}", path.display())))?;

    let mut text = String::new();
    if is_gzip(path)? {
        GzDecoder::new(file)
            .read_to_string(&mut text)
            .map_err(|e| Error::Parse(format!("cannot ungzip {}: {e}", path.display())))?;
    } else {
        let mut file = file;
        file.read_to_string(&mut text)
            .map_err(|e| Error::Parse(format!("cannot read {}: {e}", path.display())))?;
    }

    parse_primary_str(&text).map_err(|e| Error::Parse(format!("{}: {e}", path.display())))
}

fn parse_primary_str(text: &str) -> Result<Vec<Package>> {
    let primary: PrimaryMetadata =
        serde_xml_rs::from_str(text).map_err(|e| Error::Parse(e.to_string()))?;

    let mut packages = primary
        .packages
        .into_iter()
        .map(|pkg| {
            Ok(Package {
                name: pkg.name,
                location: pkg.location.href,
                size: pkg.size.and_then(|s| s.package),
                checksum: pkg.checksum.map(XmlChecksum::parse).transpose()?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    packages.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(packages)
}

/// Sniff the gzip magic rather than trusting the extension; mirrors have
/// been seen serving plain XML under a `.gz` name.
fn is_gzip(path: &Path) -> Result<bool> {
    let mut magic = [0u8; 2];
    let mut file = File::open(path)?;
    match file.read(&mut magic)? {
        2 => Ok(magic == [0x1f, 0x8b]),
        _ => Ok(false),
    }
}
