// src/config.rs

//! Configuration loading and validation
//!
//! The config file is TOML: a handful of global keys plus one `[repo.NAME]`
//! table per repository. Loading is two-phase: serde deserializes into a
//! raw shape that tolerates scalar-or-sequence values, then validation
//! normalizes everything into an immutable [`Config`]. All mutation (arch
//! promotion, url promotion, proxy inheritance, `data_dir` absolutization)
//! happens here; nothing downstream modifies the config.

use crate::error::{Error, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// The writable tag every mirror updates.
pub const HEAD_TAG: &str = "head";

/// Placeholder expanded per architecture in upstream URLs.
pub const ARCH_TOKEN: &str = "%ARCH%";

/// On-disk layout of tag directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagStyle {
    /// `{data_dir}/{tag}/{local}`
    Topdir,
    /// `{data_dir}/{local}/{tag}`
    Bottomdir,
}

impl FromStr for TagStyle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "topdir" => Ok(Self::Topdir),
            "bottomdir" => Ok(Self::Bottomdir),
            other => Err(Error::Config(format!(
                "tag_style must be 'topdir' or 'bottomdir', got '{other}'"
            ))),
        }
    }
}

/// Repository backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoKind {
    Yum,
    Apt,
    Plain,
}

impl RepoKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Yum => "yum",
            Self::Apt => "apt",
            Self::Plain => "plain",
        }
    }
}

impl fmt::Display for RepoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for RepoKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "yum" => Ok(Self::Yum),
            "apt" => Ok(Self::Apt),
            "plain" => Ok(Self::Plain),
            other => Err(Error::Config(format!(
                "unknown repository type '{other}' (expected yum, apt, or plain)"
            ))),
        }
    }
}

/// Mutual-TLS client credentials, present as a full trio or not at all.
#[derive(Debug, Clone)]
pub struct SslClientAuth {
    pub ca: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Package filter applied during download planning. At most one per repo.
#[derive(Debug, Clone)]
pub enum PackageFilter {
    IncludeFilename(Regex),
    IncludePackage(Regex),
    ExcludeFilename(Regex),
    ExcludePackage(Regex),
}

impl PackageFilter {
    /// Whether a package with the given name and location basename survives
    /// the filter.
    pub fn keeps(&self, name: &str, basename: &str) -> bool {
        match self {
            Self::IncludeFilename(re) => re.is_match(basename),
            Self::IncludePackage(re) => re.is_match(name),
            Self::ExcludeFilename(re) => !re.is_match(basename),
            Self::ExcludePackage(re) => !re.is_match(name),
        }
    }
}

/// A single validated repository entry.
#[derive(Debug, Clone)]
pub struct RepoConfig {
    pub name: String,
    pub kind: RepoKind,
    /// Relative path segment under `data_dir` (or under the tag directory,
    /// depending on layout).
    pub local: String,
    /// Non-empty, in configured order.
    pub arch: Vec<String>,
    /// Upstream URLs in failover order; empty means local-only.
    pub urls: Vec<String>,
    pub ssl: Option<SslClientAuth>,
    pub filter: Option<PackageFilter>,
    pub proxy: Option<String>,
    /// Per-repo override of the global hard-tag regex.
    pub hard_tag_regex: Option<Regex>,
}

impl RepoConfig {
    /// Whether this repo mirrors an upstream (has at least one URL).
    pub fn is_mirrored(&self) -> bool {
        !self.urls.is_empty()
    }

    /// Expand the `%ARCH%` token for one architecture across all URLs,
    /// preserving failover order.
    pub fn urls_for_arch(&self, arch: &str) -> Vec<String> {
        self.urls
            .iter()
            .map(|u| u.replace(ARCH_TOKEN, arch))
            .collect()
    }
}

/// Validated process-wide configuration. Immutable after [`Config::load`].
#[derive(Debug)]
pub struct Config {
    pub data_dir: PathBuf,
    pub tag_style: TagStyle,
    pub hard_tag_regex: Option<Regex>,
    /// Sorted by name; iteration order is the fan-out order.
    pub repos: BTreeMap<String, RepoConfig>,
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Config> {
        let raw: RawConfig =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        validate(raw)
    }

    pub fn repo(&self, name: &str) -> Result<&RepoConfig> {
        self.repos
            .get(name)
            .ok_or_else(|| Error::Config(format!("no such repository '{name}'")))
    }

    /// Effective hard-tag regex for a repo: the repo's own override, else
    /// the global one.
    pub fn hard_tag_regex_for<'a>(&'a self, repo: &'a RepoConfig) -> Option<&'a Regex> {
        repo.hard_tag_regex.as_ref().or(self.hard_tag_regex.as_ref())
    }
}

// ---------------------------------------------------------------------------
// Raw shapes
// ---------------------------------------------------------------------------

/// A value that may be written as a scalar or a sequence in TOML.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    data_dir: PathBuf,
    #[serde(default = "default_tag_style")]
    tag_style: String,
    proxy: Option<String>,
    hard_tag_regex: Option<String>,
    #[serde(default)]
    repo: BTreeMap<String, RawRepo>,
}

fn default_tag_style() -> String {
    "topdir".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRepo {
    #[serde(rename = "type")]
    kind: String,
    local: String,
    arch: OneOrMany,
    url: Option<OneOrMany>,
    ca: Option<PathBuf>,
    cert: Option<PathBuf>,
    key: Option<PathBuf>,
    include_filename: Option<String>,
    include_package: Option<String>,
    exclude_filename: Option<String>,
    exclude_package: Option<String>,
    proxy: Option<String>,
    hard_tag_regex: Option<String>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(raw: RawConfig) -> Result<Config> {
    let data_dir = if raw.data_dir.is_absolute() {
        raw.data_dir
    } else {
        std::env::current_dir()?.join(raw.data_dir)
    };
    if !data_dir.is_dir() {
        return Err(Error::Config(format!(
            "data_dir {} does not exist or is not a directory",
            data_dir.display()
        )));
    }

    let tag_style = raw.tag_style.parse()?;

    let hard_tag_regex = raw
        .hard_tag_regex
        .as_deref()
        .map(|p| compile_regex("hard_tag_regex", p))
        .transpose()?;

    let mut repos = BTreeMap::new();
    for (name, entry) in raw.repo {
        let repo = validate_repo(&name, entry, raw.proxy.as_deref())?;
        repos.insert(name, repo);
    }

    Ok(Config {
        data_dir,
        tag_style,
        hard_tag_regex,
        repos,
    })
}

fn validate_repo(name: &str, raw: RawRepo, global_proxy: Option<&str>) -> Result<RepoConfig> {
    let kind: RepoKind = raw
        .kind
        .parse()
        .map_err(|e| Error::Config(format!("repo '{name}': {e}")))?;

    let arch = raw.arch.into_vec();
    if arch.is_empty() {
        return Err(Error::Config(format!(
            "repo '{name}': arch must list at least one architecture"
        )));
    }

    let urls = raw.url.map(OneOrMany::into_vec).unwrap_or_default();

    let ssl = validate_ssl(name, &urls, raw.ca, raw.cert, raw.key)?;
    let filter = validate_filter(
        name,
        raw.include_filename,
        raw.include_package,
        raw.exclude_filename,
        raw.exclude_package,
    )?;

    let hard_tag_regex = raw
        .hard_tag_regex
        .as_deref()
        .map(|p| compile_regex(&format!("repo '{name}' hard_tag_regex"), p))
        .transpose()?;

    Ok(RepoConfig {
        name: name.to_string(),
        kind,
        local: raw.local,
        arch,
        urls,
        ssl,
        filter,
        proxy: raw.proxy.or_else(|| global_proxy.map(str::to_string)),
        hard_tag_regex,
    })
}

fn validate_ssl(
    name: &str,
    urls: &[String],
    ca: Option<PathBuf>,
    cert: Option<PathBuf>,
    key: Option<PathBuf>,
) -> Result<Option<SslClientAuth>> {
    let present = [&ca, &cert, &key].iter().filter(|o| o.is_some()).count();
    if present == 0 {
        return Ok(None);
    }
    if urls.is_empty() {
        return Err(Error::Config(format!(
            "repo '{name}': ca/cert/key are only valid for mirrored repos (url is not set)"
        )));
    }
    if present != 3 {
        return Err(Error::Config(format!(
            "repo '{name}': ca, cert, and key must be set together"
        )));
    }
    let (ca, cert, key) = (ca.unwrap(), cert.unwrap(), key.unwrap());
    for (field, path) in [("ca", &ca), ("cert", &cert), ("key", &key)] {
        if !path.is_file() {
            return Err(Error::Config(format!(
                "repo '{name}': {field} file {} does not exist",
                path.display()
            )));
        }
    }
    Ok(Some(SslClientAuth { ca, cert, key }))
}

fn validate_filter(
    name: &str,
    include_filename: Option<String>,
    include_package: Option<String>,
    exclude_filename: Option<String>,
    exclude_package: Option<String>,
) -> Result<Option<PackageFilter>> {
    let set = [
        &include_filename,
        &include_package,
        &exclude_filename,
        &exclude_package,
    ]
    .iter()
    .filter(|o| o.is_some())
    .count();
    if set > 1 {
        return Err(Error::Config(format!(
            "repo '{name}': at most one of include_filename, include_package, \
             exclude_filename, exclude_package may be set"
        )));
    }

    let field = format!("repo '{name}' filter");
    Ok(if let Some(p) = include_filename {
        Some(PackageFilter::IncludeFilename(compile_regex(&field, &p)?))
    } else if let Some(p) = include_package {
        Some(PackageFilter::IncludePackage(compile_regex(&field, &p)?))
    } else if let Some(p) = exclude_filename {
        Some(PackageFilter::ExcludeFilename(compile_regex(&field, &p)?))
    } else if let Some(p) = exclude_package {
        Some(PackageFilter::ExcludePackage(compile_regex(&field, &p)?))
    } else {
        None
    })
}

fn compile_regex(field: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| Error::Config(format!("{field}: invalid regex '{pattern}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn minimal(data_dir: &Path, repo_body: &str) -> String {
        format!(
            "data_dir = \"{}\"\n\n[repo.test]\n{}",
            data_dir.display(),
            repo_body
        )
    }

    #[test]
    fn test_minimal_yum_repo() {
        let dir = TempDir::new().unwrap();
        let toml = minimal(
            dir.path(),
            "type = \"yum\"\nlocal = \"centos/base\"\narch = [\"x86_64\", \"noarch\"]\nurl = \"http://mirror.example/%ARCH%/os/\"\n",
        );
        let config = Config::from_toml(&toml).unwrap();
        let repo = config.repo("test").unwrap();
        assert_eq!(repo.kind, RepoKind::Yum);
        assert_eq!(repo.arch, vec!["x86_64", "noarch"]);
        assert!(repo.is_mirrored());
        assert_eq!(
            repo.urls_for_arch("x86_64"),
            vec!["http://mirror.example/x86_64/os/"]
        );
    }

    #[test]
    fn test_scalar_arch_promoted_to_sequence() {
        let dir = TempDir::new().unwrap();
        let toml = minimal(
            dir.path(),
            "type = \"plain\"\nlocal = \"files\"\narch = \"x86_64\"\n",
        );
        let config = Config::from_toml(&toml).unwrap();
        assert_eq!(config.repo("test").unwrap().arch, vec!["x86_64"]);
    }

    #[test]
    fn test_missing_data_dir_rejected() {
        let toml = "data_dir = \"/no/such/dir/for/repotag\"\n";
        assert!(matches!(Config::from_toml(toml), Err(Error::Config(_))));
    }

    #[test]
    fn test_bad_tag_style_rejected() {
        let dir = TempDir::new().unwrap();
        let toml = format!(
            "data_dir = \"{}\"\ntag_style = \"sideways\"\n",
            dir.path().display()
        );
        assert!(Config::from_toml(&toml).is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let dir = TempDir::new().unwrap();
        let toml = minimal(dir.path(), "type = \"pacman\"\nlocal = \"x\"\narch = \"i686\"\n");
        assert!(Config::from_toml(&toml).is_err());
    }

    #[test]
    fn test_partial_ssl_trio_rejected() {
        let dir = TempDir::new().unwrap();
        let ca = dir.path().join("ca.pem");
        File::create(&ca).unwrap();
        let toml = minimal(
            dir.path(),
            &format!(
                "type = \"yum\"\nlocal = \"x\"\narch = \"x86_64\"\nurl = \"http://u/\"\nca = \"{}\"\n",
                ca.display()
            ),
        );
        let err = Config::from_toml(&toml).unwrap_err();
        assert!(err.to_string().contains("must be set together"));
    }

    #[test]
    fn test_ssl_without_url_rejected() {
        let dir = TempDir::new().unwrap();
        let toml = minimal(
            dir.path(),
            "type = \"yum\"\nlocal = \"x\"\narch = \"x86_64\"\nca = \"/a\"\ncert = \"/b\"\nkey = \"/c\"\n",
        );
        let err = Config::from_toml(&toml).unwrap_err();
        assert!(err.to_string().contains("only valid for mirrored repos"));
    }

    #[test]
    fn test_full_ssl_trio_accepted() {
        let dir = TempDir::new().unwrap();
        for f in ["ca.pem", "cert.pem", "key.pem"] {
            File::create(dir.path().join(f)).unwrap();
        }
        let toml = minimal(
            dir.path(),
            &format!(
                "type = \"yum\"\nlocal = \"x\"\narch = \"x86_64\"\nurl = \"http://u/\"\n\
                 ca = \"{0}/ca.pem\"\ncert = \"{0}/cert.pem\"\nkey = \"{0}/key.pem\"\n",
                dir.path().display()
            ),
        );
        let config = Config::from_toml(&toml).unwrap();
        assert!(config.repo("test").unwrap().ssl.is_some());
    }

    #[test]
    fn test_two_filters_rejected() {
        let dir = TempDir::new().unwrap();
        let toml = minimal(
            dir.path(),
            "type = \"yum\"\nlocal = \"x\"\narch = \"x86_64\"\n\
             include_package = \"^kernel\"\nexclude_filename = \"debug\"\n",
        );
        let err = Config::from_toml(&toml).unwrap_err();
        assert!(err.to_string().contains("at most one"));
    }

    #[test]
    fn test_global_proxy_inherited() {
        let dir = TempDir::new().unwrap();
        let toml = format!(
            "data_dir = \"{0}\"\nproxy = \"http://proxy:3128\"\n\n\
             [repo.a]\ntype = \"yum\"\nlocal = \"a\"\narch = \"x86_64\"\n\n\
             [repo.b]\ntype = \"yum\"\nlocal = \"b\"\narch = \"x86_64\"\nproxy = \"http://own:8080\"\n",
            dir.path().display()
        );
        let config = Config::from_toml(&toml).unwrap();
        assert_eq!(
            config.repo("a").unwrap().proxy.as_deref(),
            Some("http://proxy:3128")
        );
        assert_eq!(
            config.repo("b").unwrap().proxy.as_deref(),
            Some("http://own:8080")
        );
    }

    #[test]
    fn test_repo_hard_tag_regex_overrides_global() {
        let dir = TempDir::new().unwrap();
        let toml = format!(
            "data_dir = \"{0}\"\nhard_tag_regex = \"^release-\"\n\n\
             [repo.a]\ntype = \"yum\"\nlocal = \"a\"\narch = \"x86_64\"\n\n\
             [repo.b]\ntype = \"yum\"\nlocal = \"b\"\narch = \"x86_64\"\nhard_tag_regex = \"^frozen-\"\n",
            dir.path().display()
        );
        let config = Config::from_toml(&toml).unwrap();
        let a = config.repo("a").unwrap();
        let b = config.repo("b").unwrap();
        assert!(config.hard_tag_regex_for(a).unwrap().is_match("release-1"));
        assert!(config.hard_tag_regex_for(b).unwrap().is_match("frozen-1"));
        assert!(!config.hard_tag_regex_for(b).unwrap().is_match("release-1"));
    }

    #[test]
    fn test_filter_semantics() {
        let keep = PackageFilter::IncludePackage(Regex::new("^kernel").unwrap());
        assert!(keep.keeps("kernel-core", "kernel-core-5.rpm"));
        assert!(!keep.keeps("bash", "bash-5.rpm"));

        let drop = PackageFilter::ExcludeFilename(Regex::new("debuginfo").unwrap());
        assert!(drop.keeps("bash", "bash-5.rpm"));
        assert!(!drop.keeps("bash-debuginfo", "bash-debuginfo-5.rpm"));
    }

    #[test]
    fn test_repos_iterate_sorted() {
        let dir = TempDir::new().unwrap();
        let toml = format!(
            "data_dir = \"{0}\"\n\n\
             [repo.zeta]\ntype = \"plain\"\nlocal = \"z\"\narch = \"x\"\n\n\
             [repo.alpha]\ntype = \"plain\"\nlocal = \"a\"\narch = \"x\"\n",
            dir.path().display()
        );
        let config = Config::from_toml(&toml).unwrap();
        let names: Vec<&String> = config.repos.keys().collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
