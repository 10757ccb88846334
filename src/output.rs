// src/output.rs

//! Rendering for the read-only actions
//!
//! `list` and `diff` print to stdout in one of three formats: a plain
//! pipe-delimited table, CSV with quote escaping, or JSON.

use crate::backend::TagDiff;
use crate::error::{Error, Result};
use serde_json::json;
use std::fmt::Write;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Default,
    Json,
    Csv,
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "default" => Ok(Self::Default),
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(Error::Config(format!(
                "unknown format '{other}' (expected default, json, or csv)"
            ))),
        }
    }
}

/// One row of `list` without a repo argument.
#[derive(Debug)]
pub struct RepoListing {
    pub name: String,
    pub kind: String,
    pub mirrored: bool,
}

/// One hard tag of a repo plus the soft tags resolving to it.
#[derive(Debug)]
pub struct TagEntry {
    pub tag: String,
    pub soft: Vec<String>,
}

/// `list REPO` output: the repo's tags.
#[derive(Debug)]
pub struct TagListing {
    pub repo: String,
    pub tags: Vec<TagEntry>,
}

/// Quote a CSV field when it contains a delimiter, quote, or newline.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn render_repo_list(repos: &[RepoListing], format: OutputFormat) -> String {
    match format {
        OutputFormat::Default => {
            let mut out = String::new();
            for repo in repos {
                let _ = writeln!(out, "{}|{}|{}", repo.name, repo.kind, repo.mirrored);
            }
            out
        }
        OutputFormat::Csv => {
            let mut out = String::from("name,type,mirrored\n");
            for repo in repos {
                let _ = writeln!(
                    out,
                    "{},{},{}",
                    csv_field(&repo.name),
                    csv_field(&repo.kind),
                    repo.mirrored
                );
            }
            out
        }
        OutputFormat::Json => {
            let rows: Vec<_> = repos
                .iter()
                .map(|r| json!({"name": r.name, "type": r.kind, "mirrored": r.mirrored}))
                .collect();
            json!({ "repos": rows }).to_string()
        }
    }
}

pub fn render_tag_list(listing: &TagListing, format: OutputFormat) -> String {
    match format {
        OutputFormat::Default => {
            let mut out = String::new();
            for entry in &listing.tags {
                let _ = writeln!(out, "{}|{}", entry.tag, entry.soft.join(" "));
            }
            out
        }
        OutputFormat::Csv => {
            let mut out = String::from("tag,soft tags\n");
            for entry in &listing.tags {
                let _ = writeln!(
                    out,
                    "{},{}",
                    csv_field(&entry.tag),
                    csv_field(&entry.soft.join(" "))
                );
            }
            out
        }
        OutputFormat::Json => {
            let tags: Vec<_> = listing
                .tags
                .iter()
                .map(|e| json!({"tag": e.tag, "soft tag": e.soft}))
                .collect();
            json!({ "repo": listing.repo, "tags": tags }).to_string()
        }
    }
}

pub fn render_diff(diff: &TagDiff, format: OutputFormat) -> String {
    match format {
        OutputFormat::Default => {
            let mut out = String::new();
            for file in &diff.src_only {
                let _ = writeln!(out, "{}|{}", diff.src_tag, file);
            }
            for file in &diff.dest_only {
                let _ = writeln!(out, "{}|{}", diff.dest_tag, file);
            }
            out
        }
        OutputFormat::Csv => {
            let mut out = String::from("tag,file\n");
            for file in &diff.src_only {
                let _ = writeln!(out, "{},{}", csv_field(&diff.src_tag), csv_field(file));
            }
            for file in &diff.dest_only {
                let _ = writeln!(out, "{},{}", csv_field(&diff.dest_tag), csv_field(file));
            }
            out
        }
        OutputFormat::Json => {
            let mut map = serde_json::Map::new();
            map.insert(diff.src_tag.clone(), json!(diff.src_only));
            map.insert(diff.dest_tag.clone(), json!(diff.dest_only));
            serde_json::Value::Object(map).to_string()
        }
    }
}
