// src/source.rs

//! Release discovery
//!
//! This module resolves a repo identifier plus optional version into a
//! release descriptor with its asset list. Three drivers exist:
//! - GitHub-style release APIs (drafts and prereleases filtered out)
//! - GitLab-style release APIs (no filtering, separate published field)
//! - plain HTTP (no discovery; the caller must supply a version)
//!
//! When no version is requested, the highest release wins, ordered by
//! semantic version when both tags parse, then by published time, then
//! lexicographically by tag.

use crate::error::{Error, Result};
use crate::manifest;
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::cmp::Ordering;
use tracing::debug;

const GITHUB_API: &str = "https://api.github.com";
const GITLAB_API: &str = "https://gitlab.com/api/v4";

/// A resolved release with its downloadable assets
#[derive(Debug, Clone, Default)]
pub struct Release {
    pub tag: String,
    pub id: i64,
    pub published: Option<DateTime<Utc>>,
    pub assets: Vec<Asset>,
}

/// One downloadable artifact attached to a release
#[derive(Debug, Clone)]
pub struct Asset {
    pub name: String,
    pub url: String,
    pub size: u64,
}

/// Release resolver, one variant per source kind
pub enum Resolver {
    Github(Client),
    Gitlab(Client),
    Http,
}

impl Resolver {
    /// Build the resolver for a manifest `source.kind`
    pub fn for_kind(kind: &str, client: &Client) -> Result<Resolver> {
        match kind {
            "github" => Ok(Resolver::Github(client.clone())),
            "gitlab" => Ok(Resolver::Gitlab(client.clone())),
            "http" => Ok(Resolver::Http),
            other => Err(Error::Config(format!("unknown source kind {:?}", other))),
        }
    }

    /// Resolve a release for `repo`. With an empty `version` the highest
    /// release is returned; otherwise the release whose tag matches.
    pub fn resolve_release(&self, repo: &str, version: &str) -> Result<Release> {
        match self {
            Resolver::Github(client) => {
                let releases = github_releases(client, repo)?;
                pick_release(releases, repo, version)
            }
            Resolver::Gitlab(client) => {
                let releases = gitlab_releases(client, repo)?;
                pick_release(releases, repo, version)
            }
            Resolver::Http => {
                if version.is_empty() {
                    return Err(Error::Config(
                        "http source requires an explicit --version".to_string(),
                    ));
                }
                Ok(Release {
                    tag: version.to_string(),
                    ..Release::default()
                })
            }
        }
    }
}

fn pick_release(releases: Vec<Release>, repo: &str, version: &str) -> Result<Release> {
    if releases.is_empty() {
        return Err(Error::NotFound(format!("no releases found for {}", repo)));
    }
    if !version.is_empty() {
        return releases
            .into_iter()
            .find(|r| r.tag == version)
            .ok_or_else(|| Error::NotFound(format!("version {} not found", version)));
    }
    let mut releases = releases;
    releases.sort_by(|a, b| compare_releases(b, a));
    let best = releases.remove(0);
    debug!("resolved latest release {}", best.tag);
    Ok(best)
}

#[derive(Deserialize)]
struct GithubRelease {
    #[serde(default)]
    tag_name: String,
    #[serde(default)]
    id: i64,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    assets: Vec<GithubAsset>,
}

#[derive(Deserialize)]
struct GithubAsset {
    #[serde(default)]
    name: String,
    #[serde(default)]
    browser_download_url: String,
    #[serde(default)]
    size: u64,
}

fn github_releases(client: &Client, repo: &str) -> Result<Vec<Release>> {
    let url = format!("{}/repos/{}/releases", GITHUB_API, repo);
    debug!("listing releases from {}", url);
    let response = client
        .get(&url)
        .header("Accept", "application/vnd.github+json")
        .send()
        .map_err(|e| Error::Network(format!("github releases: {}", e)))?;
    if !response.status().is_success() {
        return Err(Error::Network(format!(
            "github releases: HTTP {} from {}",
            response.status(),
            url
        )));
    }
    let releases: Vec<GithubRelease> = response
        .json()
        .map_err(|e| Error::Network(format!("github releases: {}", e)))?;
    Ok(releases
        .into_iter()
        .filter(|r| !r.draft && !r.prerelease)
        .map(|r| Release {
            tag: r.tag_name,
            id: r.id,
            published: r.published_at,
            assets: r
                .assets
                .into_iter()
                .map(|a| Asset {
                    name: a.name,
                    url: a.browser_download_url,
                    size: a.size,
                })
                .collect(),
        })
        .collect())
}

#[derive(Deserialize)]
struct GitlabRelease {
    #[serde(default)]
    tag_name: String,
    #[serde(default)]
    released_at: String,
    #[serde(default)]
    assets: GitlabAssets,
}

#[derive(Deserialize, Default)]
struct GitlabAssets {
    #[serde(default)]
    links: Vec<GitlabAsset>,
}

#[derive(Deserialize)]
struct GitlabAsset {
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: String,
}

fn gitlab_releases(client: &Client, repo: &str) -> Result<Vec<Release>> {
    let url = format!("{}/projects/{}/releases", GITLAB_API, path_escape(repo));
    debug!("listing releases from {}", url);
    let response = client
        .get(&url)
        .send()
        .map_err(|e| Error::Network(format!("gitlab releases: {}", e)))?;
    if !response.status().is_success() {
        return Err(Error::Network(format!(
            "gitlab releases: HTTP {} from {}",
            response.status(),
            url
        )));
    }
    let releases: Vec<GitlabRelease> = response
        .json()
        .map_err(|e| Error::Network(format!("gitlab releases: {}", e)))?;
    Ok(releases
        .into_iter()
        .map(|r| Release {
            tag: r.tag_name,
            id: 0,
            published: DateTime::parse_from_rfc3339(&r.released_at)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            assets: r
                .assets
                .links
                .into_iter()
                .map(|a| Asset {
                    name: a.name,
                    url: a.url,
                    size: 0,
                })
                .collect(),
        })
        .collect())
}

/// Percent-encode a project path for use as a single URL path segment
/// (GitLab addresses projects as `group%2Fname`)
fn path_escape(repo: &str) -> String {
    let mut out = String::with_capacity(repo.len());
    for byte in repo.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Order two releases per the tie-break ladder: semantic version when both
/// tags parse, else published time, else tag text
pub fn compare_releases(a: &Release, b: &Release) -> Ordering {
    if let (Some(va), Some(vb)) = (parse_semver(&a.tag), parse_semver(&b.tag)) {
        return va.cmp(&vb);
    }
    match a.published.cmp(&b.published) {
        Ordering::Equal => a.tag.cmp(&b.tag),
        other => other,
    }
}

/// Loose semantic version: optional leading `v`, at least MAJOR.MINOR,
/// numeric prefix of each part, missing PATCH treated as 0
fn parse_semver(tag: &str) -> Option<(u64, u64, u64)> {
    let tag = tag.strip_prefix('v').unwrap_or(tag);
    let parts: Vec<&str> = tag.split('.').collect();
    if parts.len() < 2 {
        return None;
    }
    let mut nums = [0u64; 3];
    for (i, part) in parts.iter().take(3).enumerate() {
        nums[i] = numeric_prefix(part);
    }
    Some((nums[0], nums[1], nums[2]))
}

fn numeric_prefix(part: &str) -> u64 {
    let mut n = 0u64;
    for ch in part.chars() {
        match ch.to_digit(10) {
            Some(d) => n = n * 10 + d as u64,
            None => break,
        }
    }
    n
}

/// Pick the asset an action refers to: exact name match first, then the
/// action's pattern
pub fn select_asset(release: &Release, name: &str, pattern: &str) -> Result<Asset> {
    if !name.is_empty() {
        return release
            .assets
            .iter()
            .find(|a| a.name == name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("asset {} not found", name)));
    }
    if !pattern.is_empty() {
        return release
            .assets
            .iter()
            .find(|a| manifest::match_pattern(&a.name, pattern))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("asset matching {:?} not found", pattern)));
    }
    Err(Error::NotFound(
        "asset action requires name or pattern".to_string(),
    ))
}
