// src/manifest.rs

//! Package manifest schema and validation
//!
//! A manifest is a YAML document (`package.yaml`) declaring where a
//! package's artifacts come from and an ordered list of install actions.
//! Actions are a tagged enum so planner dispatch is exhaustive and unknown
//! action types fail at decode time.

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// A package declaration loaded from `package.yaml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub install: Vec<Action>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_install: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_remove: Vec<String>,
    /// Path the manifest was loaded from; not part of the document
    #[serde(skip)]
    pub path: PathBuf,
}

/// Where releases for this package are discovered
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Source {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub repo: String,
}

/// One install action; the `type` key selects the variant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Action {
    Asset(AssetAction),
    Url(UrlAction),
    File(FileAction),
    Symlink(SymlinkAction),
    Extract(ExtractAction),
    Mkdir(MkdirAction),
}

/// Install a named (or pattern-matched) release asset to a target path
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetAction {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub preserve: bool,
}

/// Install the body of an arbitrary URL to a target path
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UrlAction {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub preserve: bool,
}

/// Install a file shipped alongside the manifest (relative to the package
/// directory)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileAction {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub preserve: bool,
}

/// Place a symlink at `target` pointing to `to`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymlinkAction {
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub to: String,
}

/// Unpack an archive into a target directory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractAction {
    pub from: ExtractFrom,
    /// Explicit archive format; empty or "auto" infers from the file name
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub strip_components: usize,
    #[serde(default)]
    pub target_dir: String,
    #[serde(default)]
    pub pick: Vec<String>,
    #[serde(default)]
    pub omit: Vec<String>,
}

/// Which input an extract action unpacks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExtractFrom {
    Asset {
        #[serde(default)]
        name: String,
        #[serde(default)]
        pattern: String,
    },
    Url {
        #[serde(default)]
        url: String,
    },
    File {
        #[serde(default)]
        path: String,
    },
}

/// Create a directory under the install root
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MkdirAction {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub group: String,
}

impl Manifest {
    /// Load and validate a manifest from `path`.
    ///
    /// An empty `name` defaults to the containing directory's base name.
    pub fn load(path: &Path) -> Result<Manifest> {
        let data = fs::read_to_string(path).map_err(|e| Error::MalformedManifest {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let mut manifest: Manifest =
            serde_yaml::from_str(&data).map_err(|e| Error::MalformedManifest {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        manifest.path = path.to_path_buf();
        if manifest.name.is_empty() {
            manifest.name = path
                .parent()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        manifest.validate()?;
        Ok(manifest)
    }

    /// Directory containing the manifest and its optional `files/` subtree
    pub fn package_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Structural validation of the manifest and every action
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::MalformedManifest {
                path: self.path.display().to_string(),
                reason: "manifest name is required".to_string(),
            });
        }
        for (index, action) in self.install.iter().enumerate() {
            action.validate().map_err(|reason| Error::InvalidAction { index, reason })?;
        }
        Ok(())
    }
}

impl Action {
    fn validate(&self) -> std::result::Result<(), String> {
        match self {
            Action::Asset(a) => {
                if a.name.is_empty() && a.pattern.is_empty() {
                    return Err("asset.name or pattern is required".to_string());
                }
                if a.target.is_empty() {
                    return Err("asset.target is required".to_string());
                }
            }
            Action::Url(a) => {
                if a.url.is_empty() {
                    return Err("url.url is required".to_string());
                }
                if a.target.is_empty() {
                    return Err("url.target is required".to_string());
                }
            }
            Action::File(a) => {
                if a.path.is_empty() {
                    return Err("file.path is required".to_string());
                }
                if a.target.is_empty() {
                    return Err("file.target is required".to_string());
                }
            }
            Action::Symlink(a) => {
                if a.target.is_empty() || a.to.is_empty() {
                    return Err("symlink.target and to are required".to_string());
                }
            }
            Action::Extract(a) => {
                match &a.from {
                    ExtractFrom::Asset { name, pattern } => {
                        if name.is_empty() && pattern.is_empty() {
                            return Err("extract.from.name or pattern is required".to_string());
                        }
                    }
                    ExtractFrom::Url { url } => {
                        if url.is_empty() {
                            return Err("extract.from.url is required".to_string());
                        }
                    }
                    ExtractFrom::File { path } => {
                        if path.is_empty() {
                            return Err("extract.from.path is required".to_string());
                        }
                    }
                }
                if a.target_dir.is_empty() {
                    return Err("extract.targetDir is required".to_string());
                }
            }
            Action::Mkdir(a) => {
                if a.path.is_empty() {
                    return Err("mkdir.path is required".to_string());
                }
            }
        }
        Ok(())
    }
}

/// Values substituted into manifest strings before action execution
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    pub version: String,
    pub tag: String,
    pub os: String,
    pub arch: String,
    pub repo: String,
    pub name: String,
}

impl TemplateContext {
    fn lookup(&self, key: &str) -> Option<&str> {
        match key {
            "version" => Some(&self.version),
            "tag" => Some(&self.tag),
            "os" => Some(&self.os),
            "arch" => Some(&self.arch),
            "repo" => Some(&self.repo),
            "name" => Some(&self.name),
            _ => None,
        }
    }
}

/// Replace the six literal placeholders with their context values.
///
/// Single pass and non-recursive: substituted values are never rescanned,
/// and unknown placeholders are left intact.
pub fn expand_template(input: &str, ctx: &TemplateContext) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        match tail.find('}') {
            Some(close) => {
                let key = &tail[1..close];
                match ctx.lookup(key) {
                    Some(value) => {
                        out.push_str(value);
                        rest = &tail[close + 1..];
                    }
                    None => {
                        out.push('{');
                        rest = &tail[1..];
                    }
                }
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Match an asset name against a manifest pattern.
///
/// The pattern is first compiled as a regular expression; if compilation
/// fails it degrades to substring containment. That fallback is the stable,
/// documented semantics: a string that happens to be a valid regex is
/// always treated as one. An empty pattern never matches.
pub fn match_pattern(name: &str, pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    match Regex::new(pattern) {
        Ok(re) => re.is_match(name),
        Err(_) => name.contains(pattern),
    }
}
