// src/state.rs

//! Persistent install state
//!
//! Two JSON documents live under the state directory:
//! - `installed.json` — the installed index mapping package name to its
//!   current version and receipt location
//! - `receipts/<name>.json` — one receipt per installed package recording
//!   the resolved source, fetched artifacts and every installed file
//!
//! All writes go through a temp-file + rename so readers never observe a
//! partially written document.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Current on-disk schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Installed index: package name -> current install record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledIndex {
    #[serde(default)]
    pub schema: u32,
    #[serde(default)]
    pub installed: BTreeMap<String, InstalledEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledEntry {
    pub version: String,
    /// Receipt path relative to the state directory
    pub receipt: String,
    pub installed_at: String,
}

impl Default for InstalledIndex {
    fn default() -> Self {
        Self {
            schema: SCHEMA_VERSION,
            installed: BTreeMap::new(),
        }
    }
}

/// Record of one completed install
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    #[serde(default)]
    pub schema: u32,
    pub name: String,
    pub source: ReceiptSource,
    pub platform: Platform,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub files: Vec<ReceiptFile>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptSource {
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repo: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub release_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

/// What kind of remote/local input produced an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    File,
    Url,
    Asset,
}

/// Record of one fetched input (hash and size are of the fetched bytes)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    pub sha256: String,
    pub size: u64,
}

/// What kind of filesystem entry a receipt file describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Symlink,
    Dir,
}

/// Record of one installed path, stored root-relative
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptFile {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub mode: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sha256: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub to: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub preserve: bool,
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

/// Path of the installed index under a state directory
pub fn installed_path(state_dir: &Path) -> PathBuf {
    state_dir.join("installed.json")
}

/// Path of a package's receipt under a state directory
pub fn receipt_path(state_dir: &Path, name: &str) -> PathBuf {
    state_dir.join("receipts").join(format!("{}.json", name))
}

/// Load the installed index, returning an empty default when the file does
/// not exist yet
pub fn load_installed(path: &Path) -> Result<InstalledIndex> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(InstalledIndex::default());
        }
        Err(e) => return Err(e.into()),
    };
    let mut index: InstalledIndex = serde_json::from_str(&data)
        .map_err(|e| Error::State(format!("{}: {}", path.display(), e)))?;
    if index.schema == 0 {
        index.schema = SCHEMA_VERSION;
    }
    Ok(index)
}

/// Save the installed index atomically
pub fn save_installed(path: &Path, index: &InstalledIndex) -> Result<()> {
    write_json_atomic(path, index)
}

/// Load a receipt; a missing file is an error for callers that require one
pub fn load_receipt(path: &Path) -> Result<Receipt> {
    let data = fs::read_to_string(path)?;
    let mut receipt: Receipt = serde_json::from_str(&data)
        .map_err(|e| Error::State(format!("{}: {}", path.display(), e)))?;
    if receipt.schema == 0 {
        receipt.schema = SCHEMA_VERSION;
    }
    Ok(receipt)
}

/// Save a receipt atomically
pub fn save_receipt(path: &Path, receipt: &Receipt) -> Result<()> {
    write_json_atomic(path, receipt)
}

/// Record a successful install in the installed index
pub fn record_install(state_dir: &Path, name: &str, version: &str) -> Result<InstalledIndex> {
    let path = installed_path(state_dir);
    let mut index = load_installed(&path)?;
    index.installed.insert(
        name.to_string(),
        InstalledEntry {
            version: version.to_string(),
            receipt: format!("receipts/{}.json", name),
            installed_at: chrono::Utc::now().to_rfc3339(),
        },
    );
    save_installed(&path, &index)?;
    debug!("recorded install {} {}", name, version);
    Ok(index)
}

/// Drop a package from the installed index
pub fn record_remove(state_dir: &Path, name: &str) -> Result<()> {
    let path = installed_path(state_dir);
    let mut index = load_installed(&path)?;
    index.installed.remove(name);
    save_installed(&path, &index)
}

/// Serialise with 2-space indentation and replace the destination via a
/// temporary sibling so a crash never leaves a torn document
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_string_pretty(value)
        .map_err(|e| Error::State(format!("encode {}: {}", path.display(), e)))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, data.as_bytes())?;
    fs::rename(&tmp, path)?;
    Ok(())
}
