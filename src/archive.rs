// src/archive.rs

//! Archive listing and extraction
//!
//! Supports tar.gz, tar.xz and zip archives. Listing and extraction share
//! one iteration discipline — strip leading components, normalise
//! separators, keep only regular files, partition by pick/omit globs — so
//! the planner can know the exact file set before any byte lands on disk.

use crate::error::{Error, Result};
use crate::manifest::ExtractAction;
use flate2::read::GzDecoder;
use glob::{MatchOptions, Pattern};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use tracing::debug;
use xz2::read::XzDecoder;

/// Supported archive container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    TarXz,
    Zip,
}

impl ArchiveFormat {
    /// Infer a format from a file name suffix
    pub fn infer(name: &str) -> Option<ArchiveFormat> {
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else if name.ends_with(".tar.xz") {
            Some(ArchiveFormat::TarXz)
        } else if name.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else {
            None
        }
    }

    fn from_name(name: &str) -> Option<ArchiveFormat> {
        match name {
            "tar.gz" => Some(ArchiveFormat::TarGz),
            "tar.xz" => Some(ArchiveFormat::TarXz),
            "zip" => Some(ArchiveFormat::Zip),
            _ => None,
        }
    }
}

/// Resolve the effective format for an extract action: an explicit
/// `format` wins; empty or `auto` infers from the asset hint name, then
/// from the local path
pub fn resolve_format(action: &ExtractAction, hint_name: &str, path: &Path) -> Result<ArchiveFormat> {
    if !action.format.is_empty() && action.format != "auto" {
        return ArchiveFormat::from_name(&action.format).ok_or_else(|| {
            Error::Archive(format!("unsupported archive format {}", action.format))
        });
    }
    let local = path.to_string_lossy();
    ArchiveFormat::infer(hint_name)
        .or_else(|| ArchiveFormat::infer(&local))
        .ok_or_else(|| {
            let hint = if hint_name.is_empty() {
                local.into_owned()
            } else {
                hint_name.to_string()
            };
            Error::UnknownArchiveFormat(hint)
        })
}

/// List the regular files an extraction would produce.
///
/// Returns `(files, skipped)`: entries surviving the strip that pass the
/// pick/omit filters, and those the filters rejected.
pub fn list(path: &Path, format: ArchiveFormat, action: &ExtractAction) -> Result<(Vec<String>, Vec<String>)> {
    let mut files = Vec::new();
    let mut skipped = Vec::new();
    walk(path, format, action, |name, entry| {
        if entry.is_regular {
            if should_include(name, &action.pick, &action.omit) {
                files.push(name.to_string());
            } else {
                skipped.push(name.to_string());
            }
        }
        Ok(())
    })?;
    Ok((files, skipped))
}

/// Extract the included regular files into `target_dir`, creating parent
/// directories at 0755 and preserving each entry's permission bits
pub fn extract(path: &Path, format: ArchiveFormat, target_dir: &Path, action: &ExtractAction) -> Result<()> {
    debug!("extracting {} into {}", path.display(), target_dir.display());
    walk(path, format, action, |name, entry| {
        if !should_include(name, &action.pick, &action.omit) {
            return Ok(());
        }
        let target = target_dir.join(name);
        if entry.is_dir {
            fs::create_dir_all(&target)?;
            return Ok(());
        }
        if !entry.is_regular {
            return Ok(());
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(entry.reader, &mut out)?;
        drop(out);
        if let Some(mode) = entry.mode {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o777))?;
        }
        Ok(())
    })
}

/// One archive entry as seen by the shared walker
struct WalkEntry<'a> {
    is_regular: bool,
    is_dir: bool,
    mode: Option<u32>,
    reader: &'a mut dyn Read,
}

/// Iterate archive entries, applying strip/normalisation, and hand each
/// surviving entry to `visit` with its stripped name
fn walk<F>(path: &Path, format: ArchiveFormat, action: &ExtractAction, mut visit: F) -> Result<()>
where
    F: FnMut(&str, WalkEntry) -> Result<()>,
{
    match format {
        ArchiveFormat::TarGz | ArchiveFormat::TarXz => {
            let file = File::open(path)?;
            let reader: Box<dyn Read> = match format {
                ArchiveFormat::TarGz => Box::new(GzDecoder::new(file)),
                _ => Box::new(XzDecoder::new(file)),
            };
            let mut archive = tar::Archive::new(reader);
            for entry in archive
                .entries()
                .map_err(|e| Error::Archive(format!("{}: {}", path.display(), e)))?
            {
                let mut entry =
                    entry.map_err(|e| Error::Archive(format!("{}: {}", path.display(), e)))?;
                let raw = entry
                    .path()
                    .map_err(|e| Error::Archive(format!("{}: {}", path.display(), e)))?
                    .to_string_lossy()
                    .into_owned();
                let name = match strip_components(&raw, action.strip_components) {
                    Some(name) => name,
                    None => continue,
                };
                let kind = entry.header().entry_type();
                let mode = entry.header().mode().ok();
                visit(
                    &name,
                    WalkEntry {
                        is_regular: kind.is_file(),
                        is_dir: kind.is_dir(),
                        mode,
                        reader: &mut entry,
                    },
                )?;
            }
        }
        ArchiveFormat::Zip => {
            let file = File::open(path)?;
            let mut archive = zip::ZipArchive::new(file)
                .map_err(|e| Error::Archive(format!("{}: {}", path.display(), e)))?;
            for index in 0..archive.len() {
                let mut entry = archive
                    .by_index(index)
                    .map_err(|e| Error::Archive(format!("{}: {}", path.display(), e)))?;
                let raw = entry.name().to_string();
                let name = match strip_components(&raw, action.strip_components) {
                    Some(name) => name,
                    None => continue,
                };
                let is_dir = entry.is_dir();
                let mode = entry.unix_mode();
                visit(
                    &name,
                    WalkEntry {
                        is_regular: !is_dir,
                        is_dir,
                        mode,
                        reader: &mut entry,
                    },
                )?;
            }
        }
    }
    Ok(())
}

/// Drop `count` leading path components after normalising separators.
/// Entries with at most `count` components vanish, as do unsafe names
/// (absolute, or traversing with `..`).
fn strip_components(name: &str, count: usize) -> Option<String> {
    let normalised = name.replace('\\', "/");
    let parts: Vec<&str> = normalised
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();
    if parts.iter().any(|p| *p == "..") {
        return None;
    }
    if parts.is_empty() || parts.len() <= count {
        return None;
    }
    Some(parts[count..].join("/"))
}

/// Pick/omit filtering: a non-empty `pick` includes only matching names
/// and takes precedence over `omit`; a non-empty `omit` excludes matching
/// names; otherwise everything is included
fn should_include(name: &str, pick: &[String], omit: &[String]) -> bool {
    if !pick.is_empty() {
        return pick.iter().any(|p| glob_match(p, name));
    }
    if !omit.is_empty() {
        return !omit.iter().any(|p| glob_match(p, name));
    }
    true
}

fn glob_match(pattern: &str, name: &str) -> bool {
    // * and ? stay within one path component
    const OPTIONS: MatchOptions = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };
    match Pattern::new(pattern) {
        Ok(p) => p.matches_with(name, OPTIONS),
        Err(_) => false,
    }
}
