// src/fsops.rs

//! Atomic filesystem primitives
//!
//! Every file the transactor places on disk goes through the same
//! discipline: write the new bytes to a `.ghpm.new` sibling, fsync, move
//! any existing target aside to `.ghpm.bak`, then rename the new file into
//! place. Backups stay on disk until the transaction commits so a
//! mid-flight failure can restore them in reverse order.

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Suffix for the staged replacement file
pub const NEW_SUFFIX: &str = ".ghpm.new";

/// Suffix for the pre-replacement backup
pub const BAK_SUFFIX: &str = ".ghpm.bak";

fn sibling(target: &Path, suffix: &str) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// SHA-256 of a file's content as lowercase hex
pub fn hash_file(path: &Path) -> Result<String> {
    let (sum, _) = hash_file_with_size(path)?;
    Ok(sum)
}

/// SHA-256 and size of a file's content
pub fn hash_file_with_size(path: &Path) -> Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let size = io::copy(&mut file, &mut hasher)?;
    Ok((format!("{:x}", hasher.finalize()), size))
}

/// Create a directory and any missing parents at 0755. Idempotent.
pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

/// Atomically replace `target` with a copy of `source`.
///
/// A non-zero `mode` is applied to the staged copy before the swap.
/// Returns the backup path when an existing target was moved aside; the
/// caller owns backup cleanup (commit) or restore (rollback).
pub fn install_file_atomic(target: &Path, source: &Path, mode: u32) -> Result<Option<PathBuf>> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let staged = sibling(target, NEW_SUFFIX);
    {
        let mut input = File::open(source)?;
        let mut output = File::create(&staged)?;
        io::copy(&mut input, &mut output)?;
        output.sync_all()?;
    }
    if mode != 0 {
        fs::set_permissions(&staged, fs::Permissions::from_mode(mode))?;
    }

    let backup = sibling(target, BAK_SUFFIX);
    let had_existing = target.symlink_metadata().is_ok();
    if had_existing {
        fs::rename(target, &backup)?;
    }
    if let Err(e) = fs::rename(&staged, target) {
        if backup.symlink_metadata().is_ok() {
            let _ = fs::rename(&backup, target);
        }
        return Err(e.into());
    }
    debug!("installed {}", target.display());
    Ok(had_existing.then(|| backup))
}

/// Atomically replace the symlink at `target` pointing to `to`.
///
/// Same backup contract as [`install_file_atomic`].
pub fn replace_symlink_atomic(target: &Path, to: &str) -> Result<Option<PathBuf>> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let staged = sibling(target, NEW_SUFFIX);
    // stale residue from a killed process
    let _ = fs::remove_file(&staged);
    std::os::unix::fs::symlink(to, &staged)?;

    let backup = sibling(target, BAK_SUFFIX);
    let had_existing = target.symlink_metadata().is_ok();
    if had_existing {
        fs::rename(target, &backup)?;
    }
    if let Err(e) = fs::rename(&staged, target) {
        if backup.symlink_metadata().is_ok() {
            let _ = fs::rename(&backup, target);
        }
        return Err(e.into());
    }
    debug!("symlinked {} -> {}", target.display(), to);
    Ok(had_existing.then(|| backup))
}

/// Restore a backup over its target. Used during rollback; absence of the
/// backup is not an error.
pub fn restore_backup(target: &Path, backup: &Path) -> Result<()> {
    if backup.symlink_metadata().is_ok() {
        fs::rename(backup, target)?;
    }
    Ok(())
}

/// Discard a committed backup, tolerating absence
pub fn discard_backup(backup: &Path) {
    let _ = fs::remove_file(backup);
}

/// Join a manifest path under the install root. Manifest targets are
/// conventionally absolute (`/usr/local/bin/...`), and `Path::join` would
/// discard the root for those, so the leading slash is trimmed first.
pub fn join_root(root: &Path, path: &str) -> PathBuf {
    root.join(path.trim_start_matches('/'))
}

/// Root-relative form of an absolute target, always starting with `/`
/// when the root is not `/` itself
pub fn normalize_for_receipt(root: &Path, target: &Path) -> String {
    let target_str = target.to_string_lossy();
    if root == Path::new("/") {
        return target_str.into_owned();
    }
    let root_str = root.to_string_lossy();
    let trimmed = target_str
        .strip_prefix(root_str.as_ref())
        .unwrap_or(&target_str);
    if trimmed.is_empty() {
        return "/".to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}
