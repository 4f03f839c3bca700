// src/manager.rs

//! Install transaction engine and command facade
//!
//! The [`Manager`] owns the install root and sequences every command:
//! acquire the global lock, resolve the release, plan, check ownership
//! conflicts, execute the plan with rollback, then commit the receipt and
//! installed index. Removal and upgrade reconciliation run through the
//! same receipt bookkeeping.

use crate::archive;
use crate::cache::DownloadCache;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fsops;
use crate::manifest::{Manifest, TemplateContext};
use crate::plan::{Plan, Planner, Step};
use crate::source::{Release, Resolver};
use crate::state::{self, FileKind, Platform, Receipt, ReceiptFile, ReceiptSource};
use fs2::FileExt;
use reqwest::blocking::Client;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Relative location of the global lock file under the root
const LOCK_PATH: &str = "var/lock/ghpm.lock";

/// Options for install and upgrade
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    pub version: String,
    pub force: bool,
    pub dry_run: bool,
}

/// Options for remove
#[derive(Debug, Clone, Default)]
pub struct RemoveOptions {
    pub purge: bool,
}

/// Runs post-install/post-remove shell hooks. Hooks are best-effort and
/// outside the transaction; implementations must not fail the command.
pub trait HookRunner {
    fn run(&self, command: &str);
}

/// Default hook runner: `/bin/sh -c <command>`, exit status ignored
pub struct ShellHookRunner;

impl HookRunner for ShellHookRunner {
    fn run(&self, command: &str) {
        let _ = std::process::Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .status();
    }
}

/// Holds the exclusive advisory lock for the duration of a mutating
/// command; released on drop
struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Orchestrates install, remove, upgrade, status, list and self-register
pub struct Manager {
    pub config: Config,
    pub root: PathBuf,
    client: Client,
    cache: DownloadCache,
    hooks: Box<dyn HookRunner>,
}

impl Manager {
    pub fn new(config: Config, root: PathBuf) -> Result<Manager> {
        let client = Client::builder()
            .timeout(config.http_timeout())
            .user_agent(concat!("ghpm/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;
        let cache_dir = fsops::join_root(&root, &config.cache_dir).join("downloads");
        let cache = DownloadCache::new(cache_dir, client.clone(), config.network.retries);
        Ok(Manager {
            config,
            root,
            client,
            cache,
            hooks: Box::new(ShellHookRunner),
        })
    }

    /// Replace the hook runner (used by tests to observe hook execution)
    pub fn set_hook_runner(&mut self, hooks: Box<dyn HookRunner>) {
        self.hooks = hooks;
    }

    pub fn packages_dir(&self) -> PathBuf {
        fsops::join_root(&self.root, &self.config.packages_dir)
    }

    pub fn state_dir(&self) -> PathBuf {
        fsops::join_root(&self.root, &self.config.state_dir)
    }

    fn lock(&self) -> Result<LockGuard> {
        let path = self.root.join(LOCK_PATH);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;
        file.try_lock_exclusive().map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("lock {} is held: {}", path.display(), e),
            ))
        })?;
        Ok(LockGuard { file })
    }

    /// Load one manifest by package name
    pub fn load_manifest(&self, name: &str) -> Result<Manifest> {
        Manifest::load(&self.packages_dir().join(name).join("package.yaml"))
    }

    /// Enumerate every package directory containing a `package.yaml`,
    /// sorted by name
    pub fn list_manifests(&self) -> Result<Vec<Manifest>> {
        let dir = self.packages_dir();
        let mut names: Vec<String> = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if entry.path().join("package.yaml").is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        let mut manifests = Vec::with_capacity(names.len());
        for name in names {
            manifests.push(Manifest::load(&dir.join(&name).join("package.yaml"))?);
        }
        Ok(manifests)
    }

    /// Install a package, returning its receipt. With `dry_run` the plan
    /// and conflict check run but nothing on disk changes; the provisional
    /// receipt is returned.
    pub fn install(&self, name: &str, opts: &InstallOptions) -> Result<Receipt> {
        let _lock = self.lock()?;
        self.config.ensure_dirs(&self.root)?;

        let manifest = self.load_manifest(name)?;
        info!("install {}", manifest.name);

        let installed = state::load_installed(&state::installed_path(&self.state_dir()))?;
        let (resolved, release) = self.resolve_version(&manifest, &opts.version)?;
        if !resolved.is_empty() {
            info!("resolved {}", resolved);
        }

        let receipt_path = state::receipt_path(&self.state_dir(), &manifest.name);
        if let Some(entry) = installed.installed.get(&manifest.name) {
            if !opts.force && !resolved.is_empty() && resolved == entry.version {
                if let Ok(receipt) = state::load_receipt(&receipt_path) {
                    info!("already installed {} {}", manifest.name, resolved);
                    return Ok(receipt);
                }
            }
        }

        let previous = state::load_receipt(&receipt_path).ok();
        let ownership = self.build_ownership(&installed)?;

        let platform = Platform {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        };
        let ctx = TemplateContext {
            version: resolved.clone(),
            tag: resolved.clone(),
            os: platform.os.clone(),
            arch: platform.arch.clone(),
            repo: manifest.source.repo.clone(),
            name: manifest.name.clone(),
        };

        // scratch space for this transaction, removed on every exit path
        let work_dir = tempfile::Builder::new()
            .prefix(&format!("{}-", manifest.name))
            .tempdir_in(self.state_dir().join("work"))?;
        debug!("work dir {}", work_dir.path().display());

        let planner = Planner {
            root: &self.root,
            cache: &self.cache,
        };
        let plan = planner.plan(&manifest, &release, &ctx)?;

        let conflicts = self.check_conflicts(&plan.targets, &ownership, &manifest.name, opts.force);
        if !conflicts.is_empty() {
            return Err(Error::InstallConflict(conflicts));
        }

        let mut receipt = Receipt {
            schema: state::SCHEMA_VERSION,
            name: manifest.name.clone(),
            source: ReceiptSource {
                kind: manifest.source.kind.clone(),
                repo: manifest.source.repo.clone(),
                tag: resolved.clone(),
                release_id: release.id,
            },
            platform,
            artifacts: plan.artifacts.clone(),
            files: plan.receipt_files.clone(),
        };

        if opts.dry_run {
            info!("dry-run complete");
            return Ok(receipt);
        }

        let extracted = self.execute_steps(&plan)?;
        receipt.files.extend(extracted);

        state::save_receipt(&receipt_path, &receipt)?;
        state::record_install(&self.state_dir(), &manifest.name, &resolved)?;
        if let Some(previous) = previous {
            self.reconcile_obsolete(&previous, &receipt);
        }

        self.run_hooks(&manifest.post_install);
        Ok(receipt)
    }

    /// Remove a package's installed files and drop its receipt.
    /// Entries marked `preserve` survive unless `purge` is set.
    pub fn remove(&self, name: &str, opts: &RemoveOptions) -> Result<()> {
        let _lock = self.lock()?;

        let receipt_path = state::receipt_path(&self.state_dir(), name);
        let receipt = state::load_receipt(&receipt_path)?;
        let manifest = self.load_manifest(name).ok();

        for file in &receipt.files {
            let target = fsops::join_root(&self.root, &file.path);
            if file.preserve && !opts.purge {
                debug!("preserve {}", target.display());
                continue;
            }
            debug!("remove {}", target.display());
            remove_entry(&target, file.kind);
        }

        match fs::remove_file(&receipt_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        state::record_remove(&self.state_dir(), name)?;

        if let Some(manifest) = manifest {
            self.run_hooks(&manifest.post_remove);
        }
        Ok(())
    }

    /// Verify on-disk state against a package's receipt. Returns the
    /// receipt plus `(path, ok)` pairs in receipt order.
    pub fn status(&self, name: &str) -> Result<(Receipt, Vec<(String, bool)>)> {
        let receipt = state::load_receipt(&state::receipt_path(&self.state_dir(), name))?;
        let mut results = Vec::with_capacity(receipt.files.len());
        for file in &receipt.files {
            let target = fsops::join_root(&self.root, &file.path);
            let ok = match file.kind {
                FileKind::File => fsops::hash_file(&target)
                    .map(|sum| sum == file.sha256)
                    .unwrap_or(false),
                FileKind::Symlink => fs::read_link(&target)
                    .map(|dest| dest == Path::new(&file.to))
                    .unwrap_or(false),
                FileKind::Dir => target.is_dir(),
            };
            results.push((file.path.clone(), ok));
        }
        Ok((receipt, results))
    }

    /// Upgrade a package to the latest release. Not-installed packages
    /// fall through to a plain install. Returns whether anything changed
    /// together with the resulting receipt.
    pub fn upgrade(&self, name: &str, opts: &InstallOptions) -> Result<(bool, Receipt)> {
        let installed = state::load_installed(&state::installed_path(&self.state_dir()))?;
        let entry = match installed.installed.get(name) {
            Some(entry) => entry.clone(),
            None => {
                let receipt = self.install(name, opts)?;
                return Ok((true, receipt));
            }
        };

        if opts.dry_run {
            let manifest = self.load_manifest(name)?;
            let (resolved, _) = self.resolve_version(&manifest, "")?;
            let receipt = Receipt {
                schema: state::SCHEMA_VERSION,
                name: name.to_string(),
                source: ReceiptSource {
                    tag: resolved.clone(),
                    ..ReceiptSource::default()
                },
                platform: Platform::default(),
                artifacts: vec![],
                files: vec![],
            };
            return Ok((resolved != entry.version, receipt));
        }

        let opts = InstallOptions {
            version: String::new(),
            ..opts.clone()
        };
        let receipt = self.install(name, &opts)?;
        Ok((receipt.source.tag != entry.version, receipt))
    }

    /// Record the running ghpm binary itself as an installed package,
    /// writing a manifest for it and a receipt covering the executable
    pub fn self_register(&self, version: &str) -> Result<Receipt> {
        let _lock = self.lock()?;
        self.config.ensure_dirs(&self.root)?;

        let exe = std::env::current_exe()?;
        let exe = fs::canonicalize(exe)?;
        let metadata = fs::metadata(&exe)?;
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            metadata.permissions().mode() & 0o777
        };

        let version = if version.is_empty() {
            concat!("v", env!("CARGO_PKG_VERSION")).to_string()
        } else {
            version.to_string()
        };

        self.write_self_manifest(&exe, mode)?;

        let sha256 = fsops::hash_file(&exe)?;
        let receipt = Receipt {
            schema: state::SCHEMA_VERSION,
            name: "ghpm".to_string(),
            source: ReceiptSource {
                kind: "github".to_string(),
                repo: "ghpm-dev/ghpm".to_string(),
                tag: version.clone(),
                release_id: 0,
            },
            platform: Platform {
                os: std::env::consts::OS.to_string(),
                arch: std::env::consts::ARCH.to_string(),
            },
            artifacts: vec![],
            files: vec![ReceiptFile {
                path: fsops::normalize_for_receipt(&self.root, &exe),
                kind: FileKind::File,
                mode,
                sha256,
                to: String::new(),
                preserve: false,
            }],
        };

        state::save_receipt(&state::receipt_path(&self.state_dir(), "ghpm"), &receipt)?;
        state::record_install(&self.state_dir(), "ghpm", &version)?;
        info!("registered ghpm {}", version);
        Ok(receipt)
    }

    fn write_self_manifest(&self, exe: &Path, mode: u32) -> Result<()> {
        let pkg_dir = self.packages_dir().join("ghpm");
        fs::create_dir_all(&pkg_dir)?;
        let manifest = format!(
            r#"name: ghpm
description: ghpm package manager
source:
  kind: github
  repo: ghpm-dev/ghpm
install:
  - type: asset
    name: "ghpm_{{version}}_{{os}}_{{arch}}_bin"
    target: "{target}"
    mode: "{mode:04o}"
"#,
            target = exe.display(),
            mode = mode
        );
        fs::write(pkg_dir.join("package.yaml"), manifest)?;
        Ok(())
    }

    /// Resolve the tag and release for a manifest. Sourceless manifests
    /// echo the requested version; http sources with no version yield an
    /// empty tag and an assetless release (discovery is disallowed).
    fn resolve_version(&self, manifest: &Manifest, version: &str) -> Result<(String, Release)> {
        if manifest.source.kind.is_empty() {
            return Ok((version.to_string(), Release::default()));
        }
        if manifest.source.kind == "http" && version.is_empty() {
            return Ok((String::new(), Release::default()));
        }
        let resolver = Resolver::for_kind(&manifest.source.kind, &self.client)?;
        let release = resolver.resolve_release(&manifest.source.repo, version)?;
        Ok((release.tag.clone(), release))
    }

    /// Union every installed receipt's file list into path -> owner
    fn build_ownership(&self, installed: &state::InstalledIndex) -> Result<BTreeMap<String, String>> {
        let mut ownership = BTreeMap::new();
        for (name, entry) in &installed.installed {
            let receipt_path = self.state_dir().join(&entry.receipt);
            let receipt = match state::load_receipt(&receipt_path) {
                Ok(receipt) => receipt,
                Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            for file in &receipt.files {
                ownership.insert(file.path.clone(), name.clone());
            }
        }
        Ok(ownership)
    }

    /// Collect every conflicting target. A path conflicts when another
    /// package owns it, or when it already exists on disk unowned by the
    /// installing package and `force` is unset.
    fn check_conflicts(
        &self,
        targets: &[PathBuf],
        ownership: &BTreeMap<String, String>,
        package: &str,
        force: bool,
    ) -> Vec<String> {
        let mut conflicts = Vec::new();
        for target in targets {
            let relative = fsops::normalize_for_receipt(&self.root, target);
            if let Some(owner) = ownership.get(&relative) {
                if owner != package {
                    conflicts.push(relative);
                    continue;
                }
            }
            if fs::metadata(target).is_ok() {
                let owned = ownership.get(&relative).map(|o| o == package).unwrap_or(false);
                if !force && !owned {
                    conflicts.push(relative);
                }
            }
        }
        conflicts
    }

    /// Mutation phase: run every step in order. Backups accumulate until
    /// all steps succeed; a failing step triggers a reverse-order restore
    /// of everything replaced so far.
    fn execute_steps(&self, plan: &Plan) -> Result<Vec<ReceiptFile>> {
        let mut backups: Vec<(PathBuf, PathBuf)> = Vec::new();
        let mut extracted: Vec<ReceiptFile> = Vec::new();

        for step in &plan.steps {
            let result = match step {
                Step::EnsureDir { target } => {
                    debug!("mkdir {}", target.display());
                    fsops::ensure_dir(target)
                }
                Step::AtomicFileReplace { target, source, mode } => {
                    debug!("install {} -> {}", source.display(), target.display());
                    fsops::install_file_atomic(target, source, *mode).map(|backup| {
                        if let Some(backup) = backup {
                            backups.push((target.clone(), backup));
                        }
                    })
                }
                Step::AtomicSymlink { target, to } => {
                    debug!("symlink {} -> {}", target.display(), to);
                    fsops::replace_symlink_atomic(target, to).map(|backup| {
                        if let Some(backup) = backup {
                            backups.push((target.clone(), backup));
                        }
                    })
                }
                Step::ExtractArchive {
                    archive: path,
                    format,
                    target_dir,
                    action,
                } => archive::extract(path, *format, target_dir, action),
                Step::HashExtracted { target_dir, files } => self
                    .hash_extracted(target_dir, files)
                    .map(|entries| extracted.extend(entries)),
            };

            if let Err(e) = result {
                warn!("install step failed: {}, restoring backups", e);
                for (target, backup) in backups.iter().rev() {
                    let _ = fsops::restore_backup(target, backup);
                }
                return Err(e);
            }
        }

        for (_, backup) in &backups {
            fsops::discard_backup(backup);
        }
        Ok(extracted)
    }

    /// Snapshot extracted files into receipt entries with their on-disk
    /// hash and permission bits
    fn hash_extracted(&self, target_dir: &Path, files: &[String]) -> Result<Vec<ReceiptFile>> {
        use std::os::unix::fs::PermissionsExt;
        let mut entries = Vec::with_capacity(files.len());
        for name in files {
            let target = target_dir.join(name);
            let metadata = fs::metadata(&target)?;
            if metadata.is_dir() {
                continue;
            }
            let sha256 = fsops::hash_file(&target)?;
            entries.push(ReceiptFile {
                path: fsops::normalize_for_receipt(&self.root, &target),
                kind: FileKind::File,
                mode: metadata.permissions().mode() & 0o777,
                sha256,
                to: String::new(),
                preserve: false,
            });
        }
        Ok(entries)
    }

    /// Upgrade reconciliation: delete paths the old receipt lists that the
    /// new one does not, honouring `preserve`; absence is not an error
    fn reconcile_obsolete(&self, old: &Receipt, new: &Receipt) {
        let current: std::collections::BTreeSet<&str> =
            new.files.iter().map(|f| f.path.as_str()).collect();
        for file in &old.files {
            if current.contains(file.path.as_str()) {
                continue;
            }
            if file.preserve {
                continue;
            }
            let target = fsops::join_root(&self.root, &file.path);
            debug!("reconcile remove {}", target.display());
            remove_entry(&target, file.kind);
        }
    }

    fn run_hooks(&self, commands: &[String]) {
        for command in commands {
            if command.trim().is_empty() {
                continue;
            }
            debug!("hook: {}", command);
            self.hooks.run(command);
        }
    }
}

/// Remove one receipt entry from disk, tolerating absence. Directories
/// are only removed when empty.
fn remove_entry(target: &Path, kind: FileKind) {
    match kind {
        FileKind::File | FileKind::Symlink => {
            let _ = fs::remove_file(target);
        }
        FileKind::Dir => {
            let _ = fs::remove_dir(target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    struct RecordingHookRunner {
        commands: Arc<Mutex<Vec<String>>>,
    }

    impl HookRunner for RecordingHookRunner {
        fn run(&self, command: &str) {
            self.commands.lock().unwrap().push(command.to_string());
        }
    }

    fn test_manager(root: &Path) -> Manager {
        let config = Config {
            packages_dir: "var/lib/ghpm/packages".to_string(),
            state_dir: "var/lib/ghpm/state".to_string(),
            cache_dir: "var/cache/ghpm".to_string(),
            ..Config::default()
        };
        let manager = Manager::new(config, root.to_path_buf()).unwrap();
        manager.config.ensure_dirs(root).unwrap();
        manager
    }

    fn write_package(manager: &Manager, name: &str, manifest: &str, files: &[(&str, &[u8])]) {
        let pkg_dir = manager.packages_dir().join(name);
        fs::create_dir_all(pkg_dir.join("files")).unwrap();
        fs::write(pkg_dir.join("package.yaml"), manifest).unwrap();
        for (path, data) in files {
            fs::write(pkg_dir.join(path), data).unwrap();
        }
    }

    #[test]
    fn test_install_and_remove_raw_file() {
        let dir = tempdir().unwrap();
        let manager = test_manager(dir.path());
        write_package(
            &manager,
            "tool",
            r#"
name: tool
install:
  - type: file
    path: files/tool
    target: /usr/local/bin/tool
    mode: "0755"
"#,
            &[("files/tool", b"#!/bin/sh\necho tool\n")],
        );

        let opts = InstallOptions {
            version: "v1.0.0".to_string(),
            ..InstallOptions::default()
        };
        let receipt = manager.install("tool", &opts).unwrap();
        assert_eq!(receipt.name, "tool");
        assert_eq!(receipt.files.len(), 1);
        assert_eq!(receipt.files[0].path, "/usr/local/bin/tool");
        assert_eq!(receipt.files[0].mode, 0o755);

        let installed_path = dir.path().join("usr/local/bin/tool");
        assert!(installed_path.exists());
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&installed_path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o755);
        }

        // index points at a receipt that exists and decodes
        let index = state::load_installed(&state::installed_path(&manager.state_dir())).unwrap();
        let entry = index.installed.get("tool").unwrap();
        assert_eq!(entry.version, "v1.0.0");
        state::load_receipt(&manager.state_dir().join(&entry.receipt)).unwrap();

        manager.remove("tool", &RemoveOptions::default()).unwrap();
        assert!(!installed_path.exists());
        let index = state::load_installed(&state::installed_path(&manager.state_dir())).unwrap();
        assert!(index.installed.is_empty());
    }

    #[test]
    fn test_reinstall_same_version_is_noop() {
        let dir = tempdir().unwrap();
        let manager = test_manager(dir.path());
        write_package(
            &manager,
            "tool",
            "name: tool\ninstall:\n  - type: file\n    path: files/tool\n    target: /usr/local/bin/tool\n",
            &[("files/tool", b"v1")],
        );

        let opts = InstallOptions {
            version: "v1.0.0".to_string(),
            ..InstallOptions::default()
        };
        let first = manager.install("tool", &opts).unwrap();

        // mutate the target behind ghpm's back; a same-version reinstall
        // must not repair it without --force
        let target = dir.path().join("usr/local/bin/tool");
        fs::write(&target, b"tampered").unwrap();

        let second = manager.install("tool", &opts).unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::read(&target).unwrap(), b"tampered");

        // --force reinstalls
        let forced = InstallOptions {
            version: "v1.0.0".to_string(),
            force: true,
            ..InstallOptions::default()
        };
        manager.install("tool", &forced).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"v1");
    }

    #[test]
    fn test_symlink_action() {
        let dir = tempdir().unwrap();
        let manager = test_manager(dir.path());
        write_package(
            &manager,
            "k3s",
            r#"
name: k3s
install:
  - type: file
    path: files/k3s
    target: /usr/local/bin/k3s
    mode: "0755"
  - type: symlink
    target: /usr/local/bin/kubectl
    to: k3s
"#,
            &[("files/k3s", b"binary")],
        );

        let opts = InstallOptions {
            version: "v1.2.3".to_string(),
            ..InstallOptions::default()
        };
        let receipt = manager.install("k3s", &opts).unwrap();
        let link = dir.path().join("usr/local/bin/kubectl");
        assert_eq!(fs::read_link(&link).unwrap(), Path::new("k3s"));
        assert_eq!(receipt.files[1].kind, FileKind::Symlink);
        assert_eq!(receipt.files[1].to, "k3s");

        manager.remove("k3s", &RemoveOptions::default()).unwrap();
        assert!(link.symlink_metadata().is_err());
    }

    #[test]
    fn test_install_conflict_between_packages() {
        let dir = tempdir().unwrap();
        let manager = test_manager(dir.path());
        let manifest = "name: %NAME%\ninstall:\n  - type: file\n    path: files/foo\n    target: /usr/local/bin/foo\n";
        write_package(&manager, "p", &manifest.replace("%NAME%", "p"), &[("files/foo", b"p")]);
        write_package(&manager, "q", &manifest.replace("%NAME%", "q"), &[("files/foo", b"q")]);

        let opts = InstallOptions {
            version: "v1".to_string(),
            ..InstallOptions::default()
        };
        manager.install("p", &opts).unwrap();

        match manager.install("q", &opts).unwrap_err() {
            Error::InstallConflict(paths) => {
                assert_eq!(paths, vec!["/usr/local/bin/foo".to_string()]);
            }
            other => panic!("expected InstallConflict, got {:?}", other),
        }
        // q must not have a receipt
        assert!(state::load_receipt(&state::receipt_path(&manager.state_dir(), "q")).is_err());
    }

    #[test]
    fn test_existing_unowned_file_conflicts_without_force() {
        let dir = tempdir().unwrap();
        let manager = test_manager(dir.path());
        write_package(
            &manager,
            "tool",
            "name: tool\ninstall:\n  - type: file\n    path: files/tool\n    target: /usr/local/bin/tool\n",
            &[("files/tool", b"new")],
        );
        let target = dir.path().join("usr/local/bin/tool");
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, b"preexisting").unwrap();

        let opts = InstallOptions {
            version: "v1".to_string(),
            ..InstallOptions::default()
        };
        assert!(matches!(
            manager.install("tool", &opts),
            Err(Error::InstallConflict(_))
        ));

        let forced = InstallOptions {
            version: "v1".to_string(),
            force: true,
            ..InstallOptions::default()
        };
        manager.install("tool", &forced).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"new");
    }

    #[test]
    fn test_preserve_on_remove_and_purge() {
        let dir = tempdir().unwrap();
        let manager = test_manager(dir.path());
        write_package(
            &manager,
            "svc",
            r#"
name: svc
install:
  - type: file
    path: files/svc.service
    target: /etc/svc.service
    mode: "0644"
    preserve: true
"#,
            &[("files/svc.service", b"[Unit]\n")],
        );

        let opts = InstallOptions {
            version: "v1".to_string(),
            ..InstallOptions::default()
        };
        manager.install("svc", &opts).unwrap();
        let config_path = dir.path().join("etc/svc.service");
        assert!(config_path.exists());

        manager.remove("svc", &RemoveOptions { purge: false }).unwrap();
        assert!(config_path.exists(), "preserved file must survive remove");

        manager.install("svc", &opts).unwrap();
        manager.remove("svc", &RemoveOptions { purge: true }).unwrap();
        assert!(!config_path.exists(), "purge removes preserved files");
    }

    #[test]
    fn test_upgrade_reconciles_obsolete_files() {
        let dir = tempdir().unwrap();
        let manager = test_manager(dir.path());
        write_package(
            &manager,
            "x",
            r#"
name: x
install:
  - type: file
    path: files/a
    target: /opt/x/bin/a
  - type: file
    path: files/b
    target: /opt/x/bin/b
"#,
            &[("files/a", b"a1"), ("files/b", b"b1")],
        );

        let v1 = InstallOptions {
            version: "v1".to_string(),
            ..InstallOptions::default()
        };
        manager.install("x", &v1).unwrap();
        assert!(dir.path().join("opt/x/bin/b").exists());

        // v2 drops b and adds c
        write_package(
            &manager,
            "x",
            r#"
name: x
install:
  - type: file
    path: files/a
    target: /opt/x/bin/a
  - type: file
    path: files/c
    target: /opt/x/bin/c
"#,
            &[("files/a", b"a2"), ("files/c", b"c2")],
        );
        let v2 = InstallOptions {
            version: "v2".to_string(),
            ..InstallOptions::default()
        };
        manager.install("x", &v2).unwrap();

        assert_eq!(fs::read(dir.path().join("opt/x/bin/a")).unwrap(), b"a2");
        assert!(!dir.path().join("opt/x/bin/b").exists());
        assert_eq!(fs::read(dir.path().join("opt/x/bin/c")).unwrap(), b"c2");
    }

    #[test]
    fn test_status_after_install_and_after_tamper() {
        let dir = tempdir().unwrap();
        let manager = test_manager(dir.path());
        write_package(
            &manager,
            "tool",
            r#"
name: tool
install:
  - type: file
    path: files/tool
    target: /usr/local/bin/tool
  - type: symlink
    target: /usr/local/bin/t
    to: tool
"#,
            &[("files/tool", b"payload")],
        );

        let opts = InstallOptions {
            version: "v1".to_string(),
            ..InstallOptions::default()
        };
        manager.install("tool", &opts).unwrap();

        let (_, status) = manager.status("tool").unwrap();
        assert!(status.iter().all(|(_, ok)| *ok), "fresh install verifies clean");

        fs::write(dir.path().join("usr/local/bin/tool"), b"tampered").unwrap();
        let (_, status) = manager.status("tool").unwrap();
        assert_eq!(status[0], ("/usr/local/bin/tool".to_string(), false));
        assert_eq!(status[1], ("/usr/local/bin/t".to_string(), true));
    }

    #[test]
    fn test_install_remove_install_round_trip() {
        let dir = tempdir().unwrap();
        let manager = test_manager(dir.path());
        write_package(
            &manager,
            "tool",
            "name: tool\ninstall:\n  - type: file\n    path: files/tool\n    target: /usr/local/bin/tool\n",
            &[("files/tool", b"bytes")],
        );

        let opts = InstallOptions {
            version: "v1".to_string(),
            ..InstallOptions::default()
        };
        let first = manager.install("tool", &opts).unwrap();
        manager.remove("tool", &RemoveOptions::default()).unwrap();
        let second = manager.install("tool", &opts).unwrap();
        assert_eq!(first.files, second.files);
        assert!(dir.path().join("usr/local/bin/tool").exists());
    }

    #[test]
    fn test_hooks_run_after_install_and_remove() {
        let dir = tempdir().unwrap();
        let mut manager = test_manager(dir.path());
        let commands = Arc::new(Mutex::new(Vec::new()));
        manager.set_hook_runner(Box::new(RecordingHookRunner {
            commands: commands.clone(),
        }));

        write_package(
            &manager,
            "tool",
            r#"
name: tool
install:
  - type: file
    path: files/tool
    target: /usr/local/bin/tool
postInstall:
  - echo installed
  - "   "
postRemove:
  - echo removed
"#,
            &[("files/tool", b"x")],
        );

        let opts = InstallOptions {
            version: "v1".to_string(),
            ..InstallOptions::default()
        };
        manager.install("tool", &opts).unwrap();
        manager.remove("tool", &RemoveOptions::default()).unwrap();

        let commands = commands.lock().unwrap();
        // blank hook entries are skipped
        assert_eq!(*commands, vec!["echo installed".to_string(), "echo removed".to_string()]);
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let dir = tempdir().unwrap();
        let manager = test_manager(dir.path());
        write_package(
            &manager,
            "tool",
            "name: tool\ninstall:\n  - type: file\n    path: files/tool\n    target: /usr/local/bin/tool\n",
            &[("files/tool", b"x")],
        );

        let opts = InstallOptions {
            version: "v1".to_string(),
            dry_run: true,
            ..InstallOptions::default()
        };
        let receipt = manager.install("tool", &opts).unwrap();
        assert_eq!(receipt.files.len(), 1);
        assert!(!dir.path().join("usr/local/bin/tool").exists());
        assert!(state::load_receipt(&state::receipt_path(&manager.state_dir(), "tool")).is_err());
    }

    #[test]
    fn test_upgrade_dry_run_reports_change_without_mutation() {
        let dir = tempdir().unwrap();
        let manager = test_manager(dir.path());
        write_package(
            &manager,
            "tool",
            "name: tool\ninstall:\n  - type: file\n    path: files/tool\n    target: /usr/local/bin/tool\n",
            &[("files/tool", b"x")],
        );

        let opts = InstallOptions {
            version: "v1".to_string(),
            ..InstallOptions::default()
        };
        manager.install("tool", &opts).unwrap();

        // sourceless manifests resolve an empty latest tag, which differs
        // from the recorded version
        let dry = InstallOptions {
            dry_run: true,
            ..InstallOptions::default()
        };
        let (changed, receipt) = manager.upgrade("tool", &dry).unwrap();
        assert!(changed);
        assert_eq!(receipt.name, "tool");
        assert_eq!(fs::read(dir.path().join("usr/local/bin/tool")).unwrap(), b"x");
    }

    #[test]
    fn test_upgrade_of_missing_package_installs() {
        let dir = tempdir().unwrap();
        let manager = test_manager(dir.path());
        write_package(
            &manager,
            "tool",
            "name: tool\ninstall:\n  - type: file\n    path: files/tool\n    target: /usr/local/bin/tool\n",
            &[("files/tool", b"x")],
        );

        let opts = InstallOptions {
            version: "v1".to_string(),
            ..InstallOptions::default()
        };
        let (changed, receipt) = manager.upgrade("tool", &opts).unwrap();
        assert!(changed);
        assert_eq!(receipt.source.tag, "v1");
        assert!(dir.path().join("usr/local/bin/tool").exists());
    }

    #[test]
    fn test_list_manifests_cross_references_nothing_extra() {
        let dir = tempdir().unwrap();
        let manager = test_manager(dir.path());
        write_package(&manager, "b-tool", "name: b-tool\n", &[]);
        write_package(&manager, "a-tool", "name: a-tool\n", &[]);
        // a stray file and a directory without a manifest are ignored
        fs::write(manager.packages_dir().join("README"), b"x").unwrap();
        fs::create_dir_all(manager.packages_dir().join("empty")).unwrap();

        let manifests = manager.list_manifests().unwrap();
        let names: Vec<&str> = manifests.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["a-tool", "b-tool"]);
    }

    #[test]
    fn test_remove_missing_receipt_is_an_error() {
        let dir = tempdir().unwrap();
        let manager = test_manager(dir.path());
        assert!(manager.remove("ghost", &RemoveOptions::default()).is_err());
    }

    #[test]
    fn test_extract_action_end_to_end() {
        let dir = tempdir().unwrap();
        let manager = test_manager(dir.path());

        // build the package-local archive
        let pkg_dir = manager.packages_dir().join("bundle");
        fs::create_dir_all(pkg_dir.join("files")).unwrap();
        fs::write(
            pkg_dir.join("package.yaml"),
            r#"
name: bundle
install:
  - type: extract
    from:
      type: file
      path: files/bundle.tar.gz
    targetDir: /opt/bundle
    pick: ["ghpm", "README.md", "doc/*.md", "examples/**/package.yaml"]
"#,
        )
        .unwrap();

        let archive_path = pkg_dir.join("files/bundle.tar.gz");
        let file = fs::File::create(&archive_path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data, mode) in [
            ("ghpm", &b"binary"[..], 0o755u32),
            ("README.md", &b"readme"[..], 0o644),
            ("doc/ref.md", &b"ref"[..], 0o644),
            ("examples/k3s/package.yaml", &b"name: k3s"[..], 0o644),
            ("unrelated.txt", &b"junk"[..], 0o644),
        ] {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(mode);
            header.set_entry_type(tar::EntryType::Regular);
            header.set_cksum();
            builder.append_data(&mut header, name, data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();

        let opts = InstallOptions {
            version: "v1".to_string(),
            ..InstallOptions::default()
        };
        let receipt = manager.install("bundle", &opts).unwrap();

        let base = dir.path().join("opt/bundle");
        assert!(base.join("ghpm").exists());
        assert!(base.join("README.md").exists());
        assert!(base.join("doc/ref.md").exists());
        assert!(base.join("examples/k3s/package.yaml").exists());
        assert!(!base.join("unrelated.txt").exists());

        // one receipt file entry per picked file, each carrying a hash
        assert_eq!(receipt.files.len(), 4);
        assert!(receipt.files.iter().all(|f| !f.sha256.is_empty()));
        assert!(receipt
            .files
            .iter()
            .any(|f| f.path == "/opt/bundle/examples/k3s/package.yaml"));

        manager.remove("bundle", &RemoveOptions::default()).unwrap();
        assert!(!base.join("ghpm").exists());
        assert!(!base.join("README.md").exists());
    }

    #[test]
    fn test_self_register() {
        let dir = tempdir().unwrap();
        let manager = test_manager(dir.path());

        let receipt = manager.self_register("v9.9.9").unwrap();
        assert_eq!(receipt.name, "ghpm");
        assert_eq!(receipt.source.tag, "v9.9.9");
        assert_eq!(receipt.files.len(), 1);
        assert!(!receipt.files[0].sha256.is_empty());

        // the generated manifest loads cleanly
        let manifest = manager.load_manifest("ghpm").unwrap();
        assert_eq!(manifest.name, "ghpm");
        assert_eq!(manifest.install.len(), 1);

        let index = state::load_installed(&state::installed_path(&manager.state_dir())).unwrap();
        assert_eq!(index.installed.get("ghpm").unwrap().version, "v9.9.9");
    }
}
