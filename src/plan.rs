// src/plan.rs

//! Install planning
//!
//! The planner turns a manifest plus a resolved release into a [`Plan`]:
//! an ordered list of [`Step`] values, the absolute paths those steps will
//! touch, and the provisional receipt entries. All remote fetches and
//! archive listings happen here, before any mutation, so a failing
//! download or unreadable archive aborts with the live filesystem
//! untouched. Steps themselves are plain data; the transactor interprets
//! them, which keeps dry-run trivial.

use crate::archive::{self, ArchiveFormat};
use crate::cache::DownloadCache;
use crate::error::Result;
use crate::fsops;
use crate::manifest::{
    expand_template, Action, ExtractAction, ExtractFrom, Manifest, TemplateContext,
};
use crate::source::{self, Release};
use crate::state::{Artifact, ArtifactKind, FileKind, ReceiptFile};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One deferred filesystem operation
#[derive(Debug)]
pub enum Step {
    /// `mkdir -p` at 0755
    EnsureDir { target: PathBuf },
    /// Copy `source` over `target` with the atomic-replace discipline
    AtomicFileReplace {
        target: PathBuf,
        source: PathBuf,
        mode: u32,
    },
    /// Replace the symlink at `target` pointing to `to`
    AtomicSymlink { target: PathBuf, to: String },
    /// Unpack an archive into the live target directory
    ExtractArchive {
        archive: PathBuf,
        format: ArchiveFormat,
        target_dir: PathBuf,
        action: ExtractAction,
    },
    /// Snapshot extracted files into receipt entries after extraction
    HashExtracted {
        target_dir: PathBuf,
        files: Vec<String>,
    },
}

/// Ordered mutations plus the provisional receipt content
#[derive(Debug, Default)]
pub struct Plan {
    pub steps: Vec<Step>,
    /// Absolute on-disk paths the steps will touch, in declaration order
    pub targets: Vec<PathBuf>,
    /// Receipt `files[]` entries known at planning time (extract entries
    /// are appended by the transactor once hashes exist)
    pub receipt_files: Vec<ReceiptFile>,
    pub artifacts: Vec<Artifact>,
}

/// Builds plans against an install root, fetching through the cache
pub struct Planner<'a> {
    pub root: &'a Path,
    pub cache: &'a DownloadCache,
}

impl<'a> Planner<'a> {
    /// Traverse the manifest's actions in order and materialise the plan
    pub fn plan(
        &self,
        manifest: &Manifest,
        release: &Release,
        ctx: &TemplateContext,
    ) -> Result<Plan> {
        let mut plan = Plan::default();
        for action in &manifest.install {
            match action {
                Action::Mkdir(a) => {
                    let rel = expand_template(&a.path, ctx);
                    let target = fsops::join_root(self.root, &rel);
                    plan.targets.push(target.clone());
                    plan.steps.push(Step::EnsureDir { target });
                    plan.receipt_files.push(ReceiptFile {
                        path: rel,
                        kind: FileKind::Dir,
                        mode: parse_mode(&a.mode),
                        sha256: String::new(),
                        to: String::new(),
                        preserve: false,
                    });
                }
                Action::Symlink(a) => {
                    let rel = expand_template(&a.target, ctx);
                    let to = expand_template(&a.to, ctx);
                    let target = fsops::join_root(self.root, &rel);
                    plan.targets.push(target.clone());
                    plan.steps.push(Step::AtomicSymlink {
                        target,
                        to: to.clone(),
                    });
                    plan.receipt_files.push(ReceiptFile {
                        path: rel,
                        kind: FileKind::Symlink,
                        mode: 0,
                        sha256: String::new(),
                        to,
                        preserve: false,
                    });
                }
                Action::File(a) => {
                    let rel = expand_template(&a.target, ctx);
                    let target = fsops::join_root(self.root, &rel);
                    let source = manifest.package_dir().join(&a.path);
                    let (sha256, size) = fsops::hash_file_with_size(&source)?;
                    plan.targets.push(target.clone());
                    plan.steps.push(Step::AtomicFileReplace {
                        target,
                        source,
                        mode: parse_mode(&a.mode),
                    });
                    plan.receipt_files.push(ReceiptFile {
                        path: rel,
                        kind: FileKind::File,
                        mode: parse_mode(&a.mode),
                        sha256: sha256.clone(),
                        to: String::new(),
                        preserve: a.preserve,
                    });
                    plan.artifacts.push(Artifact {
                        kind: ArtifactKind::File,
                        name: a.path.clone(),
                        url: String::new(),
                        sha256,
                        size,
                    });
                }
                Action::Url(a) => {
                    let url = expand_template(&a.url, ctx);
                    let rel = expand_template(&a.target, ctx);
                    let target = fsops::join_root(self.root, &rel);
                    let fetched = self.cache.fetch(&url)?;
                    plan.targets.push(target.clone());
                    plan.steps.push(Step::AtomicFileReplace {
                        target,
                        source: fetched.path,
                        mode: parse_mode(&a.mode),
                    });
                    plan.receipt_files.push(ReceiptFile {
                        path: rel,
                        kind: FileKind::File,
                        mode: parse_mode(&a.mode),
                        sha256: fetched.sha256.clone(),
                        to: String::new(),
                        preserve: a.preserve,
                    });
                    plan.artifacts.push(Artifact {
                        kind: ArtifactKind::Url,
                        name: String::new(),
                        url,
                        sha256: fetched.sha256,
                        size: fetched.size,
                    });
                }
                Action::Asset(a) => {
                    let name = expand_template(&a.name, ctx);
                    let pattern = expand_template(&a.pattern, ctx);
                    let asset = source::select_asset(release, &name, &pattern)?;
                    let rel = expand_template(&a.target, ctx);
                    let target = fsops::join_root(self.root, &rel);
                    info!("download {} {}", asset.name, asset.url);
                    let fetched = self.cache.fetch(&asset.url)?;
                    plan.targets.push(target.clone());
                    plan.steps.push(Step::AtomicFileReplace {
                        target,
                        source: fetched.path,
                        mode: parse_mode(&a.mode),
                    });
                    plan.receipt_files.push(ReceiptFile {
                        path: rel,
                        kind: FileKind::File,
                        mode: parse_mode(&a.mode),
                        sha256: fetched.sha256.clone(),
                        to: String::new(),
                        preserve: a.preserve,
                    });
                    plan.artifacts.push(Artifact {
                        kind: ArtifactKind::Asset,
                        name: asset.name,
                        url: asset.url,
                        sha256: fetched.sha256,
                        size: fetched.size,
                    });
                }
                Action::Extract(a) => {
                    self.plan_extract(manifest, release, ctx, a, &mut plan)?;
                }
            }
        }
        Ok(plan)
    }

    fn plan_extract(
        &self,
        manifest: &Manifest,
        release: &Release,
        ctx: &TemplateContext,
        action: &ExtractAction,
        plan: &mut Plan,
    ) -> Result<()> {
        let (archive_path, hint) = match &action.from {
            ExtractFrom::Asset { name, pattern } => {
                let name = expand_template(name, ctx);
                let pattern = expand_template(pattern, ctx);
                let asset = source::select_asset(release, &name, &pattern)?;
                info!("download {} {}", asset.name, asset.url);
                let fetched = self.cache.fetch(&asset.url)?;
                let hint = if fetched.hint.is_empty() {
                    asset.name
                } else {
                    fetched.hint
                };
                (fetched.path, hint)
            }
            ExtractFrom::Url { url } => {
                let url = expand_template(url, ctx);
                let fetched = self.cache.fetch(&url)?;
                (fetched.path, fetched.hint)
            }
            ExtractFrom::File { path } => {
                let local = manifest.package_dir().join(expand_template(path, ctx));
                let hint = local
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                (local, hint)
            }
        };

        let format = archive::resolve_format(action, &hint, &archive_path)?;
        let (files, skipped) = archive::list(&archive_path, format, action)?;

        let target_dir = fsops::join_root(self.root, &expand_template(&action.target_dir, ctx));
        info!("extract {} -> {}", hint, target_dir.display());
        for name in &skipped {
            debug!("skip {}", name);
        }
        for name in &files {
            plan.targets.push(target_dir.join(name));
        }
        plan.steps.push(Step::ExtractArchive {
            archive: archive_path,
            format,
            target_dir: target_dir.clone(),
            action: action.clone(),
        });
        plan.steps.push(Step::HashExtracted { target_dir, files });
        Ok(())
    }
}

/// Parse a manifest mode string as octal. Empty or unparsable strings
/// yield the 0 sentinel, meaning "do not explicitly chmod".
pub fn parse_mode(value: &str) -> u32 {
    let mut mode = 0u32;
    let mut seen = false;
    for ch in value.chars() {
        match ch.to_digit(8) {
            Some(d) => {
                mode = mode * 8 + d;
                seen = true;
            }
            None => break,
        }
    }
    if seen {
        mode
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;
    use reqwest::blocking::Client;
    use std::fs;
    use tempfile::tempdir;

    fn load_manifest(pkg_dir: &Path, content: &str) -> Manifest {
        fs::create_dir_all(pkg_dir).unwrap();
        let path = pkg_dir.join("package.yaml");
        fs::write(&path, content).unwrap();
        Manifest::load(&path).unwrap()
    }

    fn ctx() -> TemplateContext {
        TemplateContext {
            version: "v1.0.0".to_string(),
            tag: "v1.0.0".to_string(),
            os: "linux".to_string(),
            arch: "x86_64".to_string(),
            repo: "acme/tool".to_string(),
            name: "tool".to_string(),
        }
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("0755"), 0o755);
        assert_eq!(parse_mode("644"), 0o644);
        assert_eq!(parse_mode(""), 0);
        assert_eq!(parse_mode("rwx"), 0);
        // parsing stops at the first non-octal digit
        assert_eq!(parse_mode("75x"), 0o75);
    }

    #[test]
    fn test_plan_file_symlink_mkdir() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        let pkg = dir.path().join("packages/tool");
        let manifest = load_manifest(
            &pkg,
            r#"
name: tool
install:
  - type: mkdir
    path: /opt/tool
    mode: "0750"
  - type: file
    path: files/tool.conf
    target: /etc/tool.conf
    mode: "0644"
    preserve: true
  - type: symlink
    target: /usr/local/bin/t
    to: tool-{version}
"#,
        );
        fs::create_dir_all(pkg.join("files")).unwrap();
        fs::write(pkg.join("files/tool.conf"), b"key=value\n").unwrap();

        let cache = DownloadCache::new(dir.path().join("cache"), Client::new(), 0);
        let planner = Planner {
            root: &root,
            cache: &cache,
        };
        let plan = planner.plan(&manifest, &Release::default(), &ctx()).unwrap();

        assert_eq!(plan.steps.len(), 3);
        assert_eq!(
            plan.targets,
            vec![
                root.join("opt/tool"),
                root.join("etc/tool.conf"),
                root.join("usr/local/bin/t"),
            ]
        );

        assert_eq!(plan.receipt_files[0].kind, FileKind::Dir);
        assert_eq!(plan.receipt_files[0].mode, 0o750);
        assert_eq!(plan.receipt_files[1].kind, FileKind::File);
        assert!(plan.receipt_files[1].preserve);
        assert!(!plan.receipt_files[1].sha256.is_empty());
        assert_eq!(plan.receipt_files[2].kind, FileKind::Symlink);
        assert_eq!(plan.receipt_files[2].to, "tool-v1.0.0");

        // one artifact for the package-local file
        assert_eq!(plan.artifacts.len(), 1);
        assert_eq!(plan.artifacts[0].kind, ArtifactKind::File);
        assert_eq!(plan.artifacts[0].size, 10);
    }

    #[test]
    fn test_plan_extract_from_local_file() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        let pkg = dir.path().join("packages/bundle");
        let manifest = load_manifest(
            &pkg,
            r#"
name: bundle
install:
  - type: extract
    from:
      type: file
      path: files/bundle.tar.gz
    targetDir: /opt/bundle
    stripComponents: 1
    pick: ["bin/*", "README.md"]
"#,
        );

        // bundle.tar.gz with a top-level directory to strip
        fs::create_dir_all(pkg.join("files")).unwrap();
        let archive = pkg.join("files/bundle.tar.gz");
        let file = fs::File::create(&archive).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in [
            ("bundle-1.0/bin/run", &b"#!/bin/sh\n"[..]),
            ("bundle-1.0/README.md", &b"docs"[..]),
            ("bundle-1.0/extra.txt", &b"junk"[..]),
        ] {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            header.set_cksum();
            builder.append_data(&mut header, name, data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();

        let cache = DownloadCache::new(dir.path().join("cache"), Client::new(), 0);
        let planner = Planner {
            root: &root,
            cache: &cache,
        };
        let plan = planner.plan(&manifest, &Release::default(), &ctx()).unwrap();

        assert_eq!(
            plan.targets,
            vec![
                root.join("opt/bundle/bin/run"),
                root.join("opt/bundle/README.md"),
            ]
        );
        // extraction then hashing
        assert_eq!(plan.steps.len(), 2);
        match &plan.steps[1] {
            Step::HashExtracted { files, .. } => {
                assert_eq!(files, &vec!["bin/run".to_string(), "README.md".to_string()]);
            }
            other => panic!("expected HashExtracted, got {:?}", other),
        }
        // extract receipt entries appear only after execution
        assert!(plan.receipt_files.is_empty());
    }

    #[test]
    fn test_plan_url_action_uses_cache(){
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        let pkg = dir.path().join("packages/svc");
        let manifest = load_manifest(
            &pkg,
            r#"
name: svc
install:
  - type: url
    url: https://downloads.invalid/{name}.service
    target: /etc/systemd/system/svc.service
    mode: "0644"
    preserve: true
"#,
        );

        // seed the cache so planning needs no network
        let cache_dir = dir.path().join("cache");
        fs::create_dir_all(&cache_dir).unwrap();
        let url = "https://downloads.invalid/svc.service";
        let mut hasher = <sha2::Sha256 as sha2::Digest>::new();
        sha2::Digest::update(&mut hasher, url.as_bytes());
        let key = format!("{:x}-svc.service", sha2::Digest::finalize(hasher));
        fs::write(cache_dir.join(&key), b"[Unit]\n").unwrap();

        let cache = DownloadCache::new(cache_dir, Client::new(), 0);
        let planner = Planner {
            root: &root,
            cache: &cache,
        };
        let svc_ctx = TemplateContext {
            name: "svc".to_string(),
            ..ctx()
        };
        let plan = planner.plan(&manifest, &Release::default(), &svc_ctx).unwrap();

        assert_eq!(plan.artifacts.len(), 1);
        assert_eq!(plan.artifacts[0].kind, ArtifactKind::Url);
        assert_eq!(plan.artifacts[0].url, url);
        assert_eq!(plan.artifacts[0].size, 7);
        assert!(plan.receipt_files[0].preserve);
    }

    #[test]
    fn test_plan_missing_local_file_fails_before_mutation() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        let pkg = dir.path().join("packages/tool");
        let manifest = load_manifest(
            &pkg,
            "name: tool\ninstall:\n  - type: file\n    path: files/absent\n    target: /etc/x\n",
        );
        let cache = DownloadCache::new(dir.path().join("cache"), Client::new(), 0);
        let planner = Planner {
            root: &root,
            cache: &cache,
        };
        assert!(planner.plan(&manifest, &Release::default(), &ctx()).is_err());
    }
}
