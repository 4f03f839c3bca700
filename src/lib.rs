// src/lib.rs

//! ghpm — declarative package manager for forge release artifacts
//!
//! Administrators declare, per package, a YAML manifest naming a release
//! source and an ordered list of install actions. ghpm resolves a version,
//! fetches artifacts through a content-addressed cache, installs them
//! under a configurable root with atomic replacement, records a receipt,
//! and supports idempotent upgrade, removal with preservation rules, and
//! verification against on-disk state.
//!
//! # Architecture
//!
//! - Declarative manifests: `package.yaml` per package, tagged action list
//! - Plan as data: the planner emits inspectable steps, the transactor
//!   interprets them
//! - Receipts: per-package JSON records with per-file SHA-256 hashes
//! - Ownership: cross-package conflict detection from the installed index
//! - Atomic replacement: write-new, backup, rename; backups restored in
//!   reverse order on mid-flight failure

pub mod archive;
pub mod cache;
pub mod config;
mod error;
pub mod fsops;
pub mod manager;
pub mod manifest;
pub mod plan;
pub mod source;
pub mod state;

pub use error::{Error, Result};
