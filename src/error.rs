// src/error.rs

use thiserror::Error;

/// Core error types for ghpm
#[derive(Error, Debug)]
pub enum Error {
    /// Manifest file could not be read or decoded
    #[error("malformed manifest {path}: {reason}")]
    MalformedManifest { path: String, reason: String },

    /// A single install action failed structural validation
    #[error("install[{index}]: {reason}")]
    InvalidAction { index: usize, reason: String },

    /// Configuration file could not be decoded
    #[error("config error: {0}")]
    Config(String),

    /// Resolver could not locate a release or asset
    #[error("not found: {0}")]
    NotFound(String),

    /// HTTP request failed before a response was received
    #[error("network error: {0}")]
    Network(String),

    /// Download completed abnormally (non-200 status, short body)
    #[error("download failed: {0}")]
    Download(String),

    /// Archive suffix did not match any supported format
    #[error("cannot infer archive format for {0}; set extract.format")]
    UnknownArchiveFormat(String),

    /// Archive could not be read or extracted
    #[error("archive error: {0}")]
    Archive(String),

    /// One or more install targets are owned by another package or
    /// already exist on disk
    #[error("install conflicts: {}", .0.join(", "))]
    InstallConflict(Vec<String>),

    /// On-disk state does not match the receipt
    #[error("verification failed: {0}")]
    VerificationFailed(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persistent state (receipt or installed index) failed to decode
    #[error("state error: {0}")]
    State(String),
}

impl Error {
    /// Process exit code for this error per the CLI contract
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::MalformedManifest { .. } | Error::InvalidAction { .. } => 2,
            Error::NotFound(_) | Error::Network(_) | Error::Download(_) => 3,
            Error::InstallConflict(_) => 4,
            Error::VerificationFailed(_) => 5,
            _ => 1,
        }
    }
}

/// Result type alias using ghpm's Error type
pub type Result<T> = std::result::Result<T, Error>;
