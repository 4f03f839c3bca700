// src/cache.rs

//! Content-addressed download cache
//!
//! Fetched URLs land under `<cacheDir>/downloads/<sha256-of-url>[-<hint>]`
//! where the hint is the sanitised basename of the URL path. Identical
//! requests across commands reuse the cached bytes; the reported hash and
//! size are always computed from the fetched content itself.

use crate::error::{Error, Result};
use crate::fsops;
use reqwest::blocking::Client;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Delay between retry attempts in milliseconds
const RETRY_DELAY_MS: u64 = 1000;

/// A fetched (or cache-resident) download
#[derive(Debug, Clone)]
pub struct Fetched {
    /// Local path of the cached bytes
    pub path: PathBuf,
    /// SHA-256 of the fetched bytes
    pub sha256: String,
    /// Size of the fetched bytes
    pub size: u64,
    /// Sanitised basename hint derived from the URL, may be empty
    pub hint: String,
}

/// Local cache of remote downloads keyed by URL hash
pub struct DownloadCache {
    dir: PathBuf,
    client: Client,
    retries: u32,
}

impl DownloadCache {
    pub fn new(dir: PathBuf, client: Client, retries: u32) -> Self {
        Self { dir, client, retries }
    }

    /// Fetch `url`, serving from the cache when the bytes are already
    /// present. Misses stream to a temporary sibling while hashing, then
    /// rename into place.
    pub fn fetch(&self, url: &str) -> Result<Fetched> {
        fs::create_dir_all(&self.dir)?;
        let hint = hint_name(url);
        let mut cache_name = cache_key(url);
        if !hint.is_empty() {
            cache_name = format!("{}-{}", cache_name, hint);
        }
        let path = self.dir.join(&cache_name);

        if path.exists() {
            debug!("cache hit for {}", url);
            let (sha256, size) = fsops::hash_file_with_size(&path)?;
            return Ok(Fetched { path, sha256, size, hint });
        }

        info!("downloading {}", url);
        let mut attempt = 0;
        let mut response = loop {
            attempt += 1;
            match self.client.get(url).send() {
                Ok(response) => break response,
                Err(e) => {
                    if attempt > self.retries {
                        return Err(Error::Network(format!("{}: {}", url, e)));
                    }
                    warn!("download attempt {} failed: {}, retrying...", attempt, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        };
        if !response.status().is_success() {
            return Err(Error::Download(format!(
                "{}: HTTP {}",
                url,
                response.status()
            )));
        }

        let tmp = self.dir.join(format!("{}.tmp", cache_name));
        let file = File::create(&tmp)?;
        let mut writer = HashingWriter {
            inner: file,
            hasher: Sha256::new(),
            written: 0,
        };
        io::copy(&mut response, &mut writer)
            .map_err(|e| Error::Download(format!("{}: {}", url, e)))?;
        let sha256 = format!("{:x}", writer.hasher.finalize());
        let size = writer.written;
        writer.inner.sync_all()?;
        drop(writer.inner);
        fs::rename(&tmp, &path)?;

        debug!("cached {} as {}", url, path.display());
        Ok(Fetched { path, sha256, size, hint })
    }
}

/// Writer that hashes everything it passes through
struct HashingWriter {
    inner: File,
    hasher: Sha256,
    written: u64,
}

impl Write for HashingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// SHA-256 of the URL string, hex-encoded; the cache key
fn cache_key(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Sanitised basename of the URL path; empty when the path has no
/// meaningful final segment
fn hint_name(url: &str) -> String {
    let parsed = match reqwest::Url::parse(url) {
        Ok(parsed) => parsed,
        Err(_) => return String::new(),
    };
    let base = parsed
        .path()
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("");
    if base == "." {
        return String::new();
    }
    sanitize_filename(base)
}

/// Restrict a file name to `[A-Za-z0-9._-]`, mapping everything else to `_`
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '.' || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
