//! Local filesystem accessor
//!
//! All paths handled by the engine are relative; [`LocalTree`] anchors them
//! under a configured root prefix and provides the small set of filesystem
//! primitives the policy layer needs. Creation and removal helpers are
//! idempotent: already-exists and already-gone are treated as success, since
//! a concurrent local change must never abort a reconciliation pass.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Sentinel digest for directory entries; never a valid `sha256:` value
pub const DIRECTORY_DIGEST: &str = "directory";

/// Local filesystem accessor operating under a root prefix
pub struct LocalTree {
    root: PathBuf,
    buffer_size: usize,
}

impl LocalTree {
    pub fn new(root: impl Into<PathBuf>, buffer_size: usize) -> Self {
        Self {
            root: root.into(),
            buffer_size: buffer_size.max(1),
        }
    }

    /// Absolute path for a relative entry path
    pub fn full_path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.full_path(rel).exists()
    }

    pub fn is_file(&self, rel: &str) -> bool {
        self.full_path(rel).is_file()
    }

    pub fn is_dir(&self, rel: &str) -> bool {
        self.full_path(rel).is_dir()
    }

    pub fn size(&self, rel: &str) -> Result<u64> {
        let path = self.full_path(rel);
        let meta = std::fs::metadata(&path)
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        Ok(meta.len())
    }

    /// Create a directory and any missing ancestors; success if it exists
    pub fn mkdir_all(&self, rel: &str) -> Result<()> {
        let path = self.full_path(rel);
        if path.is_dir() {
            return Ok(());
        }
        debug!("Creating local directory {}", path.display());
        std::fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create directory {}", path.display()))
    }

    /// Remove a file; success if it is already gone
    pub fn remove_file(&self, rel: &str) -> Result<()> {
        let path = self.full_path(rel);
        if !path.is_file() {
            return Ok(());
        }
        debug!("Removing local file {}", path.display());
        std::fs::remove_file(&path)
            .with_context(|| format!("Failed to remove file {}", path.display()))
    }

    /// Remove a directory tree; success if it is already gone
    pub fn remove_dir_all(&self, rel: &str) -> Result<()> {
        let path = self.full_path(rel);
        if !path.is_dir() {
            return Ok(());
        }
        debug!("Removing local directory {}", path.display());
        std::fs::remove_dir_all(&path)
            .with_context(|| format!("Failed to remove directory {}", path.display()))
    }

    pub fn rename(&self, rel_from: &str, rel_to: &str) -> Result<()> {
        let from = self.full_path(rel_from);
        let to = self.full_path(rel_to);
        debug!("Renaming {} -> {}", from.display(), to.display());
        std::fs::rename(&from, &to)
            .with_context(|| format!("Failed to rename {} to {}", from.display(), to.display()))
    }

    pub fn read(&self, rel: &str) -> Result<Vec<u8>> {
        let path = self.full_path(rel);
        std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))
    }

    /// Write file content, creating parent directories as needed
    pub fn write(&self, rel: &str, data: &[u8]) -> Result<()> {
        let path = self.full_path(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create parent of {}", path.display()))?;
        }
        debug!("Writing {} bytes to {}", data.len(), path.display());
        std::fs::write(&path, data).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Content digest of a local path.
    ///
    /// Directories get the fixed [`DIRECTORY_DIGEST`] sentinel; files are
    /// streamed through SHA-256 and reported as `sha256:<hex>`.
    pub fn digest(&self, rel: &str) -> Result<String> {
        let path = self.full_path(rel);
        if path.is_dir() {
            return Ok(DIRECTORY_DIGEST.to_string());
        }

        let mut file =
            File::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            let n = file
                .read(&mut buf)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(format!("sha256:{:x}", hasher.finalize()))
    }
}
