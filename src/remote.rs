//! Remote-store transport boundary
//!
//! The reconciliation engine talks to the remote hierarchical store through
//! the [`RemoteStore`] trait. Expected outcomes that are part of normal
//! operation (entry already gone, name collision, transient server hiccup)
//! are modeled as [`RemoteError`] variants rather than opaque errors, so the
//! policy layer can decide per case whether to tolerate, recover, or defer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether an entry is a file or a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Directory => "directory",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(EntryKind::File),
            "directory" => Some(EntryKind::Directory),
            _ => None,
        }
    }
}

/// Action recorded in the remote change log for an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Add,
    Modify,
    Delete,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Add => "add",
            ChangeAction::Modify => "modify",
            ChangeAction::Delete => "delete",
        }
    }
}

/// A synchronized top-level container on the remote store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFolder {
    pub id: String,
    pub name: String,
    pub mtime: DateTime<Utc>,
}

/// A file or directory inside a remote folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub id: String,
    pub folder_id: String,
    /// `None` for a folder's own root entry
    pub parent_id: Option<String>,
    /// Path relative to the local root prefix, rooted at the folder name
    pub path: String,
    pub kind: EntryKind,
}

/// One record from the remote per-entry change log, most recent first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub entry_id: String,
    pub time: DateTime<Utc>,
    pub action: ChangeAction,
    pub kind: EntryKind,
    pub path: String,
    pub parent_id: Option<String>,
}

/// Typed transport fault
///
/// `NotFound` and `Collision` are ordinary reconciliation outcomes, not
/// exceptional conditions; only `Transient` represents an actual fault, and
/// even that one is recoverable by retrying on a later pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The folder or entry does not exist (or is already gone)
    NotFound,
    /// An entry with the requested name already exists under the parent
    Collision,
    /// Network failure or server-side error; safe to retry next pass
    Transient(String),
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::NotFound => write!(f, "remote item not found"),
            RemoteError::Collision => write!(f, "remote name collision"),
            RemoteError::Transient(cause) => write!(f, "transient remote fault: {}", cause),
        }
    }
}

impl std::error::Error for RemoteError {}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Operations the reconciliation engine requires from the remote store.
///
/// Calls block the logical actor until complete; the engine never issues
/// concurrent requests within one run.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Enumerate all folders visible to the authenticated identity
    async fn get_folders(&self) -> RemoteResult<Vec<RemoteFolder>>;

    /// Fetch current metadata for one folder
    async fn get_folder(&self, folder_id: &str) -> RemoteResult<RemoteFolder>;

    /// Fetch the folder's own root entry
    async fn get_folder_as_entry(&self, folder_id: &str) -> RemoteResult<RemoteEntry>;

    /// Enumerate a folder's entries, excluding the root entry itself
    async fn get_entries(&self, folder_id: &str) -> RemoteResult<Vec<RemoteEntry>>;

    /// Fetch current metadata for one entry
    async fn get_entry(&self, folder_id: &str, entry_id: &str) -> RemoteResult<RemoteEntry>;

    /// Most recent change-log record for an entry, if any
    async fn get_latest_change(
        &self,
        folder_id: &str,
        entry_id: &str,
    ) -> RemoteResult<Option<ChangeRecord>>;

    /// Create a new entry under `parent_id`; fails with `Collision` if the
    /// name is taken
    async fn create_entry(
        &self,
        folder_id: &str,
        parent_id: &str,
        path: &str,
        kind: EntryKind,
    ) -> RemoteResult<RemoteEntry>;

    /// Delete an entry; fails with `NotFound` if already gone
    async fn delete_entry(&self, folder_id: &str, entry_id: &str) -> RemoteResult<()>;

    /// Fetch the full content of a file entry
    async fn read_file(&self, folder_id: &str, entry_id: &str) -> RemoteResult<Vec<u8>>;

    /// Overwrite the full content of a file entry
    async fn write_file(&self, folder_id: &str, entry_id: &str, data: &[u8]) -> RemoteResult<()>;
}
