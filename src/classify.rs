//! Change Classifier - derives what changed, and on which side
//!
//! Two independent comparisons with no shared state beyond the journal:
//! remote-side classification compares remote timestamps against the
//! journal's last-known timestamps, local-side classification compares the
//! current filesystem content digest against the journal's stored digest.
//! The output is a transient [`ChangeDescriptor`], produced and consumed
//! within a single reconciliation pass.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::journal::{EntryRow, Journal};
use crate::localfs::LocalTree;
use crate::remote::{ChangeRecord, EntryKind};

/// What changed for one entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    None,
    Add,
    Modify,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::None => "none",
            ChangeKind::Add => "add",
            ChangeKind::Modify => "modify",
            ChangeKind::Delete => "delete",
        }
    }
}

/// Which endpoint the change happened on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Local,
    Remote,
}

/// Transient classification of one entry's change, never persisted
#[derive(Debug, Clone)]
pub struct ChangeDescriptor {
    pub kind: ChangeKind,
    pub side: Side,
    pub entry_kind: EntryKind,
    /// Freshly computed local digest, for local-side Add/Modify
    pub digest: Option<String>,
}

/// Remote-side classification for a folder: strictly newer means changed
pub fn folder_has_remote_changes(remote_mtime: DateTime<Utc>, known_mtime: DateTime<Utc>) -> bool {
    remote_mtime > known_mtime
}

/// Remote-side classification for an entry: the latest change-log record
/// wins if, and only if, it is strictly newer than the journal state
pub fn entry_has_remote_changes(entry: &EntryRow, latest: &ChangeRecord) -> bool {
    if latest.time > entry.mtime {
        debug!("Entry {} has remote changes", entry.path);
        true
    } else {
        false
    }
}

/// Local-side classifier over the journal and the local tree
pub struct Classifier<'a> {
    journal: &'a Journal,
    local: &'a LocalTree,
}

impl<'a> Classifier<'a> {
    pub fn new(journal: &'a Journal, local: &'a LocalTree) -> Self {
        Self { journal, local }
    }

    /// Classify the local-side change for a journaled entry
    pub fn local_change(&self, entry: &EntryRow) -> Result<ChangeDescriptor> {
        let entry_kind = if entry.is_directory() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };

        if !self.local.exists(&entry.path) {
            debug!("Entry {} is locally gone", entry.path);
            return Ok(ChangeDescriptor {
                kind: ChangeKind::Delete,
                side: Side::Local,
                entry_kind,
                digest: None,
            });
        }

        let (kind, digest) = match entry_kind {
            EntryKind::File => {
                let digest = self.local.digest(&entry.path)?;
                if digest != entry.digest {
                    debug!(
                        "Entry {} digests differ: known={}, current={}",
                        entry.path, entry.digest, digest
                    );
                    (ChangeKind::Modify, Some(digest))
                } else {
                    (ChangeKind::None, None)
                }
            }
            EntryKind::Directory => {
                if self.directory_has_local_changes(&entry.id)? {
                    (ChangeKind::Modify, None)
                } else {
                    (ChangeKind::None, None)
                }
            }
        };

        Ok(ChangeDescriptor {
            kind,
            side: Side::Local,
            entry_kind,
            digest,
        })
    }

    /// A directory "has local changes" if any descendant file or directory
    /// changed. Walks the journal's parent index with an explicit work-stack
    /// (deep trees must not recurse) and short-circuits on the first hit.
    pub fn directory_has_local_changes(&self, entry_id: &str) -> Result<bool> {
        let mut stack = vec![entry_id.to_string()];

        while let Some(current) = stack.pop() {
            for child in self.journal.get_entries_by_parent(&current)? {
                if child.is_directory() {
                    if !self.local.is_dir(&child.path) {
                        debug!("Directory {} is locally gone", child.path);
                        return Ok(true);
                    }
                    stack.push(child.id);
                } else if self.file_has_local_changes(&child)? {
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }

    fn file_has_local_changes(&self, entry: &EntryRow) -> Result<bool> {
        if !self.local.exists(&entry.path) {
            return Ok(true);
        }
        Ok(self.local.digest(&entry.path)? != entry.digest)
    }
}
