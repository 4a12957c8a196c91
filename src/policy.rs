//! Conflict Policy - decides how to converge local and remote state
//!
//! A policy owns the reconciling action for every case in
//! {Add, Modify, Delete} x {File, Directory} x {local-apply, remote-apply},
//! dispatched through one explicit method per case. Every method returns
//! `Ok(true)` when the journal should be updated to reflect the action and
//! `Ok(false)` when nothing was applied and the entry should be re-examined
//! on a future pass. That boolean is the at-least-once retry contract the
//! whole engine is built on.
//!
//! Exactly one policy variant is active per run; the driver only sees the
//! trait, so further variants can be added without touching it.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::localfs::LocalTree;
use crate::remote::{EntryKind, RemoteError, RemoteStore};

/// Selectable policy variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PolicyKind {
    /// Apply remote changes locally and local changes remotely, renaming on
    /// remote name collisions
    Default,
}

/// Converging actions over one entry, polymorphic per policy variant
#[async_trait]
pub trait ConflictPolicy: Send + Sync {
    // Local-apply: pull a remote change into the local tree

    async fn add_local_directory(&self, folder_id: &str, entry_id: &str, path: &str)
        -> Result<bool>;
    async fn add_local_file(&self, folder_id: &str, entry_id: &str, path: &str) -> Result<bool>;
    async fn modify_local_directory(
        &self,
        folder_id: &str,
        entry_id: &str,
        path: &str,
    ) -> Result<bool>;
    async fn modify_local_file(&self, folder_id: &str, entry_id: &str, path: &str)
        -> Result<bool>;
    async fn delete_local_directory(
        &self,
        folder_id: &str,
        entry_id: &str,
        path: &str,
    ) -> Result<bool>;
    async fn delete_local_file(&self, folder_id: &str, entry_id: &str, path: &str)
        -> Result<bool>;

    // Remote-apply: push a local change to the remote store

    async fn add_remote_directory(
        &self,
        folder_id: &str,
        parent_id: &str,
        path: &str,
    ) -> Result<bool>;
    async fn add_remote_file(&self, folder_id: &str, parent_id: &str, path: &str) -> Result<bool>;
    async fn modify_remote_directory(
        &self,
        folder_id: &str,
        entry_id: &str,
        path: &str,
    ) -> Result<bool>;
    async fn modify_remote_file(&self, folder_id: &str, entry_id: &str, path: &str)
        -> Result<bool>;
    async fn delete_remote_directory(
        &self,
        folder_id: &str,
        entry_id: &str,
        path: &str,
    ) -> Result<bool>;
    async fn delete_remote_file(&self, folder_id: &str, entry_id: &str, path: &str)
        -> Result<bool>;
}

/// Instantiate the selected policy variant
pub fn create_policy(
    kind: PolicyKind,
    remote: Arc<dyn RemoteStore>,
    local: Arc<LocalTree>,
    identity: impl Into<String>,
) -> Box<dyn ConflictPolicy> {
    match kind {
        PolicyKind::Default => Box::new(DefaultPolicy {
            remote,
            local,
            identity: identity.into(),
        }),
    }
}

/// Deterministic rename for remote name collisions.
///
/// The acting identity is appended before the final extension for files that
/// have one, and to the end of the name for directories and extensionless
/// files. The suffix is unique per identity, so the renamed path cannot
/// collide again under normal operation.
pub fn collision_rename(path: &str, identity: &str, kind: EntryKind) -> String {
    let (dir, name) = match path.rfind('/') {
        Some(pos) => (&path[..=pos], &path[pos + 1..]),
        None => ("", path),
    };

    let renamed = match kind {
        EntryKind::File => match name.rfind('.') {
            Some(dot) if dot > 0 => {
                format!("{}-{}{}", &name[..dot], identity, &name[dot..])
            }
            _ => format!("{}-{}", name, identity),
        },
        EntryKind::Directory => format!("{}-{}", name, identity),
    };

    format!("{}{}", dir, renamed)
}

/// Default policy: remote changes are applied locally as-is, local changes
/// are pushed, and remote name collisions are resolved by renaming the local
/// item with the acting identity and retrying.
pub struct DefaultPolicy {
    remote: Arc<dyn RemoteStore>,
    local: Arc<LocalTree>,
    identity: String,
}

impl DefaultPolicy {
    /// Fetch full remote content and overwrite the local file
    async fn fetch(&self, folder_id: &str, entry_id: &str, path: &str) -> Result<bool> {
        match self.remote.read_file(folder_id, entry_id).await {
            Ok(data) => {
                debug!("Fetched {} ({} bytes)", path, data.len());
                self.local.write(path, &data)?;
                Ok(true)
            }
            Err(e) => {
                warn!("Could not fetch {}: {}; retrying next pass", path, e);
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl ConflictPolicy for DefaultPolicy {
    async fn add_local_directory(
        &self,
        _folder_id: &str,
        _entry_id: &str,
        path: &str,
    ) -> Result<bool> {
        self.local.mkdir_all(path)?;
        Ok(true)
    }

    async fn add_local_file(&self, folder_id: &str, entry_id: &str, path: &str) -> Result<bool> {
        self.fetch(folder_id, entry_id, path).await
    }

    async fn modify_local_directory(
        &self,
        _folder_id: &str,
        _entry_id: &str,
        _path: &str,
    ) -> Result<bool> {
        // directory metadata changes carry no content
        Ok(true)
    }

    async fn modify_local_file(
        &self,
        folder_id: &str,
        entry_id: &str,
        path: &str,
    ) -> Result<bool> {
        self.fetch(folder_id, entry_id, path).await
    }

    async fn delete_local_directory(
        &self,
        _folder_id: &str,
        _entry_id: &str,
        path: &str,
    ) -> Result<bool> {
        self.local.remove_dir_all(path)?;
        Ok(true)
    }

    async fn delete_local_file(
        &self,
        _folder_id: &str,
        _entry_id: &str,
        path: &str,
    ) -> Result<bool> {
        self.local.remove_file(path)?;
        Ok(true)
    }

    async fn add_remote_directory(
        &self,
        folder_id: &str,
        parent_id: &str,
        path: &str,
    ) -> Result<bool> {
        let mut target = path.to_string();
        let mut renamed_once = false;

        loop {
            match self
                .remote
                .create_entry(folder_id, parent_id, &target, EntryKind::Directory)
                .await
            {
                Ok(_) => return Ok(true),
                Err(RemoteError::Collision) if !renamed_once => {
                    let renamed = collision_rename(&target, &self.identity, EntryKind::Directory);
                    warn!(
                        "Remote already has a directory named {}; renaming local copy to {}",
                        target, renamed
                    );
                    self.local.rename(&target, &renamed)?;
                    // the remote's colliding hierarchy lands here on the next pull
                    self.local.mkdir_all(&target)?;
                    target = renamed;
                    renamed_once = true;
                }
                Err(e) => {
                    warn!("Could not create remote directory {}: {}", target, e);
                    return Ok(false);
                }
            }
        }
    }

    async fn add_remote_file(&self, folder_id: &str, parent_id: &str, path: &str) -> Result<bool> {
        let mut target = path.to_string();
        let mut renamed_once = false;

        loop {
            match self
                .remote
                .create_entry(folder_id, parent_id, &target, EntryKind::File)
                .await
            {
                Ok(created) => {
                    let data = self.local.read(&target)?;
                    return match self.remote.write_file(folder_id, &created.id, &data).await {
                        Ok(()) => Ok(true),
                        Err(e) => {
                            warn!("Could not upload {}: {}; retrying next pass", target, e);
                            Ok(false)
                        }
                    };
                }
                Err(RemoteError::Collision) if !renamed_once => {
                    let renamed = collision_rename(&target, &self.identity, EntryKind::File);
                    warn!(
                        "Remote already has a file named {}; renaming local copy to {}",
                        target, renamed
                    );
                    self.local.rename(&target, &renamed)?;
                    target = renamed;
                    renamed_once = true;
                }
                Err(RemoteError::Transient(cause)) => {
                    // server-side reference fault during creation: take no
                    // action now, the next pass re-evaluates
                    warn!("Deferring remote creation of {}: {}", target, cause);
                    return Ok(false);
                }
                Err(e) => {
                    warn!("Could not create remote file {}: {}", target, e);
                    return Ok(false);
                }
            }
        }
    }

    async fn modify_remote_directory(
        &self,
        _folder_id: &str,
        _entry_id: &str,
        _path: &str,
    ) -> Result<bool> {
        // nothing to push for a directory
        Ok(true)
    }

    async fn modify_remote_file(
        &self,
        folder_id: &str,
        entry_id: &str,
        path: &str,
    ) -> Result<bool> {
        let data = self.local.read(path)?;
        match self.remote.write_file(folder_id, entry_id, &data).await {
            Ok(()) => {
                debug!("Pushed {} ({} bytes)", path, data.len());
                Ok(true)
            }
            Err(e) => {
                warn!("Could not push {}: {}; retrying next pass", path, e);
                Ok(false)
            }
        }
    }

    async fn delete_remote_directory(
        &self,
        folder_id: &str,
        entry_id: &str,
        path: &str,
    ) -> Result<bool> {
        match self.remote.delete_entry(folder_id, entry_id).await {
            Ok(()) => {
                debug!("Deleted remote directory {}", path);
                Ok(true)
            }
            Err(RemoteError::NotFound) => Ok(true),
            Err(e) => {
                warn!("Could not delete remote directory {}: {}", path, e);
                Ok(false)
            }
        }
    }

    async fn delete_remote_file(
        &self,
        folder_id: &str,
        entry_id: &str,
        path: &str,
    ) -> Result<bool> {
        match self.remote.delete_entry(folder_id, entry_id).await {
            Ok(()) => {
                debug!("Deleted remote file {}", path);
                Ok(true)
            }
            Err(RemoteError::NotFound) => Ok(true),
            Err(e) => {
                warn!("Could not delete remote file {}: {}", path, e);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collision_rename_file_with_extension() {
        assert_eq!(
            collision_rename("docs/report.txt", "alice", EntryKind::File),
            "docs/report-alice.txt"
        );
        assert_eq!(
            collision_rename("report.txt", "bob", EntryKind::File),
            "report-bob.txt"
        );
    }

    #[test]
    fn test_collision_rename_extensionless_file() {
        assert_eq!(
            collision_rename("docs/Makefile", "alice", EntryKind::File),
            "docs/Makefile-alice"
        );
    }

    #[test]
    fn test_collision_rename_hidden_file_keeps_leading_dot() {
        // ".gitignore" has no stem before the dot; append instead
        assert_eq!(
            collision_rename("docs/.gitignore", "alice", EntryKind::File),
            "docs/.gitignore-alice"
        );
    }

    #[test]
    fn test_collision_rename_directory() {
        assert_eq!(
            collision_rename("docs/archive.d", "alice", EntryKind::Directory),
            "docs/archive.d-alice"
        );
        assert_eq!(collision_rename("docs", "bob", EntryKind::Directory), "docs-bob");
    }

    #[test]
    fn test_collision_rename_is_deterministic_per_identity() {
        let a1 = collision_rename("report.txt", "alice", EntryKind::File);
        let a2 = collision_rename("report.txt", "alice", EntryKind::File);
        let b = collision_rename("report.txt", "bob", EntryKind::File);
        assert_eq!(a1, a2);
        assert_ne!(a1, b);
    }
}
