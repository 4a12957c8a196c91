//! Reconciliation Driver - orchestrates populate, pull, and push passes
//!
//! The driver walks the remote and local hierarchies, asks the classifier
//! what changed, hands the change to the active conflict policy, and commits
//! the outcome to the journal when the policy reports the action as applied.
//! A failure on one entry is absorbed at that entry: it is logged, counted,
//! and the pass moves on to the siblings. Only an unavailable journal (or a
//! run-level transport failure before any walking starts) aborts a run.
//!
//! Each invocation runs exactly one pass to completion; there is no intra-run
//! concurrency and no cancellation.

use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::classify::{self, ChangeKind, Classifier};
use crate::journal::{EntryRow, FolderRow, Journal};
use crate::localfs::LocalTree;
use crate::policy::ConflictPolicy;
use crate::remote::{ChangeAction, ChangeRecord, EntryKind, RemoteError, RemoteFolder, RemoteStore};

/// Outcome counters for one reconciliation pass
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Actions applied and committed to the journal
    pub applied: usize,
    /// Actions the policy declined for now; re-examined next pass
    pub deferred: usize,
    /// Entries that failed and were skipped this pass
    pub failed: usize,
    pub duration: Duration,
}

/// One not-yet-applied local change, as reported by `status`
#[derive(Debug, Clone)]
pub struct PendingChange {
    pub folder: String,
    pub path: String,
    pub kind: ChangeKind,
    pub entry_kind: EntryKind,
}

/// The reconciliation engine; one logical actor per run
pub struct Engine {
    journal: Journal,
    remote: Arc<dyn RemoteStore>,
    local: Arc<LocalTree>,
    policy: Box<dyn ConflictPolicy>,
}

impl Engine {
    pub fn new(
        journal: Journal,
        remote: Arc<dyn RemoteStore>,
        local: Arc<LocalTree>,
        policy: Box<dyn ConflictPolicy>,
    ) -> Self {
        Self {
            journal,
            remote,
            local,
            policy,
        }
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    // =========================================================================
    // Populate: initial clone of every remote folder
    // =========================================================================

    pub async fn populate(&self) -> Result<RunSummary> {
        let start = Instant::now();
        info!("Starting initial population");

        let mut summary = RunSummary::default();
        let folders = self.remote.get_folders().await?;

        for folder in folders {
            if let Err(e) = self.populate_folder(&folder, &mut summary).await {
                error!("Populating folder {} failed: {:#}", folder.name, e);
                summary.failed += 1;
            }
        }

        summary.duration = start.elapsed();
        info!(
            "Populate finished in {:.2}s: {} applied, {} deferred, {} failed",
            summary.duration.as_secs_f64(),
            summary.applied,
            summary.deferred,
            summary.failed
        );
        Ok(summary)
    }

    /// Create the folder's journal row and adopt every remote entry as an Add
    async fn populate_folder(
        &self,
        folder: &RemoteFolder,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let root = self.remote.get_folder_as_entry(&folder.id).await?;
        if self
            .policy
            .add_local_directory(&folder.id, &root.id, &folder.name)
            .await?
        {
            self.journal
                .upsert_folder(&folder.id, &folder.name, &root.id, folder.mtime)?;
        }

        for entry in self.remote.get_entries(&folder.id).await? {
            let change = match self.remote.get_latest_change(&folder.id, &entry.id).await {
                Ok(Some(change)) => change,
                Ok(None) => continue,
                Err(e) => {
                    warn!("No change log for entry {}: {}; skipping", entry.id, e);
                    summary.failed += 1;
                    continue;
                }
            };

            match self
                .adopt_entry(&folder.id, entry.parent_id.as_deref(), &change)
                .await
            {
                Ok(true) => summary.applied += 1,
                Ok(false) => summary.deferred += 1,
                Err(e) => {
                    error!("Adopting {} failed: {:#}", change.path, e);
                    summary.failed += 1;
                }
            }
        }

        Ok(())
    }

    /// Apply a first-seen remote entry locally and create its journal row
    async fn adopt_entry(
        &self,
        folder_id: &str,
        parent_id: Option<&str>,
        change: &ChangeRecord,
    ) -> Result<bool> {
        let applied = match (change.action, change.kind) {
            (ChangeAction::Add | ChangeAction::Modify, EntryKind::Directory) => {
                self.policy
                    .add_local_directory(folder_id, &change.entry_id, &change.path)
                    .await?
            }
            (ChangeAction::Add | ChangeAction::Modify, EntryKind::File) => {
                self.policy
                    .add_local_file(folder_id, &change.entry_id, &change.path)
                    .await?
            }
            // latest record says the entry is already gone; nothing to adopt
            (ChangeAction::Delete, _) => return Ok(false),
        };

        if applied {
            let digest = self.local.digest(&change.path)?;
            self.journal.upsert_entry(
                folder_id,
                &change.entry_id,
                parent_id,
                &change.path,
                &digest,
                change.time,
            )?;
        }
        Ok(applied)
    }

    // =========================================================================
    // Pull: synchronize remote changes into the local tree
    // =========================================================================

    pub async fn pull(&self) -> Result<RunSummary> {
        let start = Instant::now();
        info!("Starting pull reconciliation");

        let mut summary = RunSummary::default();

        for folder in self.journal.get_folders()? {
            match self.remote.get_folder(&folder.id).await {
                Ok(remote_folder) => {
                    if classify::folder_has_remote_changes(remote_folder.mtime, folder.mtime) {
                        debug!("Folder {} has remote changes", folder.name);
                        let mut changed = self.pull_known_entries(&folder, &mut summary).await;
                        changed |= self.adopt_new_entries(&folder, &mut summary).await;
                        if changed {
                            self.journal
                                .update_folder_mtime(&folder.id, remote_folder.mtime)?;
                        }
                    }
                }
                Err(RemoteError::NotFound) => {
                    self.remove_deleted_folder(&folder, &mut summary).await;
                }
                Err(e) => {
                    warn!("Skipping folder {} this pass: {}", folder.name, e);
                    summary.failed += 1;
                }
            }
        }

        self.adopt_new_folders(&mut summary).await?;

        summary.duration = start.elapsed();
        info!(
            "Pull finished in {:.2}s: {} applied, {} deferred, {} failed",
            summary.duration.as_secs_f64(),
            summary.applied,
            summary.deferred,
            summary.failed
        );
        Ok(summary)
    }

    /// Re-examine every journaled entry of a changed folder; returns whether
    /// any action was applied
    async fn pull_known_entries(&self, folder: &FolderRow, summary: &mut RunSummary) -> bool {
        let entries = match self.journal.get_entries_by_folder(&folder.id) {
            Ok(entries) => entries,
            Err(e) => {
                error!("Journal read failed for folder {}: {:#}", folder.name, e);
                summary.failed += 1;
                return false;
            }
        };

        let mut changed = false;
        for entry in entries {
            let change = match self.remote.get_latest_change(&folder.id, &entry.id).await {
                Ok(Some(change)) => change,
                Ok(None) => continue,
                Err(e) => {
                    warn!("No change log for {}: {}; skipping", entry.path, e);
                    summary.failed += 1;
                    continue;
                }
            };
            if !classify::entry_has_remote_changes(&entry, &change) {
                continue;
            }

            match self.apply_remote_change(&entry, &change).await {
                Ok(true) => {
                    summary.applied += 1;
                    changed = true;
                }
                Ok(false) => summary.deferred += 1,
                Err(e) => {
                    error!("Applying remote change to {} failed: {:#}", entry.path, e);
                    summary.failed += 1;
                }
            }
        }
        changed
    }

    /// Dispatch one remote change record through the policy and commit the
    /// outcome for an already-journaled entry
    async fn apply_remote_change(&self, entry: &EntryRow, change: &ChangeRecord) -> Result<bool> {
        let folder_id = &entry.folder_id;
        let applied = match (change.action, change.kind) {
            (ChangeAction::Add, EntryKind::Directory) => {
                self.policy
                    .add_local_directory(folder_id, &entry.id, &change.path)
                    .await?
            }
            (ChangeAction::Add, EntryKind::File) => {
                self.policy
                    .add_local_file(folder_id, &entry.id, &change.path)
                    .await?
            }
            (ChangeAction::Modify, EntryKind::Directory) => {
                self.policy
                    .modify_local_directory(folder_id, &entry.id, &change.path)
                    .await?
            }
            (ChangeAction::Modify, EntryKind::File) => {
                self.policy
                    .modify_local_file(folder_id, &entry.id, &change.path)
                    .await?
            }
            (ChangeAction::Delete, EntryKind::Directory) => {
                self.policy
                    .delete_local_directory(folder_id, &entry.id, &change.path)
                    .await?
            }
            (ChangeAction::Delete, EntryKind::File) => {
                self.policy
                    .delete_local_file(folder_id, &entry.id, &change.path)
                    .await?
            }
        };
        if !applied {
            return Ok(false);
        }

        match change.action {
            ChangeAction::Add | ChangeAction::Modify => {
                let digest = self.local.digest(&change.path)?;
                self.journal
                    .update_entry(folder_id, &change.entry_id, change.time, &digest)?;
            }
            ChangeAction::Delete => {
                if entry.is_directory() {
                    self.journal.delete_entries_by_parent(&entry.id)?;
                }
                self.journal.delete_entry(folder_id, &change.entry_id)?;
            }
        }
        Ok(true)
    }

    /// Adopt remote entries that have no journal record yet
    async fn adopt_new_entries(&self, folder: &FolderRow, summary: &mut RunSummary) -> bool {
        let entries = match self.remote.get_entries(&folder.id).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Could not list entries of {}: {}", folder.name, e);
                summary.failed += 1;
                return false;
            }
        };

        let mut changed = false;
        for entry in entries {
            match self.journal.get_entry(&folder.id, &entry.id) {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => {
                    error!("Journal read failed for {}: {:#}", entry.path, e);
                    summary.failed += 1;
                    continue;
                }
            }

            let change = match self.remote.get_latest_change(&folder.id, &entry.id).await {
                Ok(Some(change)) => change,
                Ok(None) => continue,
                Err(e) => {
                    warn!("No change log for {}: {}; skipping", entry.path, e);
                    summary.failed += 1;
                    continue;
                }
            };

            match self
                .adopt_entry(&folder.id, entry.parent_id.as_deref(), &change)
                .await
            {
                Ok(true) => {
                    summary.applied += 1;
                    changed = true;
                }
                Ok(false) => summary.deferred += 1,
                Err(e) => {
                    error!("Adopting {} failed: {:#}", change.path, e);
                    summary.failed += 1;
                }
            }
        }
        changed
    }

    /// A folder the remote no longer knows: remove its local presence and
    /// every journal row it owned
    async fn remove_deleted_folder(&self, folder: &FolderRow, summary: &mut RunSummary) {
        info!("Folder {} was deleted remotely", folder.name);
        match self
            .policy
            .delete_local_directory(&folder.id, &folder.entry_id, &folder.name)
            .await
        {
            Ok(true) => {
                let removed = self
                    .journal
                    .delete_entries_by_folder(&folder.id)
                    .and_then(|_| self.journal.delete_folder(&folder.id));
                match removed {
                    Ok(()) => summary.applied += 1,
                    Err(e) => {
                        error!("Journal cleanup for {} failed: {:#}", folder.name, e);
                        summary.failed += 1;
                    }
                }
            }
            Ok(false) => summary.deferred += 1,
            Err(e) => {
                error!("Removing local folder {} failed: {:#}", folder.name, e);
                summary.failed += 1;
            }
        }
    }

    /// Populate wholly new remote folders observed mid-life
    async fn adopt_new_folders(&self, summary: &mut RunSummary) -> Result<()> {
        let folders = match self.remote.get_folders().await {
            Ok(folders) => folders,
            Err(e) => {
                warn!("Could not enumerate remote folders: {}", e);
                summary.failed += 1;
                return Ok(());
            }
        };

        for folder in folders {
            if self.journal.get_folder(&folder.id)?.is_none() {
                debug!("Adopting new remote folder {}", folder.name);
                if let Err(e) = self.populate_folder(&folder, summary).await {
                    error!("Populating folder {} failed: {:#}", folder.name, e);
                    summary.failed += 1;
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Push: synchronize local changes to the remote store
    // =========================================================================

    pub async fn push(&self) -> Result<RunSummary> {
        let start = Instant::now();
        info!("Starting push reconciliation");

        let mut summary = RunSummary::default();

        // Folders themselves are not created or deleted by this client, so
        // only entries are examined. Entries new on the local side have no
        // journal row and are never pushed; `status` makes them visible.
        for folder in self.journal.get_folders()? {
            debug!("Searching for local changes in folder {}", folder.name);
            let mut folder_changed = false;

            for entry in self.journal.get_entries_by_folder(&folder.id)? {
                let classifier = Classifier::new(&self.journal, &self.local);
                let descriptor = match classifier.local_change(&entry) {
                    Ok(descriptor) => descriptor,
                    Err(e) => {
                        error!("Classifying {} failed: {:#}", entry.path, e);
                        summary.failed += 1;
                        continue;
                    }
                };

                match descriptor.kind {
                    ChangeKind::Modify => match self
                        .push_modify(&folder, &entry, descriptor.entry_kind)
                        .await
                    {
                        Ok(true) => {
                            summary.applied += 1;
                            folder_changed = true;
                        }
                        Ok(false) => summary.deferred += 1,
                        Err(e) => {
                            error!("Pushing modify of {} failed: {:#}", entry.path, e);
                            summary.failed += 1;
                        }
                    },
                    ChangeKind::Delete => match self
                        .push_delete(&folder, &entry, descriptor.entry_kind)
                        .await
                    {
                        Ok(true) => {
                            summary.applied += 1;
                            folder_changed = true;
                        }
                        Ok(false) => summary.deferred += 1,
                        Err(e) => {
                            error!("Pushing delete of {} failed: {:#}", entry.path, e);
                            summary.failed += 1;
                        }
                    },
                    ChangeKind::Add | ChangeKind::None => {}
                }
            }

            if folder_changed {
                if let Ok(remote_folder) = self.remote.get_folder(&folder.id).await {
                    self.journal
                        .update_folder_mtime(&folder.id, remote_folder.mtime)?;
                }
            }
        }

        summary.duration = start.elapsed();
        info!(
            "Push finished in {:.2}s: {} applied, {} deferred, {} failed",
            summary.duration.as_secs_f64(),
            summary.applied,
            summary.deferred,
            summary.failed
        );
        Ok(summary)
    }

    /// Push a locally modified entry; the journal takes the timestamp of the
    /// change record the push created on the remote store
    async fn push_modify(
        &self,
        folder: &FolderRow,
        entry: &EntryRow,
        kind: EntryKind,
    ) -> Result<bool> {
        let applied = match kind {
            EntryKind::Directory => {
                self.policy
                    .modify_remote_directory(&folder.id, &entry.id, &entry.path)
                    .await?
            }
            EntryKind::File => {
                self.policy
                    .modify_remote_file(&folder.id, &entry.id, &entry.path)
                    .await?
            }
        };
        if !applied {
            return Ok(false);
        }

        if let Ok(Some(change)) = self.remote.get_latest_change(&folder.id, &entry.id).await {
            let digest = self.local.digest(&change.path)?;
            self.journal
                .update_entry(&folder.id, &entry.id, change.time, &digest)?;
        }
        Ok(true)
    }

    /// Push a local deletion; descendant rows go first so no orphans remain
    async fn push_delete(
        &self,
        folder: &FolderRow,
        entry: &EntryRow,
        kind: EntryKind,
    ) -> Result<bool> {
        let applied = match kind {
            EntryKind::Directory => {
                self.policy
                    .delete_remote_directory(&folder.id, &entry.id, &entry.path)
                    .await?
            }
            EntryKind::File => {
                self.policy
                    .delete_remote_file(&folder.id, &entry.id, &entry.path)
                    .await?
            }
        };
        if !applied {
            return Ok(false);
        }

        if entry.is_directory() {
            self.journal.delete_entries_by_parent(&entry.id)?;
        }
        self.journal.delete_entry(&folder.id, &entry.id)?;
        Ok(true)
    }

    // =========================================================================
    // Status: report pending local changes without applying anything
    // =========================================================================

    pub async fn status(&self) -> Result<Vec<PendingChange>> {
        let mut pending = Vec::new();

        for folder in self.journal.get_folders()? {
            let classifier = Classifier::new(&self.journal, &self.local);
            let entries = self.journal.get_entries_by_folder(&folder.id)?;

            let mut known_paths: HashSet<String> =
                entries.iter().map(|e| e.path.clone()).collect();
            known_paths.insert(folder.name.clone());

            for entry in &entries {
                let descriptor = classifier.local_change(entry)?;
                // a directory Modify is derived from its descendants and
                // would only repeat them here
                if descriptor.kind == ChangeKind::None
                    || (descriptor.kind == ChangeKind::Modify
                        && descriptor.entry_kind == EntryKind::Directory)
                {
                    continue;
                }
                pending.push(PendingChange {
                    folder: folder.name.clone(),
                    path: entry.path.clone(),
                    kind: descriptor.kind,
                    entry_kind: descriptor.entry_kind,
                });
            }

            self.collect_untracked(&folder.name, &known_paths, &mut pending)?;
        }

        pending.sort_by(|a, b| (&a.folder, &a.path).cmp(&(&b.folder, &b.path)));
        Ok(pending)
    }

    /// Walk the folder's local subtree and report paths the journal has
    /// never seen (local Adds; the push pass does not create them remotely)
    fn collect_untracked(
        &self,
        folder_name: &str,
        known_paths: &HashSet<String>,
        pending: &mut Vec<PendingChange>,
    ) -> Result<()> {
        if !self.local.is_dir(folder_name) {
            return Ok(());
        }

        let root = self.local.root().to_path_buf();
        let mut stack = vec![self.local.full_path(folder_name)];

        while let Some(dir) = stack.pop() {
            for dirent in std::fs::read_dir(&dir)? {
                let path = dirent?.path();
                let rel = path
                    .strip_prefix(&root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .into_owned();
                let is_dir = path.is_dir();

                if is_dir {
                    stack.push(path);
                }
                if !known_paths.contains(&rel) {
                    pending.push(PendingChange {
                        folder: folder_name.to_string(),
                        path: rel,
                        kind: ChangeKind::Add,
                        entry_kind: if is_dir {
                            EntryKind::Directory
                        } else {
                            EntryKind::File
                        },
                    });
                }
            }
        }
        Ok(())
    }
}
