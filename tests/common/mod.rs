//! Common test utilities: an in-memory remote store and an engine harness
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use treeline::remote::{
    ChangeAction, ChangeRecord, EntryKind, RemoteEntry, RemoteError, RemoteFolder, RemoteResult,
    RemoteStore,
};
use treeline::{create_policy, Engine, Journal, LocalTree, PolicyKind};

/// In-memory [`RemoteStore`] with seeding helpers and fault injection
///
/// Every mutation advances a logical clock, stamps a change-log record and
/// bumps the owning folder's mtime, mirroring how the real store behaves.
pub struct FakeRemote {
    state: Mutex<FakeState>,
}

struct FakeState {
    folders: BTreeMap<String, RemoteFolder>,
    entries: BTreeMap<String, RemoteEntry>,
    contents: HashMap<String, Vec<u8>>,
    /// Latest change-log record per entry id; survives entry deletion
    changes: HashMap<String, ChangeRecord>,
    next_id: u64,
    tick: i64,
    write_count: usize,
    fail_writes: bool,
}

impl FakeState {
    fn now(&mut self) -> DateTime<Utc> {
        self.tick += 1;
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(self.tick)
    }

    fn fresh_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn bump_folder(&mut self, folder_id: &str) {
        let time = self.now();
        if let Some(folder) = self.folders.get_mut(folder_id) {
            folder.mtime = time;
        }
    }

    fn record_change(&mut self, entry: &RemoteEntry, action: ChangeAction) {
        let time = self.now();
        self.changes.insert(
            entry.id.clone(),
            ChangeRecord {
                entry_id: entry.id.clone(),
                time,
                action,
                kind: entry.kind,
                path: entry.path.clone(),
                parent_id: entry.parent_id.clone(),
            },
        );
        self.bump_folder(&entry.folder_id);
    }

    fn insert_entry(
        &mut self,
        folder_id: &str,
        parent_id: Option<&str>,
        path: &str,
        kind: EntryKind,
    ) -> RemoteEntry {
        let id = self.fresh_id("entry");
        let entry = RemoteEntry {
            id: id.clone(),
            folder_id: folder_id.to_string(),
            parent_id: parent_id.map(str::to_string),
            path: path.to_string(),
            kind,
        };
        self.entries.insert(id, entry.clone());
        self.record_change(&entry, ChangeAction::Add);
        entry
    }

    /// Remove an entry and everything beneath its path, logging a deletion
    /// for each removed item
    fn remove_subtree(&mut self, entry_id: &str) -> bool {
        let target = match self.entries.get(entry_id) {
            Some(entry) => entry.clone(),
            None => return false,
        };
        let prefix = format!("{}/", target.path);

        let doomed: Vec<RemoteEntry> = self
            .entries
            .values()
            .filter(|e| {
                e.folder_id == target.folder_id
                    && (e.id == target.id || e.path.starts_with(&prefix))
            })
            .cloned()
            .collect();

        for entry in doomed {
            self.entries.remove(&entry.id);
            self.contents.remove(&entry.id);
            self.record_change(&entry, ChangeAction::Delete);
        }
        true
    }
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                folders: BTreeMap::new(),
                entries: BTreeMap::new(),
                contents: HashMap::new(),
                changes: HashMap::new(),
                next_id: 0,
                tick: 0,
                write_count: 0,
                fail_writes: false,
            }),
        })
    }

    /// Create a folder and its root entry; returns (folder_id, root_entry_id)
    pub fn add_folder(&self, name: &str) -> (String, String) {
        let mut state = self.state.lock().unwrap();
        let folder_id = state.fresh_id("folder");
        let mtime = state.now();
        state.folders.insert(
            folder_id.clone(),
            RemoteFolder {
                id: folder_id.clone(),
                name: name.to_string(),
                mtime,
            },
        );
        let root = state.insert_entry(&folder_id, None, name, EntryKind::Directory);
        (folder_id, root.id)
    }

    pub fn add_directory(&self, folder_id: &str, parent_id: &str, path: &str) -> String {
        let mut state = self.state.lock().unwrap();
        state
            .insert_entry(folder_id, Some(parent_id), path, EntryKind::Directory)
            .id
    }

    pub fn add_file(&self, folder_id: &str, parent_id: &str, path: &str, content: &[u8]) -> String {
        let mut state = self.state.lock().unwrap();
        let entry = state.insert_entry(folder_id, Some(parent_id), path, EntryKind::File);
        state.contents.insert(entry.id.clone(), content.to_vec());
        entry.id
    }

    /// Overwrite a file's content as another client would
    pub fn change_file(&self, entry_id: &str, content: &[u8]) {
        let mut state = self.state.lock().unwrap();
        let entry = state.entries.get(entry_id).cloned().expect("unknown entry");
        state.contents.insert(entry_id.to_string(), content.to_vec());
        state.record_change(&entry, ChangeAction::Modify);
    }

    /// Delete an entry (and its subtree) as another client would
    pub fn remove_entry(&self, entry_id: &str) {
        let mut state = self.state.lock().unwrap();
        assert!(state.remove_subtree(entry_id), "unknown entry");
    }

    /// Delete a whole folder from the store
    pub fn remove_folder(&self, folder_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.folders.remove(folder_id);
        let doomed: Vec<String> = state
            .entries
            .values()
            .filter(|e| e.folder_id == folder_id)
            .map(|e| e.id.clone())
            .collect();
        for id in doomed {
            state.entries.remove(&id);
            state.contents.remove(&id);
        }
    }

    /// Make every subsequent `write_file` fail with a transient fault
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_writes = fail;
    }

    pub fn file_write_count(&self) -> usize {
        self.state.lock().unwrap().write_count
    }

    pub fn entry_id_by_path(&self, folder_id: &str, path: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .entries
            .values()
            .find(|e| e.folder_id == folder_id && e.path == path)
            .map(|e| e.id.clone())
    }

    pub fn file_content(&self, entry_id: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().contents.get(entry_id).cloned()
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn get_folders(&self) -> RemoteResult<Vec<RemoteFolder>> {
        Ok(self.state.lock().unwrap().folders.values().cloned().collect())
    }

    async fn get_folder(&self, folder_id: &str) -> RemoteResult<RemoteFolder> {
        self.state
            .lock()
            .unwrap()
            .folders
            .get(folder_id)
            .cloned()
            .ok_or(RemoteError::NotFound)
    }

    async fn get_folder_as_entry(&self, folder_id: &str) -> RemoteResult<RemoteEntry> {
        self.state
            .lock()
            .unwrap()
            .entries
            .values()
            .find(|e| e.folder_id == folder_id && e.parent_id.is_none())
            .cloned()
            .ok_or(RemoteError::NotFound)
    }

    async fn get_entries(&self, folder_id: &str) -> RemoteResult<Vec<RemoteEntry>> {
        let state = self.state.lock().unwrap();
        if !state.folders.contains_key(folder_id) {
            return Err(RemoteError::NotFound);
        }
        let mut entries: Vec<RemoteEntry> = state
            .entries
            .values()
            .filter(|e| e.folder_id == folder_id && e.parent_id.is_some())
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn get_entry(&self, folder_id: &str, entry_id: &str) -> RemoteResult<RemoteEntry> {
        self.state
            .lock()
            .unwrap()
            .entries
            .get(entry_id)
            .filter(|e| e.folder_id == folder_id)
            .cloned()
            .ok_or(RemoteError::NotFound)
    }

    async fn get_latest_change(
        &self,
        _folder_id: &str,
        entry_id: &str,
    ) -> RemoteResult<Option<ChangeRecord>> {
        Ok(self.state.lock().unwrap().changes.get(entry_id).cloned())
    }

    async fn create_entry(
        &self,
        folder_id: &str,
        parent_id: &str,
        path: &str,
        kind: EntryKind,
    ) -> RemoteResult<RemoteEntry> {
        let mut state = self.state.lock().unwrap();
        if !state.folders.contains_key(folder_id) {
            return Err(RemoteError::NotFound);
        }
        if state
            .entries
            .values()
            .any(|e| e.folder_id == folder_id && e.path == path)
        {
            return Err(RemoteError::Collision);
        }
        let entry = state.insert_entry(folder_id, Some(parent_id), path, kind);
        if kind == EntryKind::File {
            state.contents.insert(entry.id.clone(), Vec::new());
        }
        Ok(entry)
    }

    async fn delete_entry(&self, _folder_id: &str, entry_id: &str) -> RemoteResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.remove_subtree(entry_id) {
            Ok(())
        } else {
            Err(RemoteError::NotFound)
        }
    }

    async fn read_file(&self, _folder_id: &str, entry_id: &str) -> RemoteResult<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .contents
            .get(entry_id)
            .cloned()
            .ok_or(RemoteError::NotFound)
    }

    async fn write_file(&self, _folder_id: &str, entry_id: &str, data: &[u8]) -> RemoteResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(RemoteError::Transient("injected write fault".to_string()));
        }
        if !state.entries.contains_key(entry_id) {
            return Err(RemoteError::NotFound);
        }
        state.contents.insert(entry_id.to_string(), data.to_vec());
        state.write_count += 1;
        let entry = match state.entries.get(entry_id).cloned() {
            Some(entry) => entry,
            None => return Err(RemoteError::NotFound),
        };
        state.record_change(&entry, ChangeAction::Modify);
        Ok(())
    }
}

/// An engine wired to a [`FakeRemote`], a temp-dir local tree and an
/// in-memory journal
pub struct TestHarness {
    pub remote: Arc<FakeRemote>,
    pub local: Arc<LocalTree>,
    pub engine: Engine,
    // keeps the local root alive for the test's duration
    pub temp: TempDir,
}

pub fn harness(remote: Arc<FakeRemote>, identity: &str) -> TestHarness {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let local = Arc::new(LocalTree::new(temp.path(), 65536));
    let journal = Journal::open_in_memory().expect("Failed to open journal");

    let remote_dyn: Arc<dyn RemoteStore> = remote.clone();
    let policy = create_policy(
        PolicyKind::Default,
        Arc::clone(&remote_dyn),
        Arc::clone(&local),
        identity.to_string(),
    );
    let engine = Engine::new(journal, remote_dyn, Arc::clone(&local), policy);

    TestHarness {
        remote,
        local,
        engine,
        temp,
    }
}
