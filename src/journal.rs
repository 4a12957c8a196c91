//! Journal - SQLite persistence of last-known synchronized state
//!
//! The journal is the sole source of truth for "what we last knew" about
//! every synchronized folder and entry: last-known modification time,
//! content digest, and the parent/child hierarchy. It holds no business
//! logic; classification and policy decisions happen elsewhere and commit
//! their outcome here.
//!
//! Every mutating call is atomic: it either fully applies or fully fails.
//! The journal never retries; callers decide what a failure means.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::localfs::DIRECTORY_DIGEST;

/// Last-known state of a synchronized folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRow {
    pub id: String,
    pub name: String,
    /// The folder's own root entry on the remote store
    pub entry_id: String,
    pub mtime: DateTime<Utc>,
}

/// Last-known state of a synchronized entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRow {
    pub folder_id: String,
    pub id: String,
    /// `None` means the entry sits at the folder root
    pub parent_id: Option<String>,
    /// Local path relative to the root prefix
    pub path: String,
    /// `sha256:<hex>` for files, the directory sentinel for directories
    pub digest: String,
    pub mtime: DateTime<Utc>,
}

impl EntryRow {
    pub fn is_directory(&self) -> bool {
        self.digest == DIRECTORY_DIGEST
    }
}

/// Durable key-value store of per-folder and per-entry sync state
#[derive(Debug)]
pub struct Journal {
    conn: Connection,
}

impl Journal {
    /// Open or create the journal at `path`, ensuring the schema exists.
    ///
    /// An existing file in an unreadable or incompatible format is discarded
    /// and recreated: a stale journal only costs a re-populate, while
    /// refusing to start would leave the client unusable.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create journal directory")?;
        }

        match Self::try_open(path) {
            Ok(journal) => Ok(journal),
            Err(e) => {
                warn!(
                    "Journal at {} is unreadable ({}); discarding and recreating",
                    path.display(),
                    e
                );
                if path.is_file() {
                    std::fs::remove_file(path).with_context(|| {
                        format!("Failed to remove corrupt journal {}", path.display())
                    })?;
                }
                Self::try_open(path)
            }
        }
    }

    /// Open an existing, already-populated journal.
    ///
    /// Fails with an operator-facing diagnostic when the journal is missing
    /// or uninitialized; pull and push require a prior populate run.
    pub fn open_existing(path: &Path) -> Result<Self> {
        let missing = || {
            anyhow!(
                "No usable journal at {}. Run the `populate` action first, \
                 or point --journal at a valid journal file.",
                path.display()
            )
        };

        if !path.is_file() {
            return Err(missing());
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open journal at {}", path.display()))?;

        let has_schema: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'folders'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|_| missing())?;
        if has_schema.is_none() {
            return Err(missing());
        }

        Ok(Self { conn })
    }

    /// Open an in-memory journal (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory journal")?;
        let journal = Self { conn };
        journal.create_schema()?;
        Ok(journal)
    }

    /// Default journal path under the user data directory
    pub fn default_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir().context("Failed to get user data directory")?;
        Ok(data_dir.join("treeline").join("journal.db"))
    }

    fn try_open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open journal at {}", path.display()))?;
        let journal = Self { conn };
        journal.create_schema()?;
        info!("Journal opened at {}", path.display());
        Ok(journal)
    }

    /// Idempotently ensure the folder and entry tables exist
    pub fn create_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS folders (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    entry_id TEXT NOT NULL,
                    mtime TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS entries (
                    folder_id TEXT NOT NULL,
                    id TEXT NOT NULL,
                    parent_id TEXT,
                    path TEXT NOT NULL,
                    digest TEXT NOT NULL,
                    mtime TEXT NOT NULL,
                    PRIMARY KEY (folder_id, id)
                );

                CREATE INDEX IF NOT EXISTS idx_entries_parent ON entries(parent_id);
                "#,
            )
            .context("Failed to initialize journal schema")?;

        debug!("Journal schema initialized");
        Ok(())
    }

    // =========================================================================
    // Folder operations
    // =========================================================================

    /// Insert or update a folder row by primary key
    pub fn upsert_folder(
        &self,
        id: &str,
        name: &str,
        entry_id: &str,
        mtime: DateTime<Utc>,
    ) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO folders (id, name, entry_id, mtime)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(id) DO UPDATE SET
                    name = ?2,
                    entry_id = ?3,
                    mtime = ?4
                "#,
                params![id, name, entry_id, mtime.to_rfc3339()],
            )
            .context("Failed to upsert folder")?;

        debug!("Journal folder upserted: {} ({})", name, id);
        Ok(())
    }

    pub fn update_folder_mtime(&self, id: &str, mtime: DateTime<Utc>) -> Result<()> {
        self.conn
            .execute(
                "UPDATE folders SET mtime = ?2 WHERE id = ?1",
                params![id, mtime.to_rfc3339()],
            )
            .context("Failed to update folder mtime")?;
        Ok(())
    }

    pub fn get_folder(&self, id: &str) -> Result<Option<FolderRow>> {
        self.conn
            .query_row(
                "SELECT id, name, entry_id, mtime FROM folders WHERE id = ?1",
                params![id],
                Self::map_folder,
            )
            .optional()
            .context("Failed to query folder")
    }

    pub fn get_folders(&self) -> Result<Vec<FolderRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, entry_id, mtime FROM folders ORDER BY id")?;
        let folders = stmt
            .query_map([], Self::map_folder)
            .context("Failed to query folders")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect folders")?;
        Ok(folders)
    }

    /// Remove a folder row; entry rows are removed separately via
    /// [`Journal::delete_entries_by_folder`]
    pub fn delete_folder(&self, id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM folders WHERE id = ?1", params![id])
            .context("Failed to delete folder")?;
        debug!("Journal folder deleted: {}", id);
        Ok(())
    }

    // =========================================================================
    // Entry operations
    // =========================================================================

    /// Insert or update an entry row by composite primary key
    pub fn upsert_entry(
        &self,
        folder_id: &str,
        id: &str,
        parent_id: Option<&str>,
        path: &str,
        digest: &str,
        mtime: DateTime<Utc>,
    ) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO entries (folder_id, id, parent_id, path, digest, mtime)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(folder_id, id) DO UPDATE SET
                    parent_id = ?3,
                    path = ?4,
                    digest = ?5,
                    mtime = ?6
                "#,
                params![folder_id, id, parent_id, path, digest, mtime.to_rfc3339()],
            )
            .context("Failed to upsert entry")?;

        debug!("Journal entry upserted: {}/{} -> {}", folder_id, id, path);
        Ok(())
    }

    /// Record the outcome of a successful reconciling action
    pub fn update_entry(
        &self,
        folder_id: &str,
        id: &str,
        mtime: DateTime<Utc>,
        digest: &str,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE entries SET mtime = ?3, digest = ?4 WHERE folder_id = ?1 AND id = ?2",
                params![folder_id, id, mtime.to_rfc3339(), digest],
            )
            .context("Failed to update entry")?;
        Ok(())
    }

    pub fn get_entry(&self, folder_id: &str, id: &str) -> Result<Option<EntryRow>> {
        self.conn
            .query_row(
                "SELECT folder_id, id, parent_id, path, digest, mtime \
                 FROM entries WHERE folder_id = ?1 AND id = ?2",
                params![folder_id, id],
                Self::map_entry,
            )
            .optional()
            .context("Failed to query entry")
    }

    pub fn get_entries_by_folder(&self, folder_id: &str) -> Result<Vec<EntryRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT folder_id, id, parent_id, path, digest, mtime \
             FROM entries WHERE folder_id = ?1 ORDER BY path",
        )?;
        let entries = stmt
            .query_map(params![folder_id], Self::map_entry)
            .context("Failed to query entries by folder")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect entries")?;
        Ok(entries)
    }

    pub fn get_entries_by_parent(&self, parent_id: &str) -> Result<Vec<EntryRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT folder_id, id, parent_id, path, digest, mtime \
             FROM entries WHERE parent_id = ?1 ORDER BY path",
        )?;
        let entries = stmt
            .query_map(params![parent_id], Self::map_entry)
            .context("Failed to query entries by parent")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect entries")?;
        Ok(entries)
    }

    pub fn delete_entry(&self, folder_id: &str, id: &str) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM entries WHERE folder_id = ?1 AND id = ?2",
                params![folder_id, id],
            )
            .context("Failed to delete entry")?;
        debug!("Journal entry deleted: {}/{}", folder_id, id);
        Ok(())
    }

    pub fn delete_entries_by_folder(&self, folder_id: &str) -> Result<()> {
        let removed = self
            .conn
            .execute("DELETE FROM entries WHERE folder_id = ?1", params![folder_id])
            .context("Failed to delete entries by folder")?;
        debug!("Removed {} journal entries for folder {}", removed, folder_id);
        Ok(())
    }

    /// Remove every entry whose parent chain resolves to `parent_id`.
    ///
    /// Walks the hierarchy with an explicit work-stack over the parent index
    /// (deep trees must not recurse) and deletes inside one transaction so no
    /// orphaned rows are observable.
    pub fn delete_entries_by_parent(&self, parent_id: &str) -> Result<()> {
        let mut doomed: Vec<(String, String)> = Vec::new();
        let mut stack = vec![parent_id.to_string()];

        while let Some(current) = stack.pop() {
            for child in self.get_entries_by_parent(&current)? {
                if child.is_directory() {
                    stack.push(child.id.clone());
                }
                doomed.push((child.folder_id, child.id));
            }
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to start cascade delete")?;
        for (folder_id, id) in &doomed {
            tx.execute(
                "DELETE FROM entries WHERE folder_id = ?1 AND id = ?2",
                params![folder_id, id],
            )
            .context("Failed to delete descendant entry")?;
        }
        tx.commit().context("Failed to commit cascade delete")?;

        debug!("Removed {} descendants of {}", doomed.len(), parent_id);
        Ok(())
    }

    // =========================================================================
    // Row mapping
    // =========================================================================

    fn map_folder(row: &rusqlite::Row<'_>) -> rusqlite::Result<FolderRow> {
        Ok(FolderRow {
            id: row.get(0)?,
            name: row.get(1)?,
            entry_id: row.get(2)?,
            mtime: Self::parse_time(&row.get::<_, String>(3)?),
        })
    }

    fn map_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntryRow> {
        Ok(EntryRow {
            folder_id: row.get(0)?,
            id: row.get(1)?,
            parent_id: row.get(2)?,
            path: row.get(3)?,
            digest: row.get(4)?,
            mtime: Self::parse_time(&row.get::<_, String>(5)?),
        })
    }

    fn parse_time(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }
}
