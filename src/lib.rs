//! Treeline - Two-Endpoint Folder Synchronization Client
//!
//! Treeline mirrors a set of folders from a remote entry store into a local
//! directory tree and pushes local edits back, using a persistent journal as
//! the third vantage point that makes change detection and conflict handling
//! tractable.
//!
//! ## Core Features
//!
//! - **Journal**: SQLite record of the last fully synchronized state
//! - **Change Classification**: digest-based local detection, log-based remote detection
//! - **Conflict Policy**: pluggable resolution with deterministic collision renames
//! - **Configuration Management**: YAML-based configuration with XDG compliance
//!
//! ## Modules
//!
//! - [`config`]: Configuration management and parsing
//! - [`journal`]: Persistent synchronized-state record
//! - [`remote`]: Remote store abstraction and wire types
//! - [`http`]: JSON-over-HTTP remote store client
//! - [`localfs`]: Local tree access and content digests
//! - [`classify`]: Change detection against the journal
//! - [`policy`]: Conflict resolution strategies
//! - [`engine`]: Reconciliation driver (populate, pull, push, status)

pub mod classify;
pub mod config;
pub mod engine;
pub mod http;
pub mod journal;
pub mod localfs;
pub mod policy;
pub mod remote;

pub use classify::{ChangeDescriptor, ChangeKind, Classifier, Side};
pub use config::Config;
pub use engine::{Engine, PendingChange, RunSummary};
pub use http::HttpRemote;
pub use journal::Journal;
pub use localfs::LocalTree;
pub use policy::{create_policy, ConflictPolicy, PolicyKind};
pub use remote::{ChangeAction, ChangeRecord, EntryKind, RemoteEntry, RemoteError, RemoteFolder, RemoteStore};
