//! End-to-end reconciliation tests against an in-memory remote store

mod common;

use common::{harness, FakeRemote};
use std::sync::Arc;
use treeline::remote::RemoteStore;
use treeline::{create_policy, ChangeKind, PolicyKind};

/// One folder with a file, a subdirectory and a nested file
fn seed_basic_tree(remote: &FakeRemote) -> (String, String, String, String, String) {
    let (folder_id, root_id) = remote.add_folder("notes");
    let a_id = remote.add_file(&folder_id, &root_id, "notes/a.txt", b"alpha");
    let sub_id = remote.add_directory(&folder_id, &root_id, "notes/sub");
    let b_id = remote.add_file(&folder_id, &sub_id, "notes/sub/b.txt", b"beta");
    (folder_id, root_id, a_id, sub_id, b_id)
}

#[tokio::test]
async fn test_populate_mirrors_remote_tree() {
    let remote = FakeRemote::new();
    let (folder_id, _, _, _, _) = seed_basic_tree(&remote);
    let th = harness(remote, "alice");

    let summary = th.engine.populate().await.unwrap();

    assert_eq!(summary.applied, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(th.local.read("notes/a.txt").unwrap(), b"alpha");
    assert_eq!(th.local.read("notes/sub/b.txt").unwrap(), b"beta");
    assert!(th.local.is_dir("notes/sub"));

    let journal = th.engine.journal();
    assert!(journal.get_folder(&folder_id).unwrap().is_some());
    assert_eq!(journal.get_entries_by_folder(&folder_id).unwrap().len(), 3);
}

#[tokio::test]
async fn test_populate_is_idempotent() {
    let remote = FakeRemote::new();
    let (folder_id, _, _, _, _) = seed_basic_tree(&remote);
    let th = harness(remote, "alice");

    th.engine.populate().await.unwrap();
    let rows_before = th
        .engine
        .journal()
        .get_entries_by_folder(&folder_id)
        .unwrap();

    th.engine.populate().await.unwrap();
    let rows_after = th
        .engine
        .journal()
        .get_entries_by_folder(&folder_id)
        .unwrap();

    assert_eq!(rows_before.len(), rows_after.len());
    assert_eq!(th.local.read("notes/a.txt").unwrap(), b"alpha");
    assert!(th.engine.status().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_pull_without_remote_changes_applies_nothing() {
    let remote = FakeRemote::new();
    seed_basic_tree(&remote);
    let th = harness(remote, "alice");

    th.engine.populate().await.unwrap();
    let summary = th.engine.pull().await.unwrap();

    assert_eq!(summary.applied, 0);
    assert_eq!(summary.deferred, 0);
    assert_eq!(summary.failed, 0);
}

#[tokio::test]
async fn test_pull_applies_remote_modification() {
    let remote = FakeRemote::new();
    let (_, _, a_id, _, _) = seed_basic_tree(&remote);
    let th = harness(remote, "alice");

    th.engine.populate().await.unwrap();
    th.remote.change_file(&a_id, b"alpha v2");

    let summary = th.engine.pull().await.unwrap();
    assert_eq!(summary.applied, 1);
    assert_eq!(th.local.read("notes/a.txt").unwrap(), b"alpha v2");

    // the folder mtime was committed, so a second pass is a no-op
    let again = th.engine.pull().await.unwrap();
    assert_eq!(again.applied, 0);
}

#[tokio::test]
async fn test_pull_remote_directory_delete_cascades() {
    let remote = FakeRemote::new();
    let (folder_id, _, _, sub_id, _) = seed_basic_tree(&remote);
    let th = harness(remote, "alice");

    th.engine.populate().await.unwrap();
    th.remote.remove_entry(&sub_id);

    th.engine.pull().await.unwrap();

    assert!(!th.local.exists("notes/sub"));
    assert!(!th.local.exists("notes/sub/b.txt"));
    assert!(th.local.is_file("notes/a.txt"));

    // no orphaned rows survive the directory removal
    let rows = th
        .engine
        .journal()
        .get_entries_by_folder(&folder_id)
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].path, "notes/a.txt");
}

#[tokio::test]
async fn test_pull_adopts_folder_created_after_populate() {
    let remote = FakeRemote::new();
    seed_basic_tree(&remote);
    let th = harness(remote, "alice");

    th.engine.populate().await.unwrap();

    let (photos_id, photos_root) = th.remote.add_folder("photos");
    th.remote
        .add_file(&photos_id, &photos_root, "photos/cat.jpg", b"jpeg");

    th.engine.pull().await.unwrap();

    assert!(th.local.is_dir("photos"));
    assert_eq!(th.local.read("photos/cat.jpg").unwrap(), b"jpeg");
    assert!(th
        .engine
        .journal()
        .get_folder(&photos_id)
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_pull_removes_remotely_deleted_folder() {
    let remote = FakeRemote::new();
    let (folder_id, _, _, _, _) = seed_basic_tree(&remote);
    let th = harness(remote, "alice");

    th.engine.populate().await.unwrap();
    th.remote.remove_folder(&folder_id);

    th.engine.pull().await.unwrap();

    assert!(!th.local.exists("notes"));
    assert!(th.engine.journal().get_folders().unwrap().is_empty());
    assert!(th
        .engine
        .journal()
        .get_entries_by_folder(&folder_id)
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_push_modification_updates_remote() {
    let remote = FakeRemote::new();
    let (_, _, a_id, _, _) = seed_basic_tree(&remote);
    let th = harness(remote, "alice");

    th.engine.populate().await.unwrap();
    th.local.write("notes/a.txt", b"edited locally").unwrap();

    let summary = th.engine.push().await.unwrap();
    assert_eq!(summary.applied, 1);
    assert_eq!(
        th.remote.file_content(&a_id).unwrap(),
        b"edited locally".to_vec()
    );

    // the journal absorbed the new digest; nothing is pending afterwards
    assert!(th.engine.status().await.unwrap().is_empty());
    let again = th.engine.push().await.unwrap();
    assert_eq!(again.applied, 0);
}

#[tokio::test]
async fn test_push_nested_edit_writes_exactly_one_file() {
    let remote = FakeRemote::new();
    seed_basic_tree(&remote);
    let th = harness(remote, "alice");

    th.engine.populate().await.unwrap();
    let writes_before = th.remote.file_write_count();

    th.local.write("notes/sub/b.txt", b"beta v2").unwrap();
    th.engine.push().await.unwrap();

    // the enclosing directory is examined but only the file carries content
    assert_eq!(th.remote.file_write_count(), writes_before + 1);
}

#[tokio::test]
async fn test_push_file_deletion() {
    let remote = FakeRemote::new();
    let (folder_id, _, _, _, _) = seed_basic_tree(&remote);
    let th = harness(remote, "alice");

    th.engine.populate().await.unwrap();
    th.local.remove_file("notes/a.txt").unwrap();

    let summary = th.engine.push().await.unwrap();
    assert_eq!(summary.applied, 1);
    assert!(th.remote.entry_id_by_path(&folder_id, "notes/a.txt").is_none());
    assert!(th
        .engine
        .journal()
        .get_entries_by_folder(&folder_id)
        .unwrap()
        .iter()
        .all(|row| row.path != "notes/a.txt"));
}

#[tokio::test]
async fn test_push_directory_deletion_cascades() {
    let remote = FakeRemote::new();
    let (folder_id, _, _, _, _) = seed_basic_tree(&remote);
    let th = harness(remote, "alice");

    th.engine.populate().await.unwrap();
    th.local.remove_dir_all("notes/sub").unwrap();

    th.engine.push().await.unwrap();

    assert!(th.remote.entry_id_by_path(&folder_id, "notes/sub").is_none());
    assert!(th
        .remote
        .entry_id_by_path(&folder_id, "notes/sub/b.txt")
        .is_none());

    let rows = th
        .engine
        .journal()
        .get_entries_by_folder(&folder_id)
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].path, "notes/a.txt");
}

#[tokio::test]
async fn test_transient_fault_defers_until_next_pass() {
    let remote = FakeRemote::new();
    let (_, _, a_id, _, _) = seed_basic_tree(&remote);
    let th = harness(remote, "alice");

    th.engine.populate().await.unwrap();
    th.local.write("notes/a.txt", b"blocked edit").unwrap();

    th.remote.set_fail_writes(true);
    let blocked = th.engine.push().await.unwrap();
    assert_eq!(blocked.applied, 0);
    assert_eq!(blocked.deferred, 1);
    assert_eq!(th.remote.file_content(&a_id).unwrap(), b"alpha".to_vec());

    // the change is still pending and the next pass retries it
    th.remote.set_fail_writes(false);
    let retried = th.engine.push().await.unwrap();
    assert_eq!(retried.applied, 1);
    assert_eq!(
        th.remote.file_content(&a_id).unwrap(),
        b"blocked edit".to_vec()
    );
}

#[tokio::test]
async fn test_status_reports_pending_local_changes() {
    let remote = FakeRemote::new();
    seed_basic_tree(&remote);
    let th = harness(remote, "alice");

    th.engine.populate().await.unwrap();
    th.local.write("notes/a.txt", b"edited").unwrap();
    th.local.remove_file("notes/sub/b.txt").unwrap();
    th.local.write("notes/new.txt", b"untracked").unwrap();

    let pending = th.engine.status().await.unwrap();
    let described: Vec<(String, ChangeKind)> = pending
        .iter()
        .map(|p| (p.path.clone(), p.kind))
        .collect();

    assert_eq!(
        described,
        vec![
            ("notes/a.txt".to_string(), ChangeKind::Modify),
            ("notes/new.txt".to_string(), ChangeKind::Add),
            ("notes/sub/b.txt".to_string(), ChangeKind::Delete),
        ]
    );
}

#[tokio::test]
async fn test_remote_file_collision_renames_local_copy() {
    let remote = FakeRemote::new();
    let (folder_id, root_id) = remote.add_folder("notes");
    remote.add_file(&folder_id, &root_id, "notes/draft.txt", b"theirs");
    let th = harness(remote, "alice");

    th.local.write("notes/draft.txt", b"mine").unwrap();

    let remote_dyn: Arc<dyn RemoteStore> = th.remote.clone();
    let policy = create_policy(
        PolicyKind::Default,
        remote_dyn,
        Arc::clone(&th.local),
        "alice".to_string(),
    );

    let applied = policy
        .add_remote_file(&folder_id, &root_id, "notes/draft.txt")
        .await
        .unwrap();
    assert!(applied);

    // the local copy moved aside and was uploaded under the renamed path
    assert!(!th.local.exists("notes/draft.txt"));
    assert!(th.local.is_file("notes/draft-alice.txt"));
    let renamed_id = th
        .remote
        .entry_id_by_path(&folder_id, "notes/draft-alice.txt")
        .unwrap();
    assert_eq!(th.remote.file_content(&renamed_id).unwrap(), b"mine".to_vec());
}

#[tokio::test]
async fn test_remote_directory_collision_renames_and_leaves_placeholder() {
    let remote = FakeRemote::new();
    let (folder_id, root_id) = remote.add_folder("notes");
    remote.add_directory(&folder_id, &root_id, "notes/proj");
    let th = harness(remote, "bob");

    th.local.mkdir_all("notes/proj").unwrap();
    th.local.write("notes/proj/todo.md", b"- ship it").unwrap();

    let remote_dyn: Arc<dyn RemoteStore> = th.remote.clone();
    let policy = create_policy(
        PolicyKind::Default,
        remote_dyn,
        Arc::clone(&th.local),
        "bob".to_string(),
    );

    let applied = policy
        .add_remote_directory(&folder_id, &root_id, "notes/proj")
        .await
        .unwrap();
    assert!(applied);

    assert!(th.local.is_dir("notes/proj-bob"));
    assert!(th.local.is_file("notes/proj-bob/todo.md"));
    // a placeholder stays where the remote's own hierarchy will land
    assert!(th.local.is_dir("notes/proj"));
    assert!(th
        .remote
        .entry_id_by_path(&folder_id, "notes/proj-bob")
        .is_some());
}
