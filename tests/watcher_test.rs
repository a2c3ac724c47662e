//! End-to-end change watching against a real directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use specdex::config::IndexingConfig;
use specdex::documents::{Discovery, DocumentParser};
use specdex::indexing::BulkLoader;
use specdex::registry::Registry;
use specdex::watcher::{ChangeWatcher, WatcherState};
use tempfile::TempDir;

const DEBOUNCE: Duration = Duration::from_millis(300);

fn spec(id: &str, doc_type: &str, body: &str) -> String {
    format!("---\nid: {id}\ntitle: {id} title\ntype: {doc_type}\n---\n{body}\n")
}

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

struct Fixture {
    _dir: TempDir,
    root: PathBuf,
    registry: Arc<Registry>,
    watcher: ChangeWatcher,
}

/// Load `files` into a fresh registry and start watching the root.
async fn start(files: &[(&str, String)]) -> Fixture {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    for (rel, content) in files {
        write(&root.join(rel), content);
    }

    let registry = Arc::new(Registry::new());
    BulkLoader::new(
        Discovery::default(),
        DocumentParser::default(),
        IndexingConfig::default(),
    )
    .load(&root, &registry)
    .unwrap();

    let watcher = ChangeWatcher::builder()
        .registry(Arc::clone(&registry))
        .debounce(DEBOUNCE)
        .workers(2)
        .build()
        .unwrap();
    watcher.start_watching(&[root.clone()]).unwrap();
    assert_eq!(watcher.state(), WatcherState::Watching);

    // Give the notification backend a moment to settle
    tokio::time::sleep(Duration::from_millis(100)).await;

    Fixture {
        _dir: dir,
        root,
        registry,
        watcher,
    }
}

/// Poll until `condition` holds or the deadline passes.
async fn wait_for(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    condition()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rapid_modifications_collapse_into_one_upsert() {
    let fx = start(&[("E01/spec.md", spec("E01", "epic", "v0"))]).await;
    let path = fx.root.join("E01/spec.md");

    for version in 1..=5 {
        write(&path, &spec("E01", "epic", &format!("v{version}")));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let registry = Arc::clone(&fx.registry);
    assert!(wait_for(|| registry.get("E01").is_some_and(|d| d.body.contains("v5"))).await);

    // Nothing else may arrive after the burst settled
    tokio::time::sleep(DEBOUNCE * 2).await;
    assert_eq!(fx.watcher.stats().reparsed(), 1);
    assert_eq!(fx.watcher.stats().upserted(), 1);
    assert_eq!(fx.registry.get("E01").unwrap().body, "v5\n");

    fx.watcher.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_new_file_is_added() {
    let fx = start(&[("E01/spec.md", spec("E01", "epic", "epic"))]).await;

    write(
        &fx.root.join("E01/F01.spec.md"),
        &spec("E01-F01", "feature", "feature"),
    );

    let registry = Arc::clone(&fx.registry);
    assert!(wait_for(|| registry.contains("E01-F01")).await);
    assert_eq!(fx.registry.get_children("E01").len(), 1);

    fx.watcher.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_deleted_file_removes_document_only() {
    let fx = start(&[
        ("E01/spec.md", spec("E01", "epic", "epic")),
        ("E01/F01/spec.md", spec("E01-F01", "feature", "feature")),
    ])
    .await;

    fs::remove_file(fx.root.join("E01/spec.md")).unwrap();

    let registry = Arc::clone(&fx.registry);
    assert!(wait_for(|| !registry.contains("E01")).await);
    assert!(fx.registry.contains("E01-F01"));
    assert!(fx.registry.get_tree()[0].orphan);
    assert_eq!(fx.watcher.stats().deleted(), 1);

    fx.watcher.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalid_edit_keeps_previous_state() {
    let fx = start(&[("E01/spec.md", spec("E01", "epic", "good"))]).await;

    write(&fx.root.join("E01/spec.md"), "---\ntitle: [unclosed\n---\n");

    let watcher = &fx.watcher;
    assert!(wait_for(|| watcher.stats().parse_failures() == 1).await);
    let doc = fx.registry.get("E01").unwrap();
    assert_eq!(doc.body, "good\n");
    assert_eq!(fx.watcher.stats().upserted(), 0);

    fx.watcher.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_changed_id_replaces_old_document() {
    let fx = start(&[("E01/spec.md", spec("E01", "epic", "body"))]).await;

    write(&fx.root.join("E01/spec.md"), &spec("E09", "epic", "body"));

    let registry = Arc::clone(&fx.registry);
    assert!(wait_for(|| registry.contains("E09") && !registry.contains("E01")).await);
    assert_eq!(fx.registry.len(), 1);

    fx.watcher.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_directory_moved_away_removes_its_documents() {
    let outside = TempDir::new().unwrap();
    let fx = start(&[
        ("E01/spec.md", spec("E01", "epic", "keep")),
        ("E02/spec.md", spec("E02", "epic", "gone")),
        ("E02/F01/spec.md", spec("E02-F01", "feature", "gone")),
    ])
    .await;

    fs::rename(fx.root.join("E02"), outside.path().join("E02")).unwrap();

    let registry = Arc::clone(&fx.registry);
    assert!(wait_for(|| registry.len() == 1).await);
    assert!(fx.registry.contains("E01"));

    fx.watcher.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_no_changes_after_stop() {
    let fx = start(&[("E01/spec.md", spec("E01", "epic", "before"))]).await;

    // Pending timer is cancelled by stop
    write(&fx.root.join("E01/spec.md"), &spec("E01", "epic", "after"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    fx.watcher.stop().await;
    assert_eq!(fx.watcher.state(), WatcherState::Stopped);

    tokio::time::sleep(DEBOUNCE * 2).await;
    assert_eq!(fx.registry.get("E01").unwrap().body, "before\n");
    assert_eq!(fx.watcher.stats().reparsed(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_directory_moved_in_adds_its_documents() {
    let outside = TempDir::new().unwrap();
    write(&outside.path().join("E05/spec.md"), &spec("E05", "epic", "moved"));
    write(
        &outside.path().join("E05/F01/spec.md"),
        &spec("E05-F01", "feature", "moved"),
    );
    let fx = start(&[("E01/spec.md", spec("E01", "epic", "keep"))]).await;

    fs::rename(outside.path().join("E05"), fx.root.join("E05")).unwrap();

    let registry = Arc::clone(&fx.registry);
    assert!(wait_for(|| registry.contains("E05") && registry.contains("E05-F01")).await);
    assert_eq!(fx.registry.get_children("E05").len(), 1);

    fx.watcher.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_busy_workers_do_not_mutate_after_stop() {
    let fx = start(&[("E01/spec.md", spec("E01", "epic", "v0"))]).await;

    for n in 1..=40 {
        write(
            &fx.root.join(format!("E{n:02}/F01.spec.md")),
            &spec(&format!("E{n:02}-F01"), "feature", "new"),
        );
    }
    // Let some timers fire so workers are running when stop lands
    tokio::time::sleep(DEBOUNCE + Duration::from_millis(10)).await;
    fx.watcher.stop().await;

    let len = fx.registry.len();
    let upserted = fx.watcher.stats().upserted();
    tokio::time::sleep(DEBOUNCE * 2).await;
    assert_eq!(fx.registry.len(), len);
    assert_eq!(fx.watcher.stats().upserted(), upserted);
}
