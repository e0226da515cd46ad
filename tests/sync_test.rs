//! End-to-end sync behaviour against the loopback remote
//!
//! Tests verify:
//! 1. The authoritative side wins a full pass
//! 2. A second pass over unchanged trees does nothing
//! 3. Swapping roles and trees gives the same result
//! 4. Watcher-driven passes, debounce coalescing and loop suppression
//! 5. The streaming notifier: events, start failure and reconnects
//! 6. The mirror tool and the snapshot-diff path agree, and stop kills it

mod common;

use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

use common::{
	process_gone, read_file, script, set_mtime, tree, wait_for, write_file, Harness,
};
use remsync::probe::{local_tool_available, MirrorMode, RemoteWatchMode};
use remsync::types::{Direction, LogAction, SyncStatus};

/// Entries ending in `/` are directories, the rest are files with content
fn populate(root: &Path, entries: &[(&str, &str)]) {
	for (path, content) in entries {
		match path.strip_suffix('/') {
			Some(dir) => std::fs::create_dir_all(root.join(dir)).unwrap(),
			None => write_file(root, path, content),
		}
	}
}

const TREE_A: &[(&str, &str)] = &[
	("index.html", "<h1>new</h1>"),
	("css/site.css", "body {}"),
	("img/", ""),
	("docs/guide/intro.md", "# Intro"),
];

const TREE_B: &[(&str, &str)] = &[
	("index.html", "<h1>old version</h1>"),
	("stale.txt", "remove me"),
	("old/nested/file.txt", "remove me too"),
	("css/", ""),
	("img", "was a file"),
];

// ============================================================================
// Full passes
// ============================================================================

#[tokio::test]
async fn test_local_source_scenario() {
	let h = Harness::new();
	let local = h.local.path();
	let remote = h.remote.path();

	write_file(local, "a.txt", "0123456789");
	set_mtime(local, "a.txt", 100);
	std::fs::create_dir(local.join("b")).unwrap();
	write_file(remote, "a.txt", "0123456789ab");
	set_mtime(remote, "a.txt", 90);
	write_file(remote, "c.txt", "gone");

	let rule = h.add_rule("local");
	h.start_synced(&rule.id).await;
	h.manager.stop(&rule.id).await.unwrap();

	assert_eq!(read_file(remote, "a.txt").as_deref(), Some("0123456789"));
	assert!(remote.join("b").is_dir());
	assert!(!remote.join("c.txt").exists());

	let uploads = h.logs_with(&rule.id, LogAction::Upload);
	let deletes = h.logs_with(&rule.id, LogAction::Delete);
	assert_eq!(uploads.len(), 2);
	assert_eq!(deletes.len(), 1);
	assert_eq!(deletes[0].file_path, "c.txt");
	assert!(uploads
		.iter()
		.chain(deletes.iter())
		.all(|e| e.direction == Some(Direction::LocalToRemote)));
	assert!(h.events.logs_for(&rule.id).iter().any(|e| e.message == "Snapshot sync complete: 3 operations"));
}

#[tokio::test]
async fn test_remote_source_wins() {
	let h = Harness::new();
	populate(h.remote.path(), TREE_A);
	populate(h.local.path(), TREE_B);
	let expected = tree(h.remote.path());

	let rule = h.add_rule("remote");
	h.start_synced(&rule.id).await;
	h.manager.stop(&rule.id).await.unwrap();

	assert_eq!(tree(h.local.path()), expected);
	assert_eq!(tree(h.remote.path()), expected);
	assert!(h
		.logs_with(&rule.id, LogAction::Download)
		.iter()
		.all(|e| e.direction == Some(Direction::RemoteToLocal)));
}

#[tokio::test]
async fn test_second_pass_is_noop() {
	let h = Harness::new();
	populate(h.local.path(), TREE_A);
	populate(h.remote.path(), TREE_B);

	let rule = h.add_rule("local");
	h.start_synced(&rule.id).await;
	h.manager.stop(&rule.id).await.unwrap();
	let after_first = tree(h.remote.path());

	h.events.clear();
	h.start_synced(&rule.id).await;
	h.manager.stop(&rule.id).await.unwrap();

	let logs = h.events.logs_for(&rule.id);
	assert!(logs.iter().any(|e| e.message == "Snapshot sync complete: 0 operations"));
	assert!(!logs.iter().any(|e| e.is_transfer() || e.action == LogAction::Delete));
	assert_eq!(tree(h.remote.path()), after_first);
}

#[tokio::test]
async fn test_direction_symmetry() {
	let push = Harness::new();
	populate(push.local.path(), TREE_A);
	populate(push.remote.path(), TREE_B);
	let rule = push.add_rule("local");
	push.start_synced(&rule.id).await;
	push.manager.stop(&rule.id).await.unwrap();

	let pull = Harness::new();
	populate(pull.local.path(), TREE_B);
	populate(pull.remote.path(), TREE_A);
	let rule = pull.add_rule("remote");
	pull.start_synced(&rule.id).await;
	pull.manager.stop(&rule.id).await.unwrap();

	assert_eq!(tree(push.remote.path()), tree(pull.local.path()));
}

#[tokio::test]
async fn test_unusable_local_root_fails_pass() {
	let h = Harness::new();
	let blocker = h.local.path().join("blocker");
	write_file(h.local.path(), "blocker", "not a directory");

	let mut spec = h.spec("local");
	spec.local_path = blocker.join("site").to_string_lossy().into_owned();
	let rule = h.manager.add_rule(spec).unwrap();

	h.manager.start(&rule.id).await.unwrap();
	assert!(wait_for(Duration::from_secs(5), || h.status(&rule.id) == SyncStatus::Error).await);

	let current = h.manager.get_rule(&rule.id).unwrap();
	assert!(current.error.starts_with("Initial sync failed"));
	assert!(current.active);
	let failures: Vec<_> = h
		.logs_with(&rule.id, LogAction::Error)
		.into_iter()
		.filter(|e| e.message.starts_with("Initial sync failed"))
		.collect();
	assert_eq!(failures.len(), 1);

	h.manager.stop(&rule.id).await.unwrap();
	assert_eq!(h.status(&rule.id), SyncStatus::Idle);
}

// ============================================================================
// Watchers
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_local_change_is_pushed() {
	let h = Harness::new();
	let rule = h.add_rule("local");
	h.start_synced(&rule.id).await;
	// Let the cooldown after the initial pass run out
	assert!(wait_for(Duration::from_secs(2), || !h.manager.is_syncing(&rule.id)).await);

	write_file(h.local.path(), "fresh.txt", "hello");
	assert!(
		wait_for(Duration::from_secs(5), || read_file(h.remote.path(), "fresh.txt").is_some()).await
	);
	assert_eq!(read_file(h.remote.path(), "fresh.txt").as_deref(), Some("hello"));

	h.manager.stop(&rule.id).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_remote_change_is_pulled() {
	let h = Harness::new();
	let rule = h.add_rule("remote");
	h.start_synced(&rule.id).await;
	assert!(wait_for(Duration::from_secs(2), || !h.manager.is_syncing(&rule.id)).await);

	write_file(h.remote.path(), "docs/new.md", "# New");
	assert!(
		wait_for(Duration::from_secs(5), || read_file(h.local.path(), "docs/new.md").is_some()).await
	);

	h.manager.stop(&rule.id).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_burst_is_coalesced() {
	let h = Harness::with_config(|config| {
		config.timing.debounce_ms = 400;
	});
	let rule = h.add_rule("local");
	h.start_synced(&rule.id).await;
	assert!(wait_for(Duration::from_secs(2), || !h.manager.is_syncing(&rule.id)).await);
	assert_eq!(h.passes(&rule.id), 1);

	for i in 0..10 {
		write_file(h.local.path(), &format!("burst/file{}.txt", i), "x");
	}

	assert!(wait_for(Duration::from_secs(5), || h.passes(&rule.id) >= 2).await);
	tokio::time::sleep(Duration::from_millis(1500)).await;
	assert_eq!(h.passes(&rule.id), 2);
	assert_eq!(tree(h.remote.path()), tree(h.local.path()));

	h.manager.stop(&rule.id).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_own_writes_do_not_retrigger() {
	let h = Harness::with_config(|config| {
		config.timing.cooldown_ms = 1500;
	});
	let rule = h.add_rule("remote");
	h.start_synced(&rule.id).await;
	assert!(wait_for(Duration::from_secs(4), || !h.manager.is_syncing(&rule.id)).await);

	// The download lands in the watched local tree
	write_file(h.remote.path(), "pulled.txt", "from remote");
	assert!(wait_for(Duration::from_secs(5), || read_file(h.local.path(), "pulled.txt").is_some()).await);
	assert!(wait_for(Duration::from_secs(2), || h.passes(&rule.id) == 2).await);

	// Guard stays up through the cooldown window
	assert!(h.manager.is_syncing(&rule.id));

	tokio::time::sleep(Duration::from_millis(2500)).await;
	assert_eq!(h.passes(&rule.id), 2);
	assert!(!h.manager.is_syncing(&rule.id));

	h.manager.stop(&rule.id).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ignored_files_do_not_trigger() {
	let h = Harness::new();
	let rule = h.add_rule("local");
	h.start_synced(&rule.id).await;
	assert!(wait_for(Duration::from_secs(2), || !h.manager.is_syncing(&rule.id)).await);

	write_file(h.local.path(), ".hidden", "x");
	write_file(h.local.path(), "notes.txt~", "x");
	write_file(h.local.path(), "edit.swp", "x");

	tokio::time::sleep(Duration::from_millis(1000)).await;
	assert_eq!(h.passes(&rule.id), 1);

	h.manager.stop(&rule.id).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_new_nested_tree_is_watched() {
	let h = Harness::new();
	let rule = h.add_rule("local");
	h.start_synced(&rule.id).await;
	assert!(wait_for(Duration::from_secs(2), || !h.manager.is_syncing(&rule.id)).await);

	std::fs::create_dir_all(h.local.path().join("deep/er/tree")).unwrap();
	assert!(wait_for(Duration::from_secs(5), || h.remote.path().join("deep/er/tree").is_dir()).await);
	assert!(wait_for(Duration::from_secs(3), || !h.manager.is_syncing(&rule.id)).await);

	write_file(h.local.path(), "deep/er/tree/leaf.txt", "leaf");
	assert!(
		wait_for(Duration::from_secs(5), || read_file(h.remote.path(), "deep/er/tree/leaf.txt").is_some())
			.await
	);

	h.manager.stop(&rule.id).await.unwrap();
}

// ============================================================================
// Streaming notifier
// ============================================================================

/// Local-shell harness whose remote notifier runs `body`; no mirror tool
fn streaming_harness(bin: &Path, body: &str) -> Harness {
	let notifier = script(bin, "notifier", body);
	Harness::with_local_shell_config(move |config| {
		config.mirror.program = "remsync-no-mirror".into();
		config.watch.program = notifier.to_string_lossy().into_owned();
	})
}

fn count_logged(h: &Harness, id: &str, prefix: &str) -> usize {
	h.events.logs_for(id).iter().filter(|e| e.message.starts_with(prefix)).count()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_streamed_event_triggers_pass() {
	let bin = TempDir::new().unwrap();
	let go = bin.path().join("go");
	// The reported name is not valid UTF-8
	let h = streaming_harness(
		bin.path(),
		&format!(
			"while [ ! -e {} ]; do sleep 0.1; done\nprintf '/srv/caf\\351.txt CREATE\\n'\nexec sleep 1000",
			go.display()
		),
	);

	let rule = h.add_rule("remote");
	h.start_synced(&rule.id).await;
	assert_eq!(
		h.manager.active_modes(&rule.id),
		Some((MirrorMode::Fallback, RemoteWatchMode::Streaming))
	);
	assert!(
		wait_for(Duration::from_secs(2), || {
			count_logged(&h, &rule.id, "Remote streaming watcher started") == 1
		})
		.await
	);
	assert!(wait_for(Duration::from_secs(2), || !h.manager.is_syncing(&rule.id)).await);
	assert_eq!(h.passes(&rule.id), 1);

	write_file(h.remote.path(), "notified.txt", "streamed");
	std::fs::write(&go, "").unwrap();
	assert!(wait_for(Duration::from_secs(5), || h.passes(&rule.id) == 2).await);
	assert_eq!(read_file(h.local.path(), "notified.txt").as_deref(), Some("streamed"));

	// The notifier keeps running; stop must not wait for it
	let stopped = tokio::time::timeout(Duration::from_secs(10), h.manager.stop(&rule.id)).await;
	assert!(matches!(stopped, Ok(Ok(()))));
	assert_eq!(h.status(&rule.id), SyncStatus::Idle);
	assert_eq!(count_logged(&h, &rule.id, "Streaming watcher disconnected"), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stream_start_failure_falls_back_to_polling() {
	let bin = TempDir::new().unwrap();
	let h = streaming_harness(bin.path(), "exit 3");

	let rule = h.add_rule("remote");
	h.start_synced(&rule.id).await;
	assert!(
		wait_for(Duration::from_secs(3), || {
			count_logged(&h, &rule.id, "Remote polling watcher started") == 1
		})
		.await
	);

	let failures = h.logs_with(&rule.id, LogAction::Error);
	assert_eq!(failures.len(), 1);
	assert!(failures[0].message.starts_with("Failed to start"));
	assert!(failures[0].message.ends_with("exit status 3"));
	assert_eq!(count_logged(&h, &rule.id, "Remote streaming watcher started"), 1);

	// Polling now carries remote changes
	assert!(wait_for(Duration::from_secs(2), || !h.manager.is_syncing(&rule.id)).await);
	write_file(h.remote.path(), "polled.txt", "seen");
	assert!(
		wait_for(Duration::from_secs(5), || read_file(h.local.path(), "polled.txt").is_some()).await
	);

	h.manager.stop(&rule.id).await.unwrap();
}

/// Run a notifier that ends with `body` and expect repeated reconnects
async fn assert_reconnects(body: &str) {
	let bin = TempDir::new().unwrap();
	let runs = bin.path().join("runs");
	let h = streaming_harness(bin.path(), &format!("echo run >> {}\n{}", runs.display(), body));

	let rule = h.add_rule("local");
	h.start_synced(&rule.id).await;

	let run_count = || read_file(bin.path(), "runs").map(|s| s.lines().count()).unwrap_or(0);
	assert!(wait_for(Duration::from_secs(5), || run_count() >= 3).await);

	assert!(count_logged(&h, &rule.id, "Streaming watcher disconnected, reconnecting in 200ms") >= 2);
	assert_eq!(count_logged(&h, &rule.id, "Failed to start"), 0);
	assert_eq!(count_logged(&h, &rule.id, "Remote polling watcher started"), 0);

	h.manager.stop(&rule.id).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stream_reconnects_after_transport_failure() {
	assert_reconnects("exit 255").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stream_reconnects_after_output() {
	assert_reconnects("echo '/srv/a.txt MODIFY'\nexit 1").await;
}

// ============================================================================
// Mirror tool
// ============================================================================

#[tokio::test]
async fn test_mirror_tool_matches_fallback() {
	if !local_tool_available("rsync").await {
		eprintln!("rsync not installed, skipping");
		return;
	}

	let fallback = Harness::new();
	populate(fallback.local.path(), TREE_A);
	populate(fallback.remote.path(), TREE_B);
	let rule = fallback.add_rule("local");
	fallback.start_synced(&rule.id).await;
	fallback.manager.stop(&rule.id).await.unwrap();

	let tool = Harness::with_local_shell();
	populate(tool.local.path(), TREE_A);
	populate(tool.remote.path(), TREE_B);
	let rule = tool.add_rule("local");
	tool.manager.start(&rule.id).await.unwrap();
	assert_eq!(tool.manager.active_modes(&rule.id).map(|m| m.0), Some(MirrorMode::ToolAssisted));
	assert!(
		wait_for(Duration::from_secs(10), || tool.status(&rule.id) == SyncStatus::Synced).await
	);
	tool.manager.stop(&rule.id).await.unwrap();

	assert!(tool.events.logs_for(&rule.id).iter().any(|e| e.message.starts_with("rsync complete")));
	assert_eq!(tree(tool.remote.path()), tree(fallback.remote.path()));
}

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread")]
async fn test_stop_kills_running_mirror_tool() {
	let bin = TempDir::new().unwrap();
	let pid_file = bin.path().join("pid");
	let tool = script(
		bin.path(),
		"slowmirror",
		&format!(
			"if [ \"$1\" = --version ]; then echo 'slowmirror 1.0'; exit 0; fi\necho $$ > {}\nexec sleep 1000",
			pid_file.display()
		),
	);
	let h = Harness::with_local_shell_config(move |config| {
		config.mirror.program = tool.to_string_lossy().into_owned();
		config.watch.program = "remsync-no-watch".into();
	});

	let rule = h.add_rule("local");
	h.manager.start(&rule.id).await.unwrap();
	assert_eq!(h.manager.active_modes(&rule.id).map(|m| m.0), Some(MirrorMode::ToolAssisted));

	let pid = || read_file(bin.path(), "pid").and_then(|s| s.trim().parse::<u32>().ok());
	assert!(wait_for(Duration::from_secs(5), || pid().is_some()).await);
	let pid = pid().unwrap();
	assert!(!process_gone(pid));
	assert_eq!(h.status(&rule.id), SyncStatus::Syncing);

	let stopped = tokio::time::timeout(Duration::from_secs(10), h.manager.stop(&rule.id)).await;
	assert!(matches!(stopped, Ok(Ok(()))));
	assert_eq!(h.status(&rule.id), SyncStatus::Idle);
	assert!(wait_for(Duration::from_secs(2), || process_gone(pid)).await);

	// Cancellation is not a failure, and nothing follows stop
	let logs = h.events.logs_for(&rule.id);
	assert!(!logs.iter().any(|e| e.action == LogAction::Error));
	tokio::time::sleep(Duration::from_millis(500)).await;
	assert_eq!(h.events.logs_for(&rule.id).len(), logs.len());
}

// vim: ts=4
