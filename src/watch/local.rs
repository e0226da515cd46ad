//! Local change notification
//!
//! Every directory below the root gets its own non-recursive registration;
//! directories created later are registered as their creation events
//! arrive, so nested trees are observed without a restart.

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::debounce::Debouncer;
use super::filter::NameFilter;
use crate::error::SyncError;
use crate::guard::SyncGuard;
use crate::logging::*;

/// What the local watcher feeds
pub struct LocalWatch {
	pub root: PathBuf,
	pub filter: Arc<NameFilter>,
	pub guard: Arc<SyncGuard>,
	pub debouncer: Arc<Debouncer>,
	pub cancel: CancellationToken,
}

/// Register the tree and spawn the event loop on `tracker`.
///
/// The watcher is unregistered when the loop exits on cancellation.
pub async fn start_local_watcher(watch: LocalWatch, tracker: &TaskTracker) -> Result<(), SyncError> {
	let (tx, mut rx) = mpsc::unbounded_channel();
	let mut watcher = notify::recommended_watcher(move |res| {
		let _ = tx.send(res);
	})
	.map_err(|e| SyncError::Watch { message: format!("Failed to create local watcher: {}", e) })?;

	watcher.watch(&watch.root, RecursiveMode::NonRecursive).map_err(|e| SyncError::Watch {
		message: format!("Failed to watch {}: {}", watch.root.display(), e),
	})?;

	let root = watch.root.clone();
	let filter = watch.filter.clone();
	let subdirs = tokio::task::spawn_blocking(move || collect_dirs(&root, &filter))
		.await
		.map_err(|e| SyncError::Watch { message: e.to_string() })?;
	register_all(&mut watcher, &subdirs);
	debug!(root = %watch.root.display(), dirs = subdirs.len() + 1, "Local watches registered");

	tracker.spawn(async move {
		loop {
			let event = tokio::select! {
				_ = watch.cancel.cancelled() => break,
				event = rx.recv() => event,
			};
			match event {
				None => break,
				Some(Err(e)) => warn!("Local watcher error: {}", e),
				Some(Ok(event)) => handle_event(&watch, &mut watcher, event).await,
			}
		}
		drop(watcher);
		debug!(root = %watch.root.display(), "Local watcher stopped");
	});
	Ok(())
}

async fn handle_event(watch: &LocalWatch, watcher: &mut RecommendedWatcher, event: notify::Event) {
	if matches!(event.kind, EventKind::Access(_) | EventKind::Other) {
		return;
	}

	let mut relevant = false;
	for path in &event.paths {
		if watch.filter.is_ignored(path) {
			continue;
		}
		if matches!(event.kind, EventKind::Create(_)) && is_dir(path).await {
			let _ = watcher.watch(path, RecursiveMode::NonRecursive);
			let (dir, filter) = (path.clone(), watch.filter.clone());
			match tokio::task::spawn_blocking(move || collect_dirs(&dir, &filter)).await {
				Ok(subdirs) => register_all(watcher, &subdirs),
				Err(e) => debug!("Cannot scan {}: {}", path.display(), e),
			}
		}
		relevant = true;
	}

	// Our own writes during a pass and its cooldown are not changes
	if relevant && !watch.guard.is_held() {
		watch.debouncer.poke();
	}
}

async fn is_dir(path: &Path) -> bool {
	tokio::fs::symlink_metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}

fn register_all(watcher: &mut RecommendedWatcher, dirs: &[PathBuf]) {
	for dir in dirs {
		if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
			debug!("Cannot watch {}: {}", dir.display(), e);
		}
	}
}

/// Every non-ignored directory strictly below `root`, without following links
fn collect_dirs(root: &Path, filter: &NameFilter) -> Vec<PathBuf> {
	fn scan_dir(dir: &Path, filter: &NameFilter, out: &mut Vec<PathBuf>) {
		let entries = match fs::read_dir(dir) {
			Ok(e) => e,
			Err(_) => return,
		};
		for entry in entries.flatten() {
			let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
			let path = entry.path();
			if is_dir && !filter.is_ignored(&path) {
				out.push(path.clone());
				scan_dir(&path, filter, out);
			}
		}
	}

	let mut out = Vec::new();
	scan_dir(root, filter, &mut out);
	out
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn test_collect_dirs_skips_hidden() {
		let dir = TempDir::new().unwrap();
		fs::create_dir_all(dir.path().join("a/b")).unwrap();
		fs::create_dir_all(dir.path().join(".git/objects")).unwrap();
		fs::write(dir.path().join("a/file.txt"), "x").unwrap();

		let filter = NameFilter::new(dir.path(), &[]).unwrap();
		let mut dirs = collect_dirs(dir.path(), &filter);
		dirs.sort();
		assert_eq!(dirs, vec![dir.path().join("a"), dir.path().join("a/b")]);
	}
}

// vim: ts=4
