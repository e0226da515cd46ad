//! Snapshot-diff full sync
//!
//! The plan is direction-agnostic: it only knows an authoritative and a
//! passive snapshot. [`snapshot_sync`] maps the plan onto uploads or
//! downloads according to the rule's source.

use std::collections::BTreeSet;
use std::path::PathBuf;

use super::{clean_root, PassContext};
use crate::error::SyncError;
use crate::remote::{resolve_remote_root, RemoteFiles};
use crate::snapshot::{build_local_snapshot, build_remote_snapshot, Snapshot};
use crate::transfer;
use crate::types::{Direction, LogAction, LogOutcome, SyncLogEntry, SyncSource};

/// One step that moves the passive tree towards the authoritative one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOp {
	/// Create a directory missing on the passive side
	CreateDir(String),
	/// Copy a file from the authoritative side
	Transfer(String),
	/// Remove a passive entry (a whole subtree for directories)
	Delete { path: String, is_dir: bool },
}

impl SyncOp {
	pub fn path(&self) -> &str {
		match self {
			SyncOp::CreateDir(path) | SyncOp::Transfer(path) => path,
			SyncOp::Delete { path, .. } => path,
		}
	}
}

/// Compute the operations that make `passive` match `authoritative`.
///
/// Order: passive entries of the wrong kind are deleted first, then creates
/// and transfers in path order (parents before children), then passive-only
/// entries are deleted, one operation per removed subtree.
///
/// A file is transferred when the passive side lacks it, the sizes differ, or
/// the authoritative mtime is strictly newer.
pub fn plan(authoritative: &Snapshot, passive: &Snapshot) -> Vec<SyncOp> {
	let mut ops = Vec::new();
	let mut removed_dirs: BTreeSet<&str> = BTreeSet::new();

	for (path, auth) in authoritative {
		if let Some(existing) = passive.get(path) {
			if existing.is_dir != auth.is_dir && !under_removed(&removed_dirs, path) {
				ops.push(SyncOp::Delete { path: path.clone(), is_dir: existing.is_dir });
				if existing.is_dir {
					removed_dirs.insert(path.as_str());
				}
			}
		}
	}

	for (path, auth) in authoritative {
		let existing = passive.get(path).filter(|p| p.is_dir == auth.is_dir);
		if auth.is_dir {
			if existing.is_none() {
				ops.push(SyncOp::CreateDir(path.clone()));
			}
			continue;
		}
		let stale = match existing {
			None => true,
			Some(p) => p.size != auth.size || auth.mtime > p.mtime,
		};
		if stale {
			ops.push(SyncOp::Transfer(path.clone()));
		}
	}

	for (path, entry) in passive {
		if authoritative.contains_key(path) || under_removed(&removed_dirs, path) {
			continue;
		}
		ops.push(SyncOp::Delete { path: path.clone(), is_dir: entry.is_dir });
		if entry.is_dir {
			removed_dirs.insert(path.as_str());
		}
	}

	ops
}

fn under_removed(removed: &BTreeSet<&str>, path: &str) -> bool {
	let mut current = path;
	while let Some((parent, _)) = current.rsplit_once('/') {
		if removed.contains(parent) {
			return true;
		}
		current = parent;
	}
	false
}

/// Reconcile by snapshot diff; returns the remote snapshot after the pass
pub(crate) async fn snapshot_sync(ctx: &PassContext<'_>) -> Result<Snapshot, SyncError> {
	let rule = ctx.rule;
	let files = ctx.session.files();

	let remote_root = resolve_remote_root(files.as_ref(), &rule.remote_path)
		.await
		.map_err(|e| SyncError::Snapshot { side: "remote", message: e.to_string() })?;
	let remote_root = clean_root(&remote_root).to_string();
	let local_root = PathBuf::from(clean_root(&rule.local_path));
	tokio::fs::create_dir_all(&local_root).await?;

	let local = build_local_snapshot(&local_root).await?;
	let remote = build_remote_snapshot(files.as_ref(), &remote_root).await?;

	let ops = match rule.source {
		SyncSource::Local => plan(&local, &remote),
		SyncSource::Remote => plan(&remote, &local),
	};

	let applier = Applier {
		files: files.as_ref(),
		local_root: &local_root,
		remote_root: &remote_root,
		source: rule.source,
	};

	let mut done = 0;
	for op in &ops {
		let result = tokio::select! {
			_ = ctx.cancel.cancelled() => return Err(SyncError::Cancelled),
			r = applier.apply(op) => r,
		};
		match result {
			Ok(()) => {
				done += 1;
				ctx.events.log(applier.success_entry(&rule.id, op));
			}
			Err(e) => ctx.events.log(applier.failure_entry(&rule.id, op, &e)),
		}
	}

	ctx.events.log(SyncLogEntry::summary(
		&rule.id,
		format!("Snapshot sync complete: {} operations", done),
	));

	if done == 0 {
		return Ok(remote);
	}
	// Record what the pass left behind so polling does not see our own writes
	match build_remote_snapshot(files.as_ref(), &remote_root).await {
		Ok(after) => Ok(after),
		Err(_) => Ok(remote),
	}
}

/// Maps plan operations onto the two trees of one rule
struct Applier<'a> {
	files: &'a dyn RemoteFiles,
	local_root: &'a std::path::Path,
	remote_root: &'a str,
	source: SyncSource,
}

impl Applier<'_> {
	fn direction(&self) -> Direction {
		self.source.direction()
	}

	async fn apply(&self, op: &SyncOp) -> Result<(), SyncError> {
		match (op, self.source) {
			(SyncOp::CreateDir(path), SyncSource::Local) => {
				transfer::create_remote_dir(self.files, self.remote_root, path).await
			}
			(SyncOp::CreateDir(path), SyncSource::Remote) => {
				transfer::create_local_dir(self.local_root, path).await
			}
			(SyncOp::Transfer(path), SyncSource::Local) => {
				transfer::upload_file(self.files, self.local_root, self.remote_root, path).await
			}
			(SyncOp::Transfer(path), SyncSource::Remote) => {
				transfer::download_file(self.files, self.remote_root, self.local_root, path).await
			}
			(SyncOp::Delete { path, is_dir }, SyncSource::Local) => {
				transfer::remove_remote(self.files, self.remote_root, path, *is_dir).await
			}
			(SyncOp::Delete { path, is_dir }, SyncSource::Remote) => {
				transfer::remove_local(self.local_root, path, *is_dir).await
			}
		}
	}

	fn transfer_action(&self) -> LogAction {
		match self.source {
			SyncSource::Local => LogAction::Upload,
			SyncSource::Remote => LogAction::Download,
		}
	}

	fn passive_side(&self) -> &'static str {
		match self.source {
			SyncSource::Local => "remote",
			SyncSource::Remote => "local",
		}
	}

	fn success_entry(&self, rule_id: &str, op: &SyncOp) -> SyncLogEntry {
		let (action, message) = match op {
			SyncOp::CreateDir(_) => (self.transfer_action(), "Created directory".to_string()),
			SyncOp::Transfer(_) => (self.transfer_action(), String::new()),
			SyncOp::Delete { .. } => {
				(LogAction::Delete, format!("Deleted from {}", self.passive_side()))
			}
		};
		SyncLogEntry::new(rule_id, action, LogOutcome::Success, message)
			.on(op.path(), self.direction())
	}

	fn failure_entry(&self, rule_id: &str, op: &SyncOp, err: &SyncError) -> SyncLogEntry {
		let what = match (op, self.source) {
			(SyncOp::CreateDir(_), _) => "Create directory",
			(SyncOp::Transfer(_), SyncSource::Local) => "Upload",
			(SyncOp::Transfer(_), SyncSource::Remote) => "Download",
			(SyncOp::Delete { .. }, _) => "Delete",
		};
		SyncLogEntry::error(rule_id, format!("{} failed: {}", what, err))
			.on(op.path(), self.direction())
	}
}


// vim: ts=4
