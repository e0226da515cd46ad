//! Point-in-time listings of a local or remote tree

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::error::SyncError;
use crate::logging::*;
use crate::remote::RemoteFiles;

/// Size, mtime and kind of one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSnapshot {
	/// Bytes; always 0 for directories
	pub size: u64,

	/// Whole seconds since the epoch
	pub mtime: i64,

	pub is_dir: bool,
}

impl FileSnapshot {
	pub fn file(size: u64, mtime: i64) -> Self {
		FileSnapshot { size, mtime, is_dir: false }
	}

	pub fn dir(mtime: i64) -> Self {
		FileSnapshot { size: 0, mtime, is_dir: true }
	}
}

/// Relative `/`-separated path to entry, root excluded
pub type Snapshot = BTreeMap<String, FileSnapshot>;

/// List the local tree below `root`.
///
/// Unreadable entries are skipped. A missing root lists nothing; a root that
/// exists but is not a directory is an error.
pub async fn build_local_snapshot(root: &Path) -> Result<Snapshot, SyncError> {
	let root = root.to_path_buf();
	tokio::task::spawn_blocking(move || walk_local(&root))
		.await
		.map_err(|e| SyncError::Snapshot { side: "local", message: e.to_string() })?
}

/// Blocking version of [`build_local_snapshot`]
pub fn walk_local(root: &Path) -> Result<Snapshot, SyncError> {
	let mut snapshot = Snapshot::new();

	match fs::metadata(root) {
		Ok(meta) if meta.is_dir() => {}
		Ok(_) => {
			return Err(SyncError::Snapshot {
				side: "local",
				message: format!("{} is not a directory", root.display()),
			})
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(snapshot),
		Err(e) => {
			return Err(SyncError::Snapshot {
				side: "local",
				message: format!("{}: {}", root.display(), e),
			})
		}
	}

	fn scan_dir(dir: &Path, rel: &str, snapshot: &mut Snapshot) {
		let entries = match fs::read_dir(dir) {
			Ok(e) => e,
			Err(e) => {
				debug!("Cannot read directory {}: {}", dir.display(), e);
				return;
			}
		};

		for entry in entries.flatten() {
			let name = entry.file_name().to_string_lossy().into_owned();
			let path: PathBuf = entry.path();
			let metadata = match fs::symlink_metadata(&path) {
				Ok(m) => m,
				Err(e) => {
					debug!("Cannot stat {}: {}", path.display(), e);
					continue;
				}
			};
			let rel_path = if rel.is_empty() { name } else { format!("{}/{}", rel, name) };
			let mtime = mtime_secs(&metadata);

			if metadata.is_dir() {
				snapshot.insert(rel_path.clone(), FileSnapshot::dir(mtime));
				scan_dir(&path, &rel_path, snapshot);
			} else if metadata.is_file() {
				snapshot.insert(rel_path, FileSnapshot::file(metadata.len(), mtime));
			}
		}
	}

	scan_dir(root, "", &mut snapshot);
	Ok(snapshot)
}

/// Modification time in whole seconds, 0 when unavailable
pub fn mtime_secs(metadata: &fs::Metadata) -> i64 {
	metadata
		.modified()
		.ok()
		.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
		.map(|d| d.as_secs() as i64)
		.unwrap_or(0)
}

/// List the remote tree below `root` (already `~`-resolved)
pub async fn build_remote_snapshot(
	files: &dyn RemoteFiles,
	root: &str,
) -> Result<Snapshot, SyncError> {
	let entries = files
		.walk(root)
		.await
		.map_err(|e| SyncError::Snapshot { side: "remote", message: e.to_string() })?;

	Ok(entries
		.into_iter()
		.map(|e| {
			let snap = if e.is_dir { FileSnapshot::dir(e.mtime) } else { FileSnapshot::file(e.size, e.mtime) };
			(e.path, snap)
		})
		.collect())
}

/// True if any path was added or removed, or changed size or mtime
pub fn snapshots_differ(old: &Snapshot, new: &Snapshot) -> bool {
	if old.len() != new.len() {
		return true;
	}
	new.iter().any(|(path, entry)| match old.get(path) {
		Some(prev) => prev.size != entry.size || prev.mtime != entry.mtime,
		None => true,
	})
}


// vim: ts=4
