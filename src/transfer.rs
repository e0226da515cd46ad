//! Single-entry transfer and delete primitives for the snapshot-diff path
//!
//! Every function takes a root and a relative path, and reports failures as
//! [`SyncError::Transfer`] naming the relative path.

use std::path::{Path, PathBuf};

use crate::error::SyncError;
use crate::logging::*;
use crate::remote::{remote_join, RemoteFiles};

fn transfer_error(rel: &str, e: impl std::fmt::Display) -> SyncError {
	SyncError::Transfer { path: rel.to_string(), message: e.to_string() }
}

/// Local path of a relative entry
pub fn local_path(root: &Path, rel: &str) -> PathBuf {
	rel.split('/').fold(root.to_path_buf(), |p, part| p.join(part))
}

fn remote_parent(rel: &str) -> Option<&str> {
	rel.rsplit_once('/').map(|(parent, _)| parent)
}

/// Copy one local file to the remote tree, creating parent directories
pub async fn upload_file(
	files: &dyn RemoteFiles,
	local_root: &Path,
	remote_root: &str,
	rel: &str,
) -> Result<(), SyncError> {
	if let Some(parent) = remote_parent(rel) {
		files.mkdir_all(&remote_join(remote_root, parent)).await.map_err(|e| transfer_error(rel, e))?;
	}
	files
		.upload(&local_path(local_root, rel), &remote_join(remote_root, rel))
		.await
		.map_err(|e| transfer_error(rel, e))
}

/// Copy one remote file into the local tree, creating parent directories
pub async fn download_file(
	files: &dyn RemoteFiles,
	remote_root: &str,
	local_root: &Path,
	rel: &str,
) -> Result<(), SyncError> {
	let target = local_path(local_root, rel);
	if let Some(parent) = target.parent() {
		tokio::fs::create_dir_all(parent).await.map_err(|e| transfer_error(rel, e))?;
	}
	files.download(&remote_join(remote_root, rel), &target).await.map_err(|e| transfer_error(rel, e))
}

pub async fn create_remote_dir(
	files: &dyn RemoteFiles,
	remote_root: &str,
	rel: &str,
) -> Result<(), SyncError> {
	files.mkdir_all(&remote_join(remote_root, rel)).await.map_err(|e| transfer_error(rel, e))
}

pub async fn create_local_dir(local_root: &Path, rel: &str) -> Result<(), SyncError> {
	tokio::fs::create_dir_all(local_path(local_root, rel)).await.map_err(|e| transfer_error(rel, e))
}

/// Delete a remote entry; directories are emptied deepest-first
pub async fn remove_remote(
	files: &dyn RemoteFiles,
	remote_root: &str,
	rel: &str,
	is_dir: bool,
) -> Result<(), SyncError> {
	let path = remote_join(remote_root, rel);
	if !is_dir {
		return files.remove_file(&path).await.map_err(|e| transfer_error(rel, e));
	}

	let entries = files.walk(&path).await.map_err(|e| transfer_error(rel, e))?;
	let (mut dirs, plain): (Vec<_>, Vec<_>) = entries.into_iter().partition(|e| e.is_dir);

	for entry in plain {
		if let Err(e) = files.remove_file(&remote_join(&path, &entry.path)).await {
			debug!("Failed to remove remote {}/{}: {}", path, entry.path, e);
		}
	}

	// Children before parents
	dirs.sort_by_key(|e| std::cmp::Reverse(e.path.matches('/').count()));
	for entry in dirs {
		if let Err(e) = files.remove_dir(&remote_join(&path, &entry.path)).await {
			debug!("Failed to remove remote dir {}/{}: {}", path, entry.path, e);
		}
	}

	files.remove_dir(&path).await.map_err(|e| transfer_error(rel, e))
}

/// Delete a local entry, recursively for directories
pub async fn remove_local(local_root: &Path, rel: &str, is_dir: bool) -> Result<(), SyncError> {
	let path = local_path(local_root, rel);
	let result = if is_dir {
		tokio::fs::remove_dir_all(&path).await
	} else {
		tokio::fs::remove_file(&path).await
	};
	match result {
		Ok(()) => Ok(()),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
		Err(e) => Err(transfer_error(rel, e)),
	}
}


// vim: ts=4
