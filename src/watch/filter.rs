//! Transient file filter for the local watcher
//!
//! Hidden dotfiles and anything below a hidden directory, editor backups
//! (`*~`), vim swap files and `*.tmp` files never trigger a sync. Extra
//! patterns from the configuration are matched against both the file name
//! and the path relative to the watched root.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};

use crate::error::SyncError;

const BUILTIN_PATTERNS: [&str; 4] = [".*", "*~", "*.swp", "*.tmp"];

pub struct NameFilter {
	root: PathBuf,
	names: GlobSet,
	extra: GlobSet,
}

impl NameFilter {
	pub fn new(root: &Path, extra_patterns: &[String]) -> Result<Self, SyncError> {
		let names = build_set(BUILTIN_PATTERNS.iter().copied())?;
		let extra = build_set(extra_patterns.iter().map(|s| s.as_str()))?;
		Ok(NameFilter { root: root.to_path_buf(), names, extra })
	}

	/// True if changes to `path` should not trigger a sync
	pub fn is_ignored(&self, path: &Path) -> bool {
		let name = match path.file_name() {
			Some(name) => name,
			None => return false,
		};
		if self.names.is_match(name) || self.extra.is_match(name) {
			return true;
		}
		match path.strip_prefix(&self.root) {
			Ok(rel) => {
				self.extra.is_match(rel)
					|| rel.components().any(|c| self.names.is_match(c.as_os_str()))
			}
			Err(_) => false,
		}
	}
}

fn build_set<'a>(patterns: impl Iterator<Item = &'a str>) -> Result<GlobSet, SyncError> {
	let mut builder = GlobSetBuilder::new();
	for pattern in patterns {
		let glob = Glob::new(pattern).map_err(|e| SyncError::InvalidConfig {
			message: format!("invalid ignore pattern '{}': {}", pattern, e),
		})?;
		builder.add(glob);
	}
	builder.build().map_err(|e| SyncError::InvalidConfig { message: e.to_string() })
}


// vim: ts=4
