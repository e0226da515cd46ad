//! Persistence of the rule set

use std::path::{Path, PathBuf};

use crate::error::StateError;
use crate::types::{SyncRule, SyncStatus};

/// File name of the persisted rule set inside the state directory
pub const RULES_FILE_NAME: &str = "sync-rules.json";

/// Reads and writes `sync-rules.json`
#[derive(Debug, Clone)]
pub struct RuleStore {
	state_dir: PathBuf,
}

impl RuleStore {
	pub fn new(state_dir: PathBuf) -> Self {
		RuleStore { state_dir }
	}

	/// Path of the rules file
	pub fn rules_path(&self) -> PathBuf {
		self.state_dir.join(RULES_FILE_NAME)
	}

	/// Load persisted rules.
	///
	/// Runtime fields are reset: no rule comes back active, syncing or in
	/// error, whatever was written. A missing file yields an empty set.
	pub fn load(&self) -> Result<Vec<SyncRule>, StateError> {
		let path = self.rules_path();
		if !path.exists() {
			return Ok(vec![]);
		}

		let contents = std::fs::read_to_string(&path)
			.map_err(|e| StateError::LoadFailed { source: Box::new(e) })?;

		let mut rules: Vec<SyncRule> = serde_json::from_str(&contents).map_err(|e| {
			StateError::Corrupted { message: format!("Failed to parse {}: {}", path.display(), e) }
		})?;

		for rule in &mut rules {
			rule.active = false;
			rule.status = SyncStatus::Idle;
			rule.error.clear();
		}
		Ok(rules)
	}

	/// Write the full rule set
	pub fn save(&self, rules: &[SyncRule]) -> Result<(), StateError> {
		ensure_dir(&self.state_dir)?;

		let json = serde_json::to_string_pretty(rules)
			.map_err(|e| StateError::SaveFailed { source: Box::new(e) })?;

		// Write next to the target, then rename over it
		let path = self.rules_path();
		let tmp = path.with_extension("json.tmp");
		std::fs::write(&tmp, json).map_err(|e| StateError::SaveFailed { source: Box::new(e) })?;
		std::fs::rename(&tmp, &path).map_err(|e| StateError::SaveFailed { source: Box::new(e) })
	}
}

fn ensure_dir(dir: &Path) -> Result<(), StateError> {
	match std::fs::metadata(dir) {
		Ok(meta) if meta.is_dir() => Ok(()),
		Ok(_) => Err(StateError::InvalidDirectory { path: dir.display().to_string() }),
		Err(_) => std::fs::create_dir_all(dir)
			.map_err(|e| StateError::SaveFailed { source: Box::new(e) }),
	}
}


// vim: ts=4
