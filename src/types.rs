//! Rule, status and event data types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SyncError;

/// Authoritative side of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncSource {
	#[default]
	Local,
	Remote,
}

impl SyncSource {
	/// Direction in which data flows when this side is authoritative
	pub fn direction(self) -> Direction {
		match self {
			SyncSource::Local => Direction::LocalToRemote,
			SyncSource::Remote => Direction::RemoteToLocal,
		}
	}
}

impl FromStr for SyncSource {
	type Err = SyncError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"local" => Ok(SyncSource::Local),
			"remote" => Ok(SyncSource::Remote),
			_ => Err(SyncError::InvalidArgument {
				message: format!("source must be 'local' or 'remote', got '{}'", s),
			}),
		}
	}
}

impl fmt::Display for SyncSource {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncSource::Local => write!(f, "local"),
			SyncSource::Remote => write!(f, "remote"),
		}
	}
}

/// Rule status as shown to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
	#[default]
	Idle,
	Syncing,
	Synced,
	Error,
}

impl fmt::Display for SyncStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncStatus::Idle => write!(f, "idle"),
			SyncStatus::Syncing => write!(f, "syncing"),
			SyncStatus::Synced => write!(f, "synced"),
			SyncStatus::Error => write!(f, "error"),
		}
	}
}

/// A persisted local <-> remote mirroring rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncRule {
	pub id: String,

	/// Display name
	pub server_name: String,

	/// Host registry identifier
	pub ssh_host: String,

	pub remote_path: String,
	pub local_path: String,
	pub source: SyncSource,
	pub active: bool,
	pub status: SyncStatus,

	/// RFC 3339 time of the last successful pass, empty if never synced
	pub last_sync: String,

	/// Last error text, empty when healthy
	pub error: String,
}

impl Default for SyncRule {
	fn default() -> Self {
		SyncRule {
			id: String::new(),
			server_name: String::new(),
			ssh_host: String::new(),
			remote_path: String::new(),
			local_path: String::new(),
			source: SyncSource::Local,
			active: false,
			status: SyncStatus::Idle,
			last_sync: String::new(),
			error: String::new(),
		}
	}
}

/// Caller-supplied fields for a new or updated rule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuleSpec {
	pub server_name: String,
	pub ssh_host: String,
	pub remote_path: String,
	pub local_path: String,

	/// "local" or "remote"
	pub source: String,
}

impl RuleSpec {
	/// Check required fields and parse the source direction
	pub fn validate(&self) -> Result<SyncSource, SyncError> {
		if self.ssh_host.trim().is_empty() {
			return Err(SyncError::Validation { message: "SSH host is required".into() });
		}
		if self.remote_path.trim().is_empty() {
			return Err(SyncError::Validation { message: "remote path is required".into() });
		}
		if self.local_path.trim().is_empty() {
			return Err(SyncError::Validation { message: "local path is required".into() });
		}
		self.source.parse::<SyncSource>().map_err(|_| SyncError::Validation {
			message: format!("source must be 'local' or 'remote', got '{}'", self.source),
		})
	}
}

/// Data flow direction of a single operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
	#[serde(rename = "local->remote")]
	LocalToRemote,
	#[serde(rename = "remote->local")]
	RemoteToLocal,
}

impl fmt::Display for Direction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Direction::LocalToRemote => write!(f, "local->remote"),
			Direction::RemoteToLocal => write!(f, "remote->local"),
		}
	}
}

/// Kind of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogAction {
	Upload,
	Download,
	Delete,
	Error,
	Info,
}

impl fmt::Display for LogAction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			LogAction::Upload => "upload",
			LogAction::Download => "download",
			LogAction::Delete => "delete",
			LogAction::Error => "error",
			LogAction::Info => "info",
		};
		write!(f, "{}", s)
	}
}

/// Outcome of a logged operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutcome {
	Success,
	Error,
	Info,
}

/// Transient per-operation log entry pushed to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLogEntry {
	pub rule_id: String,
	pub timestamp: String,
	pub action: LogAction,
	pub file_path: String,
	pub direction: Option<Direction>,
	pub status: LogOutcome,
	pub message: String,
}

impl SyncLogEntry {
	/// Informational milestone
	pub fn info(rule_id: &str, message: impl Into<String>) -> Self {
		Self::new(rule_id, LogAction::Info, LogOutcome::Info, message)
	}

	/// Pass-level or entry-level failure
	pub fn error(rule_id: &str, message: impl Into<String>) -> Self {
		Self::new(rule_id, LogAction::Error, LogOutcome::Error, message)
	}

	/// Successful summary (e.g. end of a pass)
	pub fn summary(rule_id: &str, message: impl Into<String>) -> Self {
		Self::new(rule_id, LogAction::Info, LogOutcome::Success, message)
	}

	pub fn new(
		rule_id: &str,
		action: LogAction,
		status: LogOutcome,
		message: impl Into<String>,
	) -> Self {
		SyncLogEntry {
			rule_id: rule_id.to_string(),
			timestamp: String::new(),
			action,
			file_path: String::new(),
			direction: None,
			status,
			message: message.into(),
		}
	}

	/// Attach the affected relative path and direction
	pub fn on(mut self, path: &str, direction: Direction) -> Self {
		self.file_path = path.to_string();
		self.direction = Some(direction);
		self
	}

	/// True for upload/download entries
	pub fn is_transfer(&self) -> bool {
		matches!(self.action, LogAction::Upload | LogAction::Download)
	}
}

/// Status-changed notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
	pub rule_id: String,
	pub status: SyncStatus,
	pub detail: String,
	pub error: String,
}

/// Tool-availability summary for a host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDepsStatus {
	pub has_mirror_tool: bool,
	pub mirror_tool_version: String,
	pub has_streaming_watch: bool,
	pub message: String,
}


// vim: ts=4
