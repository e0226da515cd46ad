//! Error types for remsync operations

use std::error::Error;
use std::fmt;
use std::io;

/// Main error type for rule management and sync passes
#[derive(Debug)]
pub enum SyncError {
	/// Rule fields are missing or malformed
	Validation { message: String },

	/// Argument outside its accepted set (e.g. an unknown source direction)
	InvalidArgument { message: String },

	/// No rule with this id
	RuleNotFound { id: String },

	/// Operation requires the rule to be inactive
	RuleActive { id: String },

	/// Remote host identifier is not in the host registry
	HostNotFound { host: String },

	/// Remote shell failure (nested)
	Connection(ConnectionError),

	/// Round-trip command returned something other than the expected reply
	UnexpectedReply { output: String },

	/// External mirror tool exited unsuccessfully
	MirrorTool { status: String, output: String },

	/// Building a snapshot of one side failed
	Snapshot { side: &'static str, message: String },

	/// Single-entry transfer or delete failed
	Transfer { path: String, message: String },

	/// Filesystem watcher could not be set up
	Watch { message: String },

	/// Invalid configuration
	InvalidConfig { message: String },

	/// Persistence error (nested)
	State(StateError),

	/// I/O error
	Io(io::Error),

	/// Operation cancelled by Stop; never reported as a rule error
	Cancelled,
}

impl SyncError {
	/// True when the error only reflects a cancellation request
	pub fn is_cancelled(&self) -> bool {
		matches!(self, SyncError::Cancelled)
	}
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncError::Validation { message } => write!(f, "Validation error: {}", message),
			SyncError::InvalidArgument { message } => write!(f, "Invalid argument: {}", message),
			SyncError::RuleNotFound { id } => write!(f, "sync rule not found: {}", id),
			SyncError::RuleActive { id } => {
				write!(f, "sync rule {} is active; stop it first", id)
			}
			SyncError::HostNotFound { host } => {
				write!(f, "SSH host '{}' not found in config", host)
			}
			SyncError::Connection(e) => write!(f, "Connection error: {}", e),
			SyncError::UnexpectedReply { output } => {
				write!(f, "unexpected command output: {}", output)
			}
			SyncError::MirrorTool { status, output } => {
				write!(f, "mirror tool failed: {}\nOutput: {}", status, output)
			}
			SyncError::Snapshot { side, message } => {
				write!(f, "failed to list {} files: {}", side, message)
			}
			SyncError::Transfer { path, message } => write!(f, "{}: {}", path, message),
			SyncError::Watch { message } => write!(f, "Watcher error: {}", message),
			SyncError::InvalidConfig { message } => {
				write!(f, "Invalid configuration: {}", message)
			}
			SyncError::State(e) => write!(f, "State error: {}", e),
			SyncError::Io(e) => write!(f, "I/O error: {}", e),
			SyncError::Cancelled => write!(f, "Operation cancelled"),
		}
	}
}

impl Error for SyncError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			SyncError::Connection(e) => Some(e),
			SyncError::State(e) => Some(e),
			SyncError::Io(e) => Some(e),
			_ => None,
		}
	}
}

impl From<io::Error> for SyncError {
	fn from(e: io::Error) -> Self {
		SyncError::Io(e)
	}
}

impl From<ConnectionError> for SyncError {
	fn from(e: ConnectionError) -> Self {
		SyncError::Connection(e)
	}
}

impl From<StateError> for SyncError {
	fn from(e: StateError) -> Self {
		SyncError::State(e)
	}
}

/// Remote-shell errors
#[derive(Debug)]
pub enum ConnectionError {
	/// SSH connection failed
	SshFailed { host: String, message: String },

	/// Subprocess spawn failed
	SpawnFailed { cmd: String, source: io::Error },

	/// Remote command exited unsuccessfully
	CommandFailed { cmd: String, status: String, output: String },

	/// I/O on an established session failed
	Io { what: String, source: io::Error },

	/// Session was closed or its master connection went away
	Disconnected,

	/// Stdio unavailable
	StdioUnavailable { what: String },
}

impl fmt::Display for ConnectionError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConnectionError::SshFailed { host, message } => {
				write!(f, "SSH connection to {} failed: {}", host, message)
			}
			ConnectionError::SpawnFailed { cmd, source } => {
				write!(f, "Failed to spawn '{}': {}", cmd, source)
			}
			ConnectionError::CommandFailed { cmd, status, output } => {
				write!(f, "'{}' failed ({}): {}", cmd, status, output.trim())
			}
			ConnectionError::Io { what, source } => write!(f, "{}: {}", what, source),
			ConnectionError::Disconnected => write!(f, "Connection disconnected"),
			ConnectionError::StdioUnavailable { what } => {
				write!(f, "Stdio unavailable: {}", what)
			}
		}
	}
}

impl Error for ConnectionError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			ConnectionError::SpawnFailed { source, .. } => Some(source),
			ConnectionError::Io { source, .. } => Some(source),
			_ => None,
		}
	}
}

/// Rule persistence errors
#[derive(Debug)]
pub enum StateError {
	/// Failed to load state
	LoadFailed { source: Box<dyn Error + Send + Sync> },

	/// Failed to save state
	SaveFailed { source: Box<dyn Error + Send + Sync> },

	/// State file is corrupted
	Corrupted { message: String },

	/// Invalid state directory
	InvalidDirectory { path: String },
}

impl fmt::Display for StateError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StateError::LoadFailed { source } => write!(f, "Failed to load state: {}", source),
			StateError::SaveFailed { source } => write!(f, "Failed to save state: {}", source),
			StateError::Corrupted { message } => write!(f, "State corrupted: {}", message),
			StateError::InvalidDirectory { path } => {
				write!(f, "Invalid state directory: {}", path)
			}
		}
	}
}

impl Error for StateError {}


// vim: ts=4
