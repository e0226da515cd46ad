//! Configuration for remsync
//!
//! The configuration follows a priority chain:
//! 1. Built-in defaults (Config::default())
//! 2. Config file (~/.config/remsync/config.toml, or an explicit path)
//! 3. Environment variables (REMSYNC_* prefix)
//! 4. CLI flags (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SyncError;

/// Config file name inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Application directory name under the user config dir
pub const APP_DIR_NAME: &str = "remsync";

// ============================================================================
// MAIN CONFIGURATION STRUCT
// ============================================================================

/// Engine-wide configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	/// Directory holding the persisted rule set
	pub state_dir: PathBuf,

	/// Debounce, polling and cooldown intervals
	pub timing: TimingConfig,

	/// External mirror tool settings
	pub mirror: MirrorConfig,

	/// Change-notification settings
	pub watch: WatchConfig,

	/// Remote shell settings
	pub ssh: SshConfig,

	/// Known remote hosts
	pub hosts: Vec<HostEntry>,

	/// Log level (trace, debug, info, warn, error)
	pub log_level: String,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			state_dir: default_config_dir(),
			timing: TimingConfig::default(),
			mirror: MirrorConfig::default(),
			watch: WatchConfig::default(),
			ssh: SshConfig::default(),
			hosts: vec![],
			log_level: "info".to_string(),
		}
	}
}

impl Config {
	/// Load defaults, then the config file, then environment overrides.
	///
	/// With `path == None` the default location is used and a missing file is
	/// not an error. An explicit path must exist.
	pub fn load(path: Option<&Path>) -> Result<Self, SyncError> {
		let mut config = match path {
			Some(p) => Self::from_file(p)?,
			None => {
				let default_path = default_config_dir().join(CONFIG_FILE_NAME);
				if default_path.exists() {
					Self::from_file(&default_path)?
				} else {
					Config::default()
				}
			}
		};
		config.apply_env(|key| std::env::var(key).ok());
		Ok(config)
	}

	/// Parse a TOML config file
	pub fn from_file(path: &Path) -> Result<Self, SyncError> {
		let contents = std::fs::read_to_string(path).map_err(|e| SyncError::InvalidConfig {
			message: format!("cannot read {}: {}", path.display(), e),
		})?;
		Self::from_toml(&contents).map_err(|e| SyncError::InvalidConfig {
			message: format!("{}: {}", path.display(), e),
		})
	}

	/// Parse TOML text
	pub fn from_toml(contents: &str) -> Result<Self, SyncError> {
		toml::from_str(contents).map_err(|e| SyncError::InvalidConfig { message: e.to_string() })
	}

	/// Apply REMSYNC_* overrides from the given lookup
	pub fn apply_env<F>(&mut self, lookup: F)
	where
		F: Fn(&str) -> Option<String>,
	{
		if let Some(dir) = lookup("REMSYNC_STATE_DIR").filter(|s| !s.is_empty()) {
			self.state_dir = PathBuf::from(dir);
		}
		if let Some(level) = lookup("REMSYNC_LOG_LEVEL").filter(|s| !s.is_empty()) {
			self.log_level = level;
		}
	}

	/// Quiet period before a local change triggers a pass
	pub fn debounce(&self) -> Duration {
		Duration::from_millis(self.timing.debounce_ms)
	}

	/// Quiet period for batched streaming-watch events
	pub fn remote_batch(&self) -> Duration {
		Duration::from_millis(self.timing.remote_batch_ms)
	}

	/// Remote snapshot polling interval
	pub fn poll_interval(&self) -> Duration {
		Duration::from_millis(self.timing.poll_interval_ms)
	}

	/// How long the syncing guard stays up after a pass
	pub fn cooldown(&self) -> Duration {
		Duration::from_millis(self.timing.cooldown_ms)
	}

	/// Delay before re-opening a dropped streaming watch
	pub fn reconnect_backoff(&self) -> Duration {
		Duration::from_millis(self.timing.reconnect_backoff_ms)
	}
}

/// `<user config dir>/remsync`, falling back to `./.remsync`
pub fn default_config_dir() -> PathBuf {
	dirs::config_dir()
		.map(|d| d.join(APP_DIR_NAME))
		.unwrap_or_else(|| PathBuf::from(".remsync"))
}

// ============================================================================
// SECTIONS
// ============================================================================

/// Timer settings, all in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimingConfig {
	pub debounce_ms: u64,
	pub remote_batch_ms: u64,
	pub poll_interval_ms: u64,
	pub cooldown_ms: u64,
	pub reconnect_backoff_ms: u64,
}

impl Default for TimingConfig {
	fn default() -> Self {
		TimingConfig {
			debounce_ms: 500,
			remote_batch_ms: 300,
			poll_interval_ms: 5000,
			cooldown_ms: 2000,
			reconnect_backoff_ms: 5000,
		}
	}
}

/// Mirror tool (rsync-compatible) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MirrorConfig {
	/// Program name or path
	pub program: String,

	/// Network I/O timeout passed to the tool
	pub timeout_secs: u64,

	/// Additional arguments placed before source/destination
	pub extra_args: Vec<String>,

	/// Pass StrictHostKeyChecking=yes to the tool's ssh
	pub strict_host_key_checking: bool,
}

impl Default for MirrorConfig {
	fn default() -> Self {
		MirrorConfig {
			program: "rsync".to_string(),
			timeout_secs: 30,
			extra_args: vec![],
			strict_host_key_checking: false,
		}
	}
}

/// Change-notification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WatchConfig {
	/// Remote streaming notification program
	pub program: String,

	/// Extra glob patterns ignored by the local watcher
	pub ignore_patterns: Vec<String>,
}

impl Default for WatchConfig {
	fn default() -> Self {
		WatchConfig { program: "inotifywait".to_string(), ignore_patterns: vec![] }
	}
}

/// SSH-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SshConfig {
	/// ssh client binary
	pub program: String,

	/// ConnectTimeout for the master connection
	pub connect_timeout_secs: u64,

	/// Where control sockets are created (defaults to the temp dir)
	pub control_dir: Option<PathBuf>,

	/// Resolve unknown host ids as plain ssh aliases
	pub allow_unlisted_hosts: bool,
}

impl Default for SshConfig {
	fn default() -> Self {
		SshConfig {
			program: "ssh".to_string(),
			connect_timeout_secs: 10,
			control_dir: None,
			allow_unlisted_hosts: false,
		}
	}
}

/// One entry of the host registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HostEntry {
	/// Identifier referenced by rules
	pub host: String,

	/// Network name; empty means `host`
	pub hostname: String,

	/// Login user; empty means the ssh default
	pub user: String,

	pub port: u16,

	pub identity_file: Option<String>,
}

impl Default for HostEntry {
	fn default() -> Self {
		HostEntry {
			host: String::new(),
			hostname: String::new(),
			user: String::new(),
			port: 22,
			identity_file: None,
		}
	}
}

impl HostEntry {
	/// Bare alias entry resolved entirely by the ssh client configuration
	pub fn alias(host: &str) -> Self {
		HostEntry { host: host.to_string(), ..Default::default() }
	}

	/// Name to connect to
	pub fn address(&self) -> &str {
		if self.hostname.is_empty() {
			&self.host
		} else {
			&self.hostname
		}
	}

	/// `user@address` or just `address`
	pub fn destination(&self) -> String {
		if self.user.is_empty() {
			self.address().to_string()
		} else {
			format!("{}@{}", self.user, self.address())
		}
	}

	/// Identity file with a leading `~/` expanded
	pub fn identity_path(&self) -> Option<String> {
		let file = self.identity_file.as_ref()?;
		match (file.strip_prefix("~/"), dirs::home_dir()) {
			(Some(rest), Some(home)) => Some(home.join(rest).to_string_lossy().into_owned()),
			_ => Some(file.clone()),
		}
	}
}


// vim: ts=4
