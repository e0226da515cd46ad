//! Loopback remote for integration tests
//!
//! The "remote" tree is a second local directory. By default sessions answer
//! the connection test and report no optional tools, so rules run the
//! snapshot-diff path with the polling watcher. With a local shell, commands
//! really run through `sh -c` and the mirror tool copies between the two
//! local trees.

#![allow(dead_code)]

use async_trait::async_trait;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;

use remsync::callbacks::LogRing;
use remsync::config::{Config, HostEntry};
use remsync::error::ConnectionError;
use remsync::hosts::ConfigHosts;
use remsync::remote::{
	CommandOutput, MirrorTransport, RemoteConnector, RemoteEntry, RemoteFiles, RemoteSession,
	RemoteStream,
};
use remsync::snapshot::mtime_secs;
use remsync::types::{LogAction, RuleSpec, SyncLogEntry, SyncRule, SyncStatus};
use remsync::SyncManager;

/// Host id known to the test registry
pub const HOST: &str = "loop";

// ============================================================================
// Loopback remote
// ============================================================================

fn io_error(what: &str, e: io::Error) -> ConnectionError {
	ConnectionError::Io { what: what.to_string(), source: e }
}

pub struct LoopbackFiles {
	home: PathBuf,
}

fn walk_dir(root: &Path, dir: &Path, out: &mut Vec<RemoteEntry>) -> io::Result<()> {
	for entry in fs::read_dir(dir)? {
		let path = entry?.path();
		let meta = fs::symlink_metadata(&path)?;
		if meta.file_type().is_symlink() {
			continue;
		}
		let rel = path.strip_prefix(root).unwrap().to_string_lossy().into_owned();
		out.push(RemoteEntry {
			path: rel,
			size: if meta.is_dir() { 0 } else { meta.len() },
			mtime: mtime_secs(&meta),
			is_dir: meta.is_dir(),
		});
		if meta.is_dir() {
			walk_dir(root, &path, out)?;
		}
	}
	Ok(())
}

#[async_trait]
impl RemoteFiles for LoopbackFiles {
	async fn home_dir(&self) -> Result<String, ConnectionError> {
		Ok(self.home.to_string_lossy().into_owned())
	}

	async fn walk(&self, root: &str) -> Result<Vec<RemoteEntry>, ConnectionError> {
		let root = PathBuf::from(root);
		let mut out = Vec::new();
		if root.is_dir() {
			walk_dir(&root, &root, &mut out).map_err(|e| io_error("walk", e))?;
		}
		Ok(out)
	}

	async fn upload(&self, local: &Path, remote: &str) -> Result<(), ConnectionError> {
		tokio::fs::copy(local, remote).await.map(|_| ()).map_err(|e| io_error("upload", e))
	}

	async fn download(&self, remote: &str, local: &Path) -> Result<(), ConnectionError> {
		tokio::fs::copy(remote, local).await.map(|_| ()).map_err(|e| io_error("download", e))
	}

	async fn mkdir_all(&self, remote: &str) -> Result<(), ConnectionError> {
		tokio::fs::create_dir_all(remote).await.map_err(|e| io_error("mkdir", e))
	}

	async fn remove_file(&self, remote: &str) -> Result<(), ConnectionError> {
		tokio::fs::remove_file(remote).await.map_err(|e| io_error("rm", e))
	}

	async fn remove_dir(&self, remote: &str) -> Result<(), ConnectionError> {
		tokio::fs::remove_dir(remote).await.map_err(|e| io_error("rmdir", e))
	}
}

pub struct LoopbackSession {
	id: String,
	files: Arc<LoopbackFiles>,
	closed: AtomicBool,
	local_shell: bool,
}

impl LoopbackSession {
	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl RemoteSession for LoopbackSession {
	fn id(&self) -> &str {
		&self.id
	}

	async fn exec(&self, cmd: &str) -> Result<CommandOutput, ConnectionError> {
		if self.is_closed() {
			return Err(ConnectionError::Disconnected);
		}
		if self.local_shell {
			let output = Command::new("sh")
				.arg("-c")
				.arg(cmd)
				.output()
				.await
				.map_err(|e| io_error("sh", e))?;
			return Ok(CommandOutput {
				code: output.status.code(),
				stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
				stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
			});
		}
		if cmd == "echo ok" {
			return Ok(CommandOutput { code: Some(0), stdout: "ok\n".into(), stderr: String::new() });
		}
		// Tool probes find nothing
		Ok(CommandOutput { code: Some(1), ..Default::default() })
	}

	async fn stream(&self, cmd: &str) -> Result<RemoteStream, ConnectionError> {
		if self.is_closed() {
			return Err(ConnectionError::Disconnected);
		}
		if !self.local_shell {
			return Ok(RemoteStream::from_reader(&b""[..], Some(127)));
		}
		let child = Command::new("sh")
			.arg("-c")
			.arg(cmd)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::null())
			.kill_on_drop(true)
			.spawn()
			.map_err(|e| io_error("sh", e))?;
		RemoteStream::from_child(child)
	}

	fn files(&self) -> Arc<dyn RemoteFiles> {
		self.files.clone()
	}

	fn mirror_transport(&self) -> Option<MirrorTransport> {
		if !self.local_shell {
			return None;
		}
		Some(MirrorTransport { remote_shell: None, target_prefix: String::new() })
	}

	async fn is_alive(&self) -> bool {
		!self.is_closed()
	}

	async fn close(&self) {
		self.closed.store(true, Ordering::SeqCst);
	}
}

/// Hands out loopback sessions and remembers them
pub struct LoopbackConnector {
	home: PathBuf,
	local_shell: bool,
	refuse: AtomicBool,
	connects: AtomicUsize,
	sessions: Mutex<Vec<Arc<LoopbackSession>>>,
}

impl LoopbackConnector {
	pub fn new(home: &Path) -> Self {
		LoopbackConnector {
			home: home.to_path_buf(),
			local_shell: false,
			refuse: AtomicBool::new(false),
			connects: AtomicUsize::new(0),
			sessions: Mutex::new(Vec::new()),
		}
	}

	/// Sessions that run commands through the local shell
	pub fn with_local_shell(home: &Path) -> Self {
		LoopbackConnector { local_shell: true, ..Self::new(home) }
	}

	/// Make every following connect fail
	pub fn refuse(&self, refuse: bool) {
		self.refuse.store(refuse, Ordering::SeqCst);
	}

	pub fn connects(&self) -> usize {
		self.connects.load(Ordering::SeqCst)
	}

	pub fn open_sessions(&self) -> usize {
		self.sessions.lock().unwrap().iter().filter(|s| !s.is_closed()).count()
	}
}

#[async_trait]
impl RemoteConnector for LoopbackConnector {
	async fn connect(&self, host: &HostEntry) -> Result<Arc<dyn RemoteSession>, ConnectionError> {
		if self.refuse.load(Ordering::SeqCst) {
			return Err(ConnectionError::SshFailed {
				host: host.host.clone(),
				message: "Connection refused".into(),
			});
		}
		let n = self.connects.fetch_add(1, Ordering::SeqCst);
		let session = Arc::new(LoopbackSession {
			id: format!("loop-{}", n),
			files: Arc::new(LoopbackFiles { home: self.home.clone() }),
			closed: AtomicBool::new(false),
			local_shell: self.local_shell,
		});
		self.sessions.lock().unwrap().push(session.clone());
		Ok(session)
	}
}

// ============================================================================
// Harness
// ============================================================================

/// Config with short timers and the loopback host registered
pub fn fast_config(state_dir: &Path) -> Config {
	let mut config = Config::default();
	config.state_dir = state_dir.to_path_buf();
	config.timing.debounce_ms = 100;
	config.timing.remote_batch_ms = 100;
	config.timing.poll_interval_ms = 200;
	config.timing.cooldown_ms = 300;
	config.timing.reconnect_backoff_ms = 200;
	config.hosts = vec![HostEntry::alias(HOST)];
	config
}

pub struct Harness {
	pub manager: SyncManager,
	pub events: Arc<LogRing>,
	pub connector: Arc<LoopbackConnector>,
	pub state: TempDir,
	pub local: TempDir,
	pub remote: TempDir,
}

impl Harness {
	pub fn new() -> Self {
		Self::with_config(|_| {})
	}

	pub fn with_config<F: FnOnce(&mut Config)>(tweak: F) -> Self {
		Self::build(false, tweak)
	}

	/// Harness whose sessions run the real local tools
	pub fn with_local_shell() -> Self {
		Self::build(true, |_| {})
	}

	pub fn with_local_shell_config<F: FnOnce(&mut Config)>(tweak: F) -> Self {
		Self::build(true, tweak)
	}

	fn build<F: FnOnce(&mut Config)>(local_shell: bool, tweak: F) -> Self {
		let state = TempDir::new().unwrap();
		let local = TempDir::new().unwrap();
		let remote = TempDir::new().unwrap();

		let mut config = fast_config(state.path());
		tweak(&mut config);

		let events = Arc::new(LogRing::new(1000));
		let connector = Arc::new(if local_shell {
			LoopbackConnector::with_local_shell(remote.path())
		} else {
			LoopbackConnector::new(remote.path())
		});
		let hosts = Arc::new(ConfigHosts::from_config(&config));
		let manager =
			SyncManager::new(config, hosts, connector.clone(), events.clone()).unwrap();

		Harness { manager, events, connector, state, local, remote }
	}

	pub fn spec(&self, source: &str) -> RuleSpec {
		RuleSpec {
			server_name: "test".into(),
			ssh_host: HOST.into(),
			remote_path: self.remote.path().to_string_lossy().into_owned(),
			local_path: self.local.path().to_string_lossy().into_owned(),
			source: source.into(),
		}
	}

	pub fn add_rule(&self, source: &str) -> SyncRule {
		self.manager.add_rule(self.spec(source)).unwrap()
	}

	pub fn status(&self, id: &str) -> SyncStatus {
		self.manager.get_rule(id).unwrap().status
	}

	/// Start a rule and wait for its initial pass to settle
	pub async fn start_synced(&self, id: &str) {
		self.manager.start(id).await.unwrap();
		assert!(
			wait_for(Duration::from_secs(10), || self.status(id) == SyncStatus::Synced).await,
			"initial sync did not finish: {:?}",
			self.manager.get_rule(id)
		);
	}

	/// Number of finished snapshot passes for a rule
	pub fn passes(&self, id: &str) -> usize {
		self.events
			.logs_for(id)
			.iter()
			.filter(|e| e.message.starts_with("Snapshot sync complete"))
			.count()
	}

	pub fn logs_with(&self, id: &str, action: LogAction) -> Vec<SyncLogEntry> {
		self.events.logs_for(id).into_iter().filter(|e| e.action == action).collect()
	}
}

/// Poll `check` until it holds or `timeout` passes
pub async fn wait_for<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
	let deadline = tokio::time::Instant::now() + timeout;
	loop {
		if check() {
			return true;
		}
		if tokio::time::Instant::now() >= deadline {
			return false;
		}
		tokio::time::sleep(Duration::from_millis(25)).await;
	}
}

// ============================================================================
// Tree helpers
// ============================================================================

pub fn write_file(root: &Path, rel: &str, content: &str) {
	let path = root.join(rel);
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent).unwrap();
	}
	fs::write(path, content).unwrap();
}

pub fn read_file(root: &Path, rel: &str) -> Option<String> {
	fs::read_to_string(root.join(rel)).ok()
}

/// Write an executable `/bin/sh` script into `dir`
pub fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
	use std::os::unix::fs::PermissionsExt;

	let path = dir.join(name);
	fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
	fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
	path
}

/// True once `pid` has exited (gone or a zombie)
pub fn process_gone(pid: u32) -> bool {
	match fs::read_to_string(format!("/proc/{}/stat", pid)) {
		Ok(stat) => stat.rsplit(')').next().map(|rest| rest.trim_start().starts_with('Z')).unwrap_or(true),
		Err(_) => true,
	}
}

/// Set a file's mtime to `secs` after the epoch
pub fn set_mtime(root: &Path, rel: &str, secs: i64) {
	filetime::set_file_mtime(root.join(rel), filetime::FileTime::from_unix_time(secs, 0)).unwrap();
}

/// Sorted `path` (dirs end in `/`) or `path=content` listing of a tree
pub fn tree(root: &Path) -> Vec<String> {
	fn scan(root: &Path, dir: &Path, out: &mut Vec<String>) {
		for entry in fs::read_dir(dir).unwrap() {
			let path = entry.unwrap().path();
			let rel = path.strip_prefix(root).unwrap().to_string_lossy().into_owned();
			if path.is_dir() {
				out.push(format!("{}/", rel));
				scan(root, &path, out);
			} else {
				out.push(format!("{}={}", rel, fs::read_to_string(&path).unwrap_or_default()));
			}
		}
	}

	let mut out = Vec::new();
	if root.is_dir() {
		scan(root, root, &mut out);
	}
	out.sort();
	out
}

// vim: ts=4
