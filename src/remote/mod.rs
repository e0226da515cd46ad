//! Remote shell seam
//!
//! The engine talks to a remote host only through these traits: one
//! [`RemoteSession`] per active rule, opened by a [`RemoteConnector`], with a
//! cached [`RemoteFiles`] handle for single-file primitives.

pub mod ssh;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::process::Child;

use crate::config::HostEntry;
use crate::error::ConnectionError;

pub use ssh::SshConnector;

/// Captured result of a remote command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutput {
	/// Exit code, `None` when terminated by a signal
	pub code: Option<i32>,
	pub stdout: String,
	pub stderr: String,
}

impl CommandOutput {
	pub fn success(&self) -> bool {
		self.code == Some(0)
	}

	/// stdout followed by stderr
	pub fn combined(&self) -> String {
		let mut out = self.stdout.clone();
		if !self.stderr.is_empty() {
			if !out.is_empty() && !out.ends_with('\n') {
				out.push('\n');
			}
			out.push_str(&self.stderr);
		}
		out
	}
}

/// One entry of a remote tree listing, relative to the listed root
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntry {
	pub path: String,
	pub size: u64,
	/// Seconds since the epoch
	pub mtime: i64,
	pub is_dir: bool,
}

/// How the mirror tool reaches the remote side of a session
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorTransport {
	/// Value for the tool's `-e` option; `None` uses the tool default
	pub remote_shell: Option<String>,

	/// Prefix put in front of remote paths, e.g. `deploy@web:`
	pub target_prefix: String,
}

impl MirrorTransport {
	pub fn target(&self, remote_path: &str) -> String {
		format!("{}{}", self.target_prefix, remote_path)
	}
}

type LineSource = Box<dyn AsyncBufRead + Send + Unpin>;

/// Output lines of a long-running remote command.
///
/// Lines are decoded lossily, so a file name that is not valid UTF-8 still
/// arrives as a line. Dropping the stream kills a child spawned with
/// `kill_on_drop`.
pub struct RemoteStream {
	reader: LineSource,
	buf: Vec<u8>,
	child: Option<Child>,
	exit_code: Option<i32>,
}

impl RemoteStream {
	/// Stream over a spawned process; stdout must be piped
	pub fn from_child(mut child: Child) -> Result<Self, ConnectionError> {
		let stdout = child
			.stdout
			.take()
			.ok_or(ConnectionError::StdioUnavailable { what: "stdout".to_string() })?;
		Ok(RemoteStream {
			reader: Box::new(tokio::io::BufReader::new(stdout)),
			buf: Vec::new(),
			child: Some(child),
			exit_code: None,
		})
	}

	/// Stream over an in-memory reader with a fixed exit code
	pub fn from_reader<R>(reader: R, exit_code: Option<i32>) -> Self
	where
		R: AsyncBufRead + Send + Unpin + 'static,
	{
		RemoteStream { reader: Box::new(reader), buf: Vec::new(), child: None, exit_code }
	}

	/// Next output line, `None` at end of stream
	pub async fn next_line(&mut self) -> Result<Option<String>, ConnectionError> {
		self.buf.clear();
		let n = self.reader.read_until(b'\n', &mut self.buf).await.map_err(|e| {
			ConnectionError::Io { what: "reading remote stream".to_string(), source: e }
		})?;
		if n == 0 {
			return Ok(None);
		}
		if self.buf.ends_with(b"\n") {
			self.buf.pop();
			if self.buf.ends_with(b"\r") {
				self.buf.pop();
			}
		}
		Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
	}

	/// Wait for the command to exit and return its exit code
	pub async fn finish(mut self) -> Option<i32> {
		match self.child.as_mut() {
			Some(child) => child.wait().await.ok().and_then(|s| s.code()),
			None => self.exit_code,
		}
	}
}

/// Single-file primitives on the remote side
#[async_trait]
pub trait RemoteFiles: Send + Sync {
	/// Remote user's home directory
	async fn home_dir(&self) -> Result<String, ConnectionError>;

	/// Recursive listing below `root`; a missing root lists nothing
	async fn walk(&self, root: &str) -> Result<Vec<RemoteEntry>, ConnectionError>;

	async fn upload(&self, local: &Path, remote: &str) -> Result<(), ConnectionError>;

	async fn download(&self, remote: &str, local: &Path) -> Result<(), ConnectionError>;

	async fn mkdir_all(&self, remote: &str) -> Result<(), ConnectionError>;

	async fn remove_file(&self, remote: &str) -> Result<(), ConnectionError>;

	/// Remove an empty directory
	async fn remove_dir(&self, remote: &str) -> Result<(), ConnectionError>;
}

/// An open connection to one host
#[async_trait]
pub trait RemoteSession: Send + Sync {
	fn id(&self) -> &str;

	/// Run a command to completion
	async fn exec(&self, cmd: &str) -> Result<CommandOutput, ConnectionError>;

	/// Start a long-running command and read its stdout line by line
	async fn stream(&self, cmd: &str) -> Result<RemoteStream, ConnectionError>;

	/// File primitives bound to this session, cached for its lifetime
	fn files(&self) -> Arc<dyn RemoteFiles>;

	/// Transport for the mirror tool, if this session can carry one
	fn mirror_transport(&self) -> Option<MirrorTransport>;

	async fn is_alive(&self) -> bool;

	async fn close(&self);
}

/// Opens sessions for host entries
#[async_trait]
pub trait RemoteConnector: Send + Sync {
	async fn connect(&self, host: &HostEntry) -> Result<Arc<dyn RemoteSession>, ConnectionError>;
}

/// Resolve a leading `~` against the remote home directory
pub async fn resolve_remote_root(
	files: &dyn RemoteFiles,
	root: &str,
) -> Result<String, ConnectionError> {
	if root == "~" {
		return files.home_dir().await;
	}
	match root.strip_prefix("~/") {
		Some(rest) => {
			let home = files.home_dir().await?;
			Ok(format!("{}/{}", home.trim_end_matches('/'), rest))
		}
		None => Ok(root.to_string()),
	}
}

/// Join a relative path onto a remote root
pub fn remote_join(root: &str, rel: &str) -> String {
	if rel.is_empty() {
		return root.to_string();
	}
	format!("{}/{}", root.trim_end_matches('/'), rel)
}

/// Single-quote a word for a POSIX shell
pub fn shell_quote(s: &str) -> String {
	if !s.is_empty()
		&& s.chars().all(|c| c.is_ascii_alphanumeric() || "/._-+=:@,%".contains(c))
	{
		return s.to_string();
	}
	format!("'{}'", s.replace('\'', r"'\''"))
}


// vim: ts=4
