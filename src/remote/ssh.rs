//! Remote sessions over the system `ssh` client
//!
//! Each session owns one OpenSSH master connection on a private control
//! socket. Commands, file transfers, streams and the mirror tool all
//! multiplex over that socket, so a rule authenticates exactly once.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::process::Command;

use super::{
	shell_quote, CommandOutput, MirrorTransport, RemoteConnector, RemoteEntry, RemoteFiles,
	RemoteSession, RemoteStream,
};
use crate::config::{Config, HostEntry, SshConfig};
use crate::error::ConnectionError;
use crate::logging::*;

/// Opens [`SshSession`]s
#[derive(Debug, Clone)]
pub struct SshConnector {
	ssh: SshConfig,
	strict_host_key_checking: bool,
}

impl SshConnector {
	pub fn new(ssh: SshConfig, strict_host_key_checking: bool) -> Self {
		SshConnector { ssh, strict_host_key_checking }
	}

	pub fn from_config(config: &Config) -> Self {
		Self::new(config.ssh.clone(), config.mirror.strict_host_key_checking)
	}

	fn control_dir(&self) -> PathBuf {
		self.ssh.control_dir.clone().unwrap_or_else(std::env::temp_dir)
	}
}

#[async_trait]
impl RemoteConnector for SshConnector {
	async fn connect(&self, host: &HostEntry) -> Result<Arc<dyn RemoteSession>, ConnectionError> {
		let id = uuid::Uuid::new_v4().simple().to_string();
		// Socket paths are length-limited; keep the name short
		let socket = self.control_dir().join(format!("remsync-{}.sock", &id[..12]));

		let target = Arc::new(SshTarget {
			program: self.ssh.program.clone(),
			socket,
			destination: host.destination(),
			port: host.port,
			identity: host.identity_path(),
		});

		let mut cmd = Command::new(&target.program);
		cmd.arg("-M")
			.arg("-S")
			.arg(&target.socket)
			.args(["-o", "ControlPersist=yes"])
			.args(["-o", "BatchMode=yes"])
			.arg("-o")
			.arg(format!("ConnectTimeout={}", self.ssh.connect_timeout_secs))
			.arg("-o")
			.arg(if self.strict_host_key_checking {
				"StrictHostKeyChecking=yes"
			} else {
				"StrictHostKeyChecking=accept-new"
			})
			.arg("-p")
			.arg(target.port.to_string());
		if let Some(identity) = &target.identity {
			cmd.arg("-i").arg(identity);
		}
		cmd.args(["-f", "-N"])
			.arg(&target.destination)
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.stderr(Stdio::piped());

		debug!(host = %target.destination, socket = %target.socket.display(), "Opening ssh master connection");
		let output = cmd.output().await.map_err(|e| ConnectionError::SpawnFailed {
			cmd: self.ssh.program.clone(),
			source: e,
		})?;
		if !output.status.success() {
			return Err(ConnectionError::SshFailed {
				host: target.destination.clone(),
				message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
			});
		}

		let transport = MirrorTransport {
			remote_shell: Some(target.remote_shell(self.strict_host_key_checking)),
			target_prefix: format!("{}:", target.destination),
		};
		let files: Arc<dyn RemoteFiles> = Arc::new(SshFiles { target: target.clone() });
		Ok(Arc::new(SshSession {
			id,
			target,
			files,
			transport,
			closed: AtomicBool::new(false),
		}))
	}
}

/// Everything needed to run a command over the control socket
#[derive(Debug)]
struct SshTarget {
	program: String,
	socket: PathBuf,
	destination: String,
	port: u16,
	identity: Option<String>,
}

impl SshTarget {
	/// `ssh -S <socket> -p <port> <dest>` ready for more arguments
	fn command(&self) -> Command {
		let mut cmd = Command::new(&self.program);
		cmd.arg("-S")
			.arg(&self.socket)
			.args(["-o", "BatchMode=yes"])
			.arg("-p")
			.arg(self.port.to_string())
			.arg(&self.destination)
			.kill_on_drop(true);
		cmd
	}

	/// Remote shell string for the mirror tool's `-e` option
	fn remote_shell(&self, strict: bool) -> String {
		let mut shell = format!(
			"{} -p {} -o StrictHostKeyChecking={}",
			self.program,
			self.port,
			if strict { "yes" } else { "no" }
		);
		if let Some(identity) = &self.identity {
			shell.push_str(&format!(" -i {}", shell_quote(identity)));
		}
		shell.push_str(&format!(" -S {}", shell_quote(&self.socket.to_string_lossy())));
		shell
	}

	async fn run(&self, remote_cmd: &str) -> Result<CommandOutput, ConnectionError> {
		let output = self
			.command()
			.arg(remote_cmd)
			.stdin(Stdio::null())
			.output()
			.await
			.map_err(|e| ConnectionError::SpawnFailed { cmd: self.program.clone(), source: e })?;
		Ok(CommandOutput {
			code: output.status.code(),
			stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
			stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
		})
	}

	/// Run and require a zero exit status
	async fn run_ok(&self, remote_cmd: &str) -> Result<CommandOutput, ConnectionError> {
		let output = self.run(remote_cmd).await?;
		if output.success() {
			Ok(output)
		} else {
			Err(ConnectionError::CommandFailed {
				cmd: remote_cmd.to_string(),
				status: describe_code(output.code),
				output: output.combined(),
			})
		}
	}

	/// Run with stdin/stdout wired to local files
	async fn run_with_stdio(
		&self,
		remote_cmd: &str,
		stdin: Stdio,
		stdout: Stdio,
	) -> Result<(), ConnectionError> {
		let output = self
			.command()
			.arg(remote_cmd)
			.stdin(stdin)
			.stdout(stdout)
			.stderr(Stdio::piped())
			.output()
			.await
			.map_err(|e| ConnectionError::SpawnFailed { cmd: self.program.clone(), source: e })?;
		if output.status.success() {
			Ok(())
		} else {
			Err(ConnectionError::CommandFailed {
				cmd: remote_cmd.to_string(),
				status: describe_code(output.status.code()),
				output: String::from_utf8_lossy(&output.stderr).into_owned(),
			})
		}
	}
}

fn describe_code(code: Option<i32>) -> String {
	match code {
		Some(code) => format!("exit status: {}", code),
		None => "terminated by signal".to_string(),
	}
}

/// Session over one master connection
pub struct SshSession {
	id: String,
	target: Arc<SshTarget>,
	files: Arc<dyn RemoteFiles>,
	transport: MirrorTransport,
	closed: AtomicBool,
}

impl SshSession {
	fn check_open(&self) -> Result<(), ConnectionError> {
		if self.closed.load(Ordering::SeqCst) {
			Err(ConnectionError::Disconnected)
		} else {
			Ok(())
		}
	}
}

#[async_trait]
impl RemoteSession for SshSession {
	fn id(&self) -> &str {
		&self.id
	}

	async fn exec(&self, cmd: &str) -> Result<CommandOutput, ConnectionError> {
		self.check_open()?;
		self.target.run(cmd).await
	}

	async fn stream(&self, cmd: &str) -> Result<RemoteStream, ConnectionError> {
		self.check_open()?;
		let child = self
			.target
			.command()
			.arg(cmd)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::null())
			.spawn()
			.map_err(|e| ConnectionError::SpawnFailed {
				cmd: self.target.program.clone(),
				source: e,
			})?;
		RemoteStream::from_child(child)
	}

	fn files(&self) -> Arc<dyn RemoteFiles> {
		self.files.clone()
	}

	fn mirror_transport(&self) -> Option<MirrorTransport> {
		Some(self.transport.clone())
	}

	async fn is_alive(&self) -> bool {
		if self.closed.load(Ordering::SeqCst) {
			return false;
		}
		Command::new(&self.target.program)
			.arg("-S")
			.arg(&self.target.socket)
			.args(["-O", "check"])
			.arg(&self.target.destination)
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.stderr(Stdio::null())
			.status()
			.await
			.map(|s| s.success())
			.unwrap_or(false)
	}

	async fn close(&self) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		let result = Command::new(&self.target.program)
			.arg("-S")
			.arg(&self.target.socket)
			.args(["-O", "exit"])
			.arg(&self.target.destination)
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.stderr(Stdio::null())
			.status()
			.await;
		if let Err(e) = result {
			warn!(session = %self.id, "Failed to close ssh master: {}", e);
		}
		let _ = tokio::fs::remove_file(&self.target.socket).await;
	}
}

/// File primitives tunnelled through `cat`, `find` and friends
struct SshFiles {
	target: Arc<SshTarget>,
}

#[async_trait]
impl RemoteFiles for SshFiles {
	async fn home_dir(&self) -> Result<String, ConnectionError> {
		let output = self.target.run_ok("printf %s \"$HOME\"").await?;
		Ok(output.stdout.trim().to_string())
	}

	async fn walk(&self, root: &str) -> Result<Vec<RemoteEntry>, ConnectionError> {
		let quoted = shell_quote(root);
		let cmd = format!(
			"if [ -d {q} ]; then find {q} -mindepth 1 -printf '%P\\t%s\\t%T@\\t%y\\n'; fi",
			q = quoted
		);
		let output = self.target.run_ok(&cmd).await?;
		Ok(parse_find_output(&output.stdout))
	}

	async fn upload(&self, local: &Path, remote: &str) -> Result<(), ConnectionError> {
		let file = tokio::fs::File::open(local).await.map_err(|e| ConnectionError::Io {
			what: format!("open {}", local.display()),
			source: e,
		})?;
		let file = file.into_std().await;
		let cmd = format!("cat > {}", shell_quote(remote));
		self.target.run_with_stdio(&cmd, Stdio::from(file), Stdio::null()).await
	}

	async fn download(&self, remote: &str, local: &Path) -> Result<(), ConnectionError> {
		let file = tokio::fs::File::create(local).await.map_err(|e| ConnectionError::Io {
			what: format!("create {}", local.display()),
			source: e,
		})?;
		let file = file.into_std().await;
		let cmd = format!("cat {}", shell_quote(remote));
		self.target.run_with_stdio(&cmd, Stdio::null(), Stdio::from(file)).await
	}

	async fn mkdir_all(&self, remote: &str) -> Result<(), ConnectionError> {
		self.target.run_ok(&format!("mkdir -p {}", shell_quote(remote))).await.map(|_| ())
	}

	async fn remove_file(&self, remote: &str) -> Result<(), ConnectionError> {
		self.target.run_ok(&format!("rm -f {}", shell_quote(remote))).await.map(|_| ())
	}

	async fn remove_dir(&self, remote: &str) -> Result<(), ConnectionError> {
		self.target.run_ok(&format!("rmdir {}", shell_quote(remote))).await.map(|_| ())
	}
}

/// Parse `find -printf '%P\t%s\t%T@\t%y\n'` output.
///
/// Only regular files and directories are kept; malformed lines are skipped.
fn parse_find_output(stdout: &str) -> Vec<RemoteEntry> {
	stdout
		.lines()
		.filter_map(|line| {
			let mut fields = line.split('\t');
			let path = fields.next()?;
			let size = fields.next()?.parse::<u64>().ok()?;
			let mtime = fields.next()?.parse::<f64>().ok()?;
			let kind = fields.next()?;
			if path.is_empty() || fields.next().is_some() {
				return None;
			}
			let is_dir = match kind {
				"d" => true,
				"f" => false,
				_ => return None,
			};
			Some(RemoteEntry {
				path: path.to_string(),
				size: if is_dir { 0 } else { size },
				mtime: mtime.floor() as i64,
				is_dir,
			})
		})
		.collect()
}


// vim: ts=4
