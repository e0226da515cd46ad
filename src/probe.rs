//! Runtime detection of optional external tools
//!
//! Probed once per rule start. The result picks one of two full-sync paths
//! and one of two remote watch strategies for the whole run.

use std::process::Stdio;

use crate::config::Config;
use crate::logging::*;
use crate::remote::{shell_quote, RemoteSession};
use crate::types::RemoteDepsStatus;

/// How full sync passes are carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorMode {
	/// External mirror tool over the session's transport
	ToolAssisted,
	/// Snapshot diff with per-entry transfers
	Fallback,
}

/// How remote changes are detected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteWatchMode {
	/// Long-running notification command
	Streaming,
	/// Periodic snapshot comparison
	Polling,
}

/// Capabilities fixed for one run of a rule
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSupport {
	pub mirror: MirrorMode,
	pub watch: RemoteWatchMode,
	pub deps: RemoteDepsStatus,
}

/// Ask the remote host which tools it has
pub async fn check_remote_deps(session: &dyn RemoteSession, config: &Config) -> RemoteDepsStatus {
	let mirror = shell_quote(&config.mirror.program);
	let watch = shell_quote(&config.watch.program);

	let mut status = RemoteDepsStatus::default();

	let cmd = format!("command -v {m} 2>/dev/null && {m} --version 2>/dev/null | head -1", m = mirror);
	if let Ok(output) = session.exec(&cmd).await {
		let (found, version) = parse_mirror_probe(&output.stdout);
		status.has_mirror_tool = found;
		status.mirror_tool_version = version;
	}

	let cmd = format!("command -v {} 2>/dev/null", watch);
	if let Ok(output) = session.exec(&cmd).await {
		status.has_streaming_watch = !output.stdout.trim().is_empty();
	}

	status.message = deps_message(
		&config.mirror.program,
		status.has_mirror_tool,
		&config.watch.program,
		status.has_streaming_watch,
	);
	status
}

/// Probe both sides and fix the modes for a run
pub async fn probe_tools(session: &dyn RemoteSession, config: &Config) -> ToolSupport {
	let deps = check_remote_deps(session, config).await;

	let mirror = if !deps.has_mirror_tool {
		MirrorMode::Fallback
	} else if session.mirror_transport().is_none() {
		debug!(session = %session.id(), "Session has no mirror transport, using fallback");
		MirrorMode::Fallback
	} else if !local_tool_available(&config.mirror.program).await {
		warn!("Local {} is not runnable, using fallback", config.mirror.program);
		MirrorMode::Fallback
	} else {
		MirrorMode::ToolAssisted
	};

	let watch = if deps.has_streaming_watch {
		RemoteWatchMode::Streaming
	} else {
		RemoteWatchMode::Polling
	};

	ToolSupport { mirror, watch, deps }
}

/// True if `<program> --version` runs locally
pub async fn local_tool_available(program: &str) -> bool {
	tokio::process::Command::new(program)
		.arg("--version")
		.stdin(Stdio::null())
		.stdout(Stdio::null())
		.stderr(Stdio::null())
		.kill_on_drop(true)
		.status()
		.await
		.map(|s| s.success())
		.unwrap_or(false)
}

/// Parse `command -v tool && tool --version | head -1` output.
///
/// Any output means the tool exists; the version is the last line when the
/// version query printed one.
pub fn parse_mirror_probe(stdout: &str) -> (bool, String) {
	let trimmed = stdout.trim();
	if trimmed.is_empty() {
		return (false, String::new());
	}
	let lines: Vec<&str> = trimmed.lines().collect();
	let version = if lines.len() > 1 {
		lines[lines.len() - 1].trim().to_string()
	} else {
		String::new()
	};
	(true, version)
}

/// Advisory text for a probe result
pub fn deps_message(
	mirror_program: &str,
	has_mirror: bool,
	watch_program: &str,
	has_watch: bool,
) -> String {
	let mut msgs = Vec::new();
	if !has_mirror {
		msgs.push(format!("{} not found (will use SFTP-style fallback)", mirror_program));
	}
	if !has_watch {
		msgs.push(format!("{} not found (will use polling)", watch_program));
	}
	if msgs.is_empty() {
		"All dependencies available".to_string()
	} else {
		msgs.join("; ")
	}
}


// vim: ts=4
