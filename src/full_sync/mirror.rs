//! Tool-assisted full sync
//!
//! Builds one archive+delete invocation of the mirror tool routed through
//! the rule's own remote transport. Source and destination follow the
//! authoritative side, both with a trailing slash so directory contents are
//! replaced rather than nested.

use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::{clean_root, PassContext};
use crate::config::MirrorConfig;
use crate::error::SyncError;
use crate::remote::MirrorTransport;
use crate::types::{SyncLogEntry, SyncRule, SyncSource};

/// A ready-to-spawn mirror tool invocation
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorCommand {
	pub program: String,
	pub args: Vec<String>,
	pub src: String,
	pub dst: String,
}

/// Build the invocation for a rule
pub fn build_mirror_command(
	rule: &SyncRule,
	transport: &MirrorTransport,
	mirror: &MirrorConfig,
) -> MirrorCommand {
	let remote = transport.target(&with_slash(clean_root(&rule.remote_path)));
	let local = with_slash(clean_root(&rule.local_path));

	let (src, dst) = match rule.source {
		SyncSource::Local => (local, remote),
		SyncSource::Remote => (remote, local),
	};

	let mut args = vec![
		"-avz".to_string(),
		"--delete".to_string(),
		format!("--timeout={}", mirror.timeout_secs),
	];
	args.extend(mirror.extra_args.iter().cloned());
	if let Some(shell) = &transport.remote_shell {
		args.push("-e".to_string());
		args.push(shell.clone());
	}
	args.push(src.clone());
	args.push(dst.clone());

	MirrorCommand { program: mirror.program.clone(), args, src, dst }
}

fn with_slash(path: &str) -> String {
	if path.ends_with('/') {
		path.to_string()
	} else {
		format!("{}/", path)
	}
}

/// Run the tool to completion and return its combined output.
///
/// Cancellation kills the child and yields [`SyncError::Cancelled`].
pub async fn run_mirror(cmd: &MirrorCommand, cancel: &CancellationToken) -> Result<String, SyncError> {
	let child = Command::new(&cmd.program)
		.args(&cmd.args)
		.stdin(Stdio::null())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.kill_on_drop(true)
		.spawn()
		.map_err(|e| SyncError::MirrorTool {
			status: format!("failed to start {}", cmd.program),
			output: e.to_string(),
		})?;

	// Dropping the wait future drops the child, which kills it
	let output = tokio::select! {
		_ = cancel.cancelled() => return Err(SyncError::Cancelled),
		out = child.wait_with_output() => out?,
	};

	let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
	combined.push_str(&String::from_utf8_lossy(&output.stderr));

	if !output.status.success() {
		return Err(SyncError::MirrorTool { status: output.status.to_string(), output: combined });
	}
	Ok(combined)
}

/// Approximate count of entries the tool touched, from its verbose listing
pub fn count_transferred(output: &str) -> usize {
	const SUMMARY_PREFIXES: [&str; 5] = ["sending", "receiving", "sent", "total", "building"];

	output
		.lines()
		.map(str::trim)
		.filter(|line| {
			!line.is_empty()
				&& *line != "./"
				&& !SUMMARY_PREFIXES.iter().any(|prefix| line.starts_with(prefix))
		})
		.count()
}

pub(crate) async fn mirror_sync(ctx: &PassContext<'_>) -> Result<(), SyncError> {
	let transport = ctx.session.mirror_transport().ok_or_else(|| SyncError::MirrorTool {
		status: "no transport".to_string(),
		output: format!("session {} cannot carry the mirror tool", ctx.session.id()),
	})?;

	tokio::fs::create_dir_all(clean_root(&ctx.rule.local_path)).await?;

	let cmd = build_mirror_command(ctx.rule, &transport, &ctx.config.mirror);
	ctx.events.log(SyncLogEntry::info(
		&ctx.rule.id,
		format!("Running {}: {} -> {}", cmd.program, cmd.src, cmd.dst),
	));

	let output = run_mirror(&cmd, ctx.cancel).await?;

	ctx.events.log(SyncLogEntry::summary(
		&ctx.rule.id,
		format!("{} complete: {} files synced", cmd.program, count_transferred(&output)),
	));
	Ok(())
}


// vim: ts=4
