//! Remote change detection
//!
//! Streaming runs the notification tool over the rule's session and pokes
//! the batch debouncer for every output line, reconnecting after a backoff
//! whenever the stream drops. If the tool cannot start at all the watcher
//! switches to polling for the rest of the run. Polling rebuilds the remote
//! snapshot on a fixed interval and compares it with the stored one.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::debounce::Debouncer;
use crate::callbacks::Emitter;
use crate::logging::*;
use crate::probe::RemoteWatchMode;
use crate::remote::{resolve_remote_root, shell_quote, RemoteSession};
use crate::snapshot::{build_remote_snapshot, snapshots_differ, Snapshot};
use crate::types::SyncLogEntry;

/// Exit status ssh reports when the transport itself failed
const TRANSPORT_FAILURE: i32 = 255;

/// What the remote watcher needs from its rule
pub struct RemoteWatch {
	pub rule_id: String,
	pub remote_path: String,
	pub session: Arc<dyn RemoteSession>,

	/// Streaming notification program
	pub program: String,

	pub poll_interval: Duration,
	pub reconnect_backoff: Duration,
	pub events: Emitter,
	pub cancel: CancellationToken,
	pub debouncer: Arc<Debouncer>,

	/// Last remote snapshot, shared with the full-sync path
	pub snapshot: Arc<Mutex<Snapshot>>,
}

/// Spawn the watcher for `mode` on `tracker`
pub fn spawn_remote_watcher(watch: RemoteWatch, mode: RemoteWatchMode, tracker: &TaskTracker) {
	match mode {
		RemoteWatchMode::Streaming => tracker.spawn(streaming_loop(watch)),
		RemoteWatchMode::Polling => tracker.spawn(polling_loop(watch)),
	};
}

/// The notification command for a resolved root
pub fn streaming_command(program: &str, root: &str) -> String {
	format!(
		"{} -m -q -r -e modify,create,delete,move --format '%w%f %e' {}",
		shell_quote(program),
		shell_quote(root)
	)
}

/// Human form of a watcher interval, e.g. `5s` or `300ms`
pub fn format_interval(d: Duration) -> String {
	let ms = d.as_millis();
	if ms % 1000 == 0 {
		format!("{}s", ms / 1000)
	} else {
		format!("{}ms", ms)
	}
}

/// Sleep unless cancelled first; false on cancellation
async fn pause(cancel: &CancellationToken, d: Duration) -> bool {
	tokio::select! {
		_ = cancel.cancelled() => false,
		_ = tokio::time::sleep(d) => true,
	}
}

async fn streaming_loop(watch: RemoteWatch) {
	let files = watch.session.files();
	let backoff = format_interval(watch.reconnect_backoff);

	loop {
		if watch.cancel.is_cancelled() {
			return;
		}
		if !watch.session.is_alive().await {
			warn!(rule = %watch.rule_id, "Session lost for streaming watcher, retrying in {}", backoff);
			if !pause(&watch.cancel, watch.reconnect_backoff).await {
				return;
			}
			continue;
		}

		let root = match resolve_remote_root(files.as_ref(), &watch.remote_path).await {
			Ok(root) => root,
			Err(e) => {
				warn!(rule = %watch.rule_id, "Cannot resolve remote root: {}", e);
				if !pause(&watch.cancel, watch.reconnect_backoff).await {
					return;
				}
				continue;
			}
		};

		let cmd = streaming_command(&watch.program, &root);
		let mut stream = match watch.session.stream(&cmd).await {
			Ok(stream) => stream,
			Err(e) => {
				warn!(rule = %watch.rule_id, "Failed to open streaming session: {}", e);
				if !pause(&watch.cancel, watch.reconnect_backoff).await {
					return;
				}
				continue;
			}
		};
		watch.events.log(SyncLogEntry::info(&watch.rule_id, "Remote streaming watcher started"));

		let mut lines = 0usize;
		let mut read_failed = false;
		loop {
			let line = tokio::select! {
				_ = watch.cancel.cancelled() => return,
				line = stream.next_line() => line,
			};
			match line {
				Ok(Some(_)) => {
					lines += 1;
					watch.debouncer.poke();
				}
				Ok(None) => break,
				Err(e) => {
					debug!(rule = %watch.rule_id, "Streaming watcher read error: {}", e);
					read_failed = true;
					break;
				}
			}
		}

		// Dropping kills the notifier; its exit status is not waited for
		let code = if read_failed {
			drop(stream);
			None
		} else {
			tokio::select! {
				_ = watch.cancel.cancelled() => return,
				code = stream.finish() => code,
			}
		};

		let start_failed = lines == 0
			&& matches!(code, Some(c) if c != 0 && c != TRANSPORT_FAILURE)
			&& watch.session.is_alive().await;
		if start_failed {
			watch.events.log(SyncLogEntry::error(
				&watch.rule_id,
				format!(
					"Failed to start {}: exit status {}",
					watch.program,
					code.unwrap_or_default()
				),
			));
			return polling_loop(watch).await;
		}

		watch.events.log(SyncLogEntry::info(
			&watch.rule_id,
			format!("Streaming watcher disconnected, reconnecting in {}...", backoff),
		));
		if !pause(&watch.cancel, watch.reconnect_backoff).await {
			return;
		}
	}
}

async fn polling_loop(watch: RemoteWatch) {
	let files = watch.session.files();
	watch.events.log(SyncLogEntry::info(
		&watch.rule_id,
		format!("Remote polling watcher started (interval: {})", format_interval(watch.poll_interval)),
	));

	let mut ticker = tokio::time::interval_at(Instant::now() + watch.poll_interval, watch.poll_interval);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

	loop {
		tokio::select! {
			_ = watch.cancel.cancelled() => return,
			_ = ticker.tick() => {}
		}

		let current = tokio::select! {
			_ = watch.cancel.cancelled() => return,
			current = poll_once(files.as_ref(), &watch.remote_path) => current,
		};
		let current = match current {
			Some(snapshot) => snapshot,
			None => continue,
		};

		let changed = {
			let mut stored = watch.snapshot.lock().unwrap_or_else(|e| e.into_inner());
			let changed = snapshots_differ(&stored, &current);
			*stored = current;
			changed
		};
		if changed {
			debug!(rule = %watch.rule_id, "Remote snapshot changed");
			watch.debouncer.poke();
		}
	}
}

async fn poll_once(files: &dyn crate::remote::RemoteFiles, remote_path: &str) -> Option<Snapshot> {
	let root = resolve_remote_root(files, remote_path).await.ok()?;
	match build_remote_snapshot(files, crate::full_sync::clean_root(&root)).await {
		Ok(snapshot) => Some(snapshot),
		Err(e) => {
			debug!("Remote poll failed: {}", e);
			None
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_streaming_command() {
		assert_eq!(
			streaming_command("inotifywait", "/srv/my site"),
			"inotifywait -m -q -r -e modify,create,delete,move --format '%w%f %e' '/srv/my site'"
		);
	}

	#[test]
	fn test_format_interval() {
		assert_eq!(format_interval(Duration::from_secs(5)), "5s");
		assert_eq!(format_interval(Duration::from_millis(300)), "300ms");
	}
}

// vim: ts=4
