//! One complete reconciliation pass for a rule
//!
//! Two interchangeable paths, chosen once per run by the tool probe:
//! - [`mirror`]: hand the whole tree to the external mirror tool
//! - [`fallback`]: diff two snapshots and apply per-entry operations

pub mod fallback;
pub mod mirror;

use tokio_util::sync::CancellationToken;

use crate::callbacks::Emitter;
use crate::config::Config;
use crate::error::SyncError;
use crate::probe::MirrorMode;
use crate::remote::RemoteSession;
use crate::snapshot::Snapshot;
use crate::types::SyncRule;

/// Everything a pass needs, borrowed from the rule's runtime state
pub struct PassContext<'a> {
	pub rule: &'a SyncRule,
	pub session: &'a dyn RemoteSession,
	pub config: &'a Config,
	pub cancel: &'a CancellationToken,
	pub events: &'a Emitter,
}

/// Run one pass in the given mode.
///
/// Returns the remote snapshot when the pass produced one (fallback path).
pub async fn full_sync(ctx: &PassContext<'_>, mode: MirrorMode) -> Result<Option<Snapshot>, SyncError> {
	if ctx.cancel.is_cancelled() {
		return Err(SyncError::Cancelled);
	}
	match mode {
		MirrorMode::ToolAssisted => mirror::mirror_sync(ctx).await.map(|_| None),
		MirrorMode::Fallback => fallback::snapshot_sync(ctx).await.map(Some),
	}
}

/// Root path without trailing slashes; `/` stays `/`
pub(crate) fn clean_root(path: &str) -> &str {
	let trimmed = path.trim_end_matches('/');
	if trimmed.is_empty() && path.starts_with('/') {
		"/"
	} else {
		trimmed
	}
}


// vim: ts=4
