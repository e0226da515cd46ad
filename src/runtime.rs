//! Runtime state of one active rule
//!
//! Created by `start`, dropped by `stop`. Owns the rule's session, its
//! cancellation token and the tracker every spawned task runs on, so a stop
//! can cancel everything and then wait for it to unwind.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::Config;
use crate::error::SyncError;
use crate::full_sync::{clean_root, full_sync, PassContext};
use crate::guard::SyncGuard;
use crate::logging::*;
use crate::manager::Registry;
use crate::probe::{MirrorMode, RemoteWatchMode, ToolSupport};
use crate::remote::{resolve_remote_root, RemoteSession};
use crate::snapshot::{build_remote_snapshot, Snapshot};
use crate::types::{SyncLogEntry, SyncRule, SyncStatus};
use crate::watch::{
	spawn_remote_watcher, start_local_watcher, Debouncer, LocalWatch, NameFilter, RemoteWatch,
};

pub(crate) struct RuleRuntime {
	rule: SyncRule,
	session: Arc<dyn RemoteSession>,
	tools: ToolSupport,
	config: Arc<Config>,
	registry: Arc<Registry>,
	cancel: CancellationToken,
	tracker: TaskTracker,
	guard: Arc<SyncGuard>,
	remote_snapshot: Arc<Mutex<Snapshot>>,
	local_debounce: Arc<Debouncer>,
	remote_debounce: Arc<Debouncer>,
}

impl RuleRuntime {
	pub(crate) fn new(
		rule: SyncRule,
		session: Arc<dyn RemoteSession>,
		tools: ToolSupport,
		config: Arc<Config>,
		registry: Arc<Registry>,
	) -> Arc<Self> {
		let tracker = TaskTracker::new();
		Arc::new_cyclic(|weak: &Weak<RuleRuntime>| {
			let on_local = weak.clone();
			let on_remote = weak.clone();
			RuleRuntime {
				local_debounce: Arc::new(Debouncer::new(config.debounce(), tracker.clone(), move || {
					if let Some(runtime) = on_local.upgrade() {
						runtime.trigger();
					}
				})),
				remote_debounce: Arc::new(Debouncer::new(
					config.remote_batch(),
					tracker.clone(),
					move || {
						if let Some(runtime) = on_remote.upgrade() {
							runtime.trigger();
						}
					},
				)),
				guard: Arc::new(SyncGuard::new(config.cooldown())),
				remote_snapshot: Arc::new(Mutex::new(Snapshot::new())),
				cancel: CancellationToken::new(),
				tracker,
				rule,
				session,
				tools,
				config,
				registry,
			}
		})
	}

	/// Launch the rule's lifecycle in the background
	pub(crate) fn launch(self: &Arc<Self>) {
		let runtime = self.clone();
		self.tracker.spawn(async move { runtime.run().await });
	}

	/// Initial pass, then watchers
	async fn run(self: Arc<Self>) {
		let id = self.rule.id.clone();
		// Fresh guard, cannot fail
		let _ = self.guard.try_acquire();

		let result = self.run_pass().await;
		if self.cancel.is_cancelled() {
			return;
		}
		match result {
			Ok(()) => self.registry.update_status(&id, SyncStatus::Synced, "Initial sync complete", ""),
			Err(e) => {
				let message = format!("Initial sync failed: {}", e);
				self.registry.update_status(&id, SyncStatus::Error, "", &message);
				self.registry.events().log(SyncLogEntry::error(&id, message));
			}
		}

		// Watchers start either way so the next change retries
		self.start_watchers().await;
		self.guard.release_after_cooldown();
	}

	/// Entry point for debounced change signals.
	///
	/// Dropped, not queued, while a pass or its cooldown holds the guard.
	pub(crate) fn trigger(self: &Arc<Self>) {
		if self.cancel.is_cancelled() {
			return;
		}
		if !self.guard.try_acquire() {
			debug!(rule = %self.rule.id, "Sync already in progress, trigger dropped");
			return;
		}
		let runtime = self.clone();
		self.tracker.spawn(async move { runtime.incremental_pass().await });
	}

	async fn incremental_pass(self: Arc<Self>) {
		let id = self.rule.id.clone();
		self.registry.update_status(&id, SyncStatus::Syncing, "Syncing changes...", "");

		let result = self.run_pass().await;
		if self.cancel.is_cancelled() {
			return;
		}
		match result {
			Ok(()) => self.registry.update_status(&id, SyncStatus::Synced, "Fully synced", ""),
			Err(e) => {
				let message = format!("Sync failed: {}", e);
				self.registry.update_status(&id, SyncStatus::Error, "", &message);
				self.registry.events().log(SyncLogEntry::error(&id, message));
			}
		}
		self.guard.release_after_cooldown();
	}

	async fn run_pass(&self) -> Result<(), SyncError> {
		let ctx = PassContext {
			rule: &self.rule,
			session: self.session.as_ref(),
			config: &self.config,
			cancel: &self.cancel,
			events: self.registry.events(),
		};
		let snapshot = match full_sync(&ctx, self.tools.mirror).await? {
			Some(snapshot) => Some(snapshot),
			None if self.tools.watch == RemoteWatchMode::Polling => self.fresh_remote_snapshot().await,
			None => None,
		};
		if let Some(snapshot) = snapshot {
			*self.remote_snapshot.lock().unwrap_or_else(|e| e.into_inner()) = snapshot;
		}
		Ok(())
	}

	/// Best-effort baseline for the polling watcher after a tool-assisted pass
	async fn fresh_remote_snapshot(&self) -> Option<Snapshot> {
		let files = self.session.files();
		let root = resolve_remote_root(files.as_ref(), &self.rule.remote_path).await.ok()?;
		build_remote_snapshot(files.as_ref(), clean_root(&root)).await.ok()
	}

	async fn start_watchers(&self) {
		let id = &self.rule.id;
		let events = self.registry.events();
		let root = PathBuf::from(clean_root(&self.rule.local_path));

		match NameFilter::new(&root, &self.config.watch.ignore_patterns) {
			Ok(filter) => {
				let local = LocalWatch {
					root,
					filter: Arc::new(filter),
					guard: self.guard.clone(),
					debouncer: self.local_debounce.clone(),
					cancel: self.cancel.clone(),
				};
				match start_local_watcher(local, &self.tracker).await {
					Ok(()) => events.log(SyncLogEntry::info(id, "Local file watcher started")),
					Err(e) => events.log(SyncLogEntry::error(id, e.to_string())),
				}
			}
			Err(e) => events.log(SyncLogEntry::error(id, e.to_string())),
		}

		let remote = RemoteWatch {
			rule_id: id.clone(),
			remote_path: self.rule.remote_path.clone(),
			session: self.session.clone(),
			program: self.config.watch.program.clone(),
			poll_interval: self.config.poll_interval(),
			reconnect_backoff: self.config.reconnect_backoff(),
			events: events.clone(),
			cancel: self.cancel.clone(),
			debouncer: self.remote_debounce.clone(),
			snapshot: self.remote_snapshot.clone(),
		};
		spawn_remote_watcher(remote, self.tools.watch, &self.tracker);
	}

	/// Cancel every task, wait for them, then close the session
	pub(crate) async fn shutdown(&self) {
		self.cancel.cancel();
		self.local_debounce.cancel();
		self.remote_debounce.cancel();
		self.tracker.close();
		self.tracker.wait().await;
		self.guard.release_now();
		self.session.close().await;
		debug!(rule = %self.rule.id, session = %self.session.id(), "Rule runtime shut down");
	}

	pub(crate) fn is_guarded(&self) -> bool {
		self.guard.is_held()
	}

	pub(crate) fn mode(&self) -> (MirrorMode, RemoteWatchMode) {
		(self.tools.mirror, self.tools.watch)
	}
}

// vim: ts=4
