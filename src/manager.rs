//! Sync rule orchestration
//!
//! [`SyncManager`] owns two maps, each behind its own lock: the rule set
//! (persisted) and the runtime states of active rules (in memory only). A
//! map lock is held for one read or write, never across I/O. Writes of the
//! rules file are ordered by a separate save lock.

use futures::future;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use crate::callbacks::{Emitter, SyncEvents};
use crate::config::{Config, HostEntry};
use crate::error::SyncError;
use crate::hosts::{ConfigHosts, HostRegistry};
use crate::logging::*;
use crate::probe::{check_remote_deps, probe_tools, MirrorMode, RemoteWatchMode};
use crate::remote::{RemoteConnector, RemoteSession, SshConnector};
use crate::runtime::RuleRuntime;
use crate::state::RuleStore;
use crate::types::{
	RemoteDepsStatus, RuleSpec, StatusEvent, SyncLogEntry, SyncRule, SyncSource, SyncStatus,
};

/// Reply expected from the connection test command
const PING_COMMAND: &str = "echo ok";
const PING_REPLY: &str = "ok";

/// Rule set shared between the manager and every rule runtime
pub(crate) struct Registry {
	rules: RwLock<BTreeMap<String, SyncRule>>,
	store: RuleStore,
	/// Serializes persists so the newest copy is always written last
	save_lock: Mutex<()>,
	events: Emitter,
}

impl Registry {
	pub(crate) fn events(&self) -> &Emitter {
		&self.events
	}

	fn get(&self, id: &str) -> Option<SyncRule> {
		self.rules.read().unwrap_or_else(|e| e.into_inner()).get(id).cloned()
	}

	/// Apply `f` to a rule under the write lock
	fn modify<F>(&self, id: &str, f: F) -> Option<SyncRule>
	where
		F: FnOnce(&mut SyncRule),
	{
		let mut rules = self.rules.write().unwrap_or_else(|e| e.into_inner());
		rules.get_mut(id).map(|rule| {
			f(rule);
			rule.clone()
		})
	}

	/// Write the rule set.
	///
	/// The copy is taken after acquiring the save lock, so concurrent
	/// persists land in order. The rules lock is only held for the copy.
	fn persist(&self) -> Result<(), SyncError> {
		let _saving = self.save_lock.lock().unwrap_or_else(|e| e.into_inner());
		let snapshot: Vec<SyncRule> =
			self.rules.read().unwrap_or_else(|e| e.into_inner()).values().cloned().collect();
		self.store.save(&snapshot)?;
		Ok(())
	}

	/// Record a status change and notify the caller
	pub(crate) fn update_status(&self, id: &str, status: SyncStatus, detail: &str, error: &str) {
		let updated = self.modify(id, |rule| {
			rule.status = status;
			rule.error = error.to_string();
			if status == SyncStatus::Synced {
				rule.last_sync = chrono::Local::now().to_rfc3339();
			}
		});
		if updated.is_some() && status == SyncStatus::Synced {
			if let Err(e) = self.persist() {
				warn!(rule = %id, "Failed to persist sync time: {}", e);
			}
		}
		self.events.status(StatusEvent {
			rule_id: id.to_string(),
			status,
			detail: detail.to_string(),
			error: error.to_string(),
		});
	}
}

/// Owner of the rule set and of every active rule's runtime
pub struct SyncManager {
	config: Arc<Config>,
	registry: Arc<Registry>,
	hosts: Arc<dyn HostRegistry>,
	connector: Arc<dyn RemoteConnector>,
	states: Mutex<HashMap<String, Arc<RuleRuntime>>>,
}

impl SyncManager {
	/// Load persisted rules and set up the manager.
	///
	/// Every loaded rule starts out inactive and idle.
	pub fn new(
		config: Config,
		hosts: Arc<dyn HostRegistry>,
		connector: Arc<dyn RemoteConnector>,
		events: Arc<dyn SyncEvents>,
	) -> Result<Self, SyncError> {
		let store = RuleStore::new(config.state_dir.clone());
		let loaded = store.load()?;
		info!("Loaded {} sync rules from {}", loaded.len(), store.rules_path().display());

		let rules = loaded.into_iter().map(|rule| (rule.id.clone(), rule)).collect();
		Ok(SyncManager {
			config: Arc::new(config),
			registry: Arc::new(Registry {
				rules: RwLock::new(rules),
				store,
				save_lock: Mutex::new(()),
				events: Emitter::new(events),
			}),
			hosts,
			connector,
			states: Mutex::new(HashMap::new()),
		})
	}

	/// Manager over the configured hosts and the system ssh client
	pub fn with_ssh(config: Config, events: Arc<dyn SyncEvents>) -> Result<Self, SyncError> {
		let hosts = Arc::new(ConfigHosts::from_config(&config));
		let connector = Arc::new(SshConnector::from_config(&config));
		Self::new(config, hosts, connector, events)
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	// ========================================================================
	// RULE SET
	// ========================================================================

	/// All rules, ordered by id
	pub fn list_rules(&self) -> Vec<SyncRule> {
		self.registry.rules.read().unwrap_or_else(|e| e.into_inner()).values().cloned().collect()
	}

	pub fn get_rule(&self, id: &str) -> Option<SyncRule> {
		self.registry.get(id)
	}

	/// Validate, assign an id and persist a new rule
	pub fn add_rule(&self, spec: RuleSpec) -> Result<SyncRule, SyncError> {
		let source = spec.validate()?;
		let rule = SyncRule {
			id: format!("sync-{}", uuid::Uuid::new_v4().simple()),
			server_name: spec.server_name,
			ssh_host: spec.ssh_host,
			remote_path: spec.remote_path,
			local_path: spec.local_path,
			source,
			..Default::default()
		};

		self.registry
			.rules
			.write()
			.unwrap_or_else(|e| e.into_inner())
			.insert(rule.id.clone(), rule.clone());
		if let Err(e) = self.registry.persist() {
			self.registry.rules.write().unwrap_or_else(|e| e.into_inner()).remove(&rule.id);
			return Err(e);
		}

		info!(
			rule = %rule.id,
			"Added rule ({} <-> {}:{})",
			rule.local_path,
			rule.ssh_host,
			rule.remote_path
		);
		Ok(rule)
	}

	/// Replace the editable fields of an inactive rule
	pub fn update_rule(&self, id: &str, spec: RuleSpec) -> Result<SyncRule, SyncError> {
		let source = spec.validate()?;
		let current = self.registry.get(id).ok_or_else(|| SyncError::RuleNotFound { id: id.to_string() })?;
		if current.active {
			return Err(SyncError::RuleActive { id: id.to_string() });
		}

		let updated = self
			.registry
			.modify(id, |rule| {
				rule.server_name = spec.server_name;
				rule.ssh_host = spec.ssh_host;
				rule.remote_path = spec.remote_path;
				rule.local_path = spec.local_path;
				rule.source = source;
				rule.status = SyncStatus::Idle;
				rule.error.clear();
			})
			.ok_or_else(|| SyncError::RuleNotFound { id: id.to_string() })?;
		self.registry.persist()?;
		Ok(updated)
	}

	/// Stop and delete a rule; unknown ids are ignored
	pub async fn remove_rule(&self, id: &str) -> Result<(), SyncError> {
		self.stop(id).await?;

		let removed =
			self.registry.rules.write().unwrap_or_else(|e| e.into_inner()).remove(id).is_some();
		if removed {
			self.registry.persist()?;
			info!(rule = %id, "Removed rule");
		}
		Ok(())
	}

	/// Change the authoritative side, restarting the rule if it was active
	pub async fn set_source(&self, id: &str, source: &str) -> Result<(), SyncError> {
		let source = source.parse::<SyncSource>()?;
		let rule = self.registry.get(id).ok_or_else(|| SyncError::RuleNotFound { id: id.to_string() })?;
		let was_active = rule.active;

		if was_active {
			self.stop(id).await?;
		}
		self.registry.modify(id, |rule| rule.source = source);
		self.registry.persist()?;

		if was_active {
			self.start(id).await?;
		}
		Ok(())
	}

	// ========================================================================
	// LIFECYCLE
	// ========================================================================

	/// Connect, probe and launch the rule's background worker.
	///
	/// Returns once the worker is running; the initial pass proceeds in the
	/// background. An already active rule is stopped first.
	pub async fn start(&self, id: &str) -> Result<(), SyncError> {
		let rule = self.registry.get(id).ok_or_else(|| SyncError::RuleNotFound { id: id.to_string() })?;
		self.stop(id).await?;

		let host = match self.hosts.resolve(&rule.ssh_host) {
			Some(host) => host,
			None => {
				let err = SyncError::HostNotFound { host: rule.ssh_host.clone() };
				self.registry.update_status(id, SyncStatus::Error, "", &err.to_string());
				return Err(err);
			}
		};

		let session = match self.connector.connect(&host).await {
			Ok(session) => session,
			Err(e) => {
				let message = format!("SSH connection failed: {}", e);
				self.registry.update_status(id, SyncStatus::Error, "", &message);
				return Err(SyncError::Connection(e));
			}
		};

		let tools = probe_tools(session.as_ref(), &self.config).await;
		let message = format!(
			"Starting sync (mirror={}, streaming={}). {}",
			tools.mirror == MirrorMode::ToolAssisted,
			tools.watch == RemoteWatchMode::Streaming,
			tools.deps.message
		);

		let rule = match self.registry.modify(id, |rule| {
			rule.active = true;
			rule.status = SyncStatus::Syncing;
			rule.error.clear();
		}) {
			Some(rule) => rule,
			None => {
				// Removed while we were connecting
				session.close().await;
				return Err(SyncError::RuleNotFound { id: id.to_string() });
			}
		};

		let runtime =
			RuleRuntime::new(rule, session, tools, self.config.clone(), self.registry.clone());
		let previous = self
			.states
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.insert(id.to_string(), runtime.clone());
		if let Some(previous) = previous {
			previous.shutdown().await;
		}

		self.registry.events().log(SyncLogEntry::info(id, message));
		self.registry.update_status(id, SyncStatus::Syncing, "Initial sync...", "");
		runtime.launch();
		Ok(())
	}

	/// Cancel the rule's worker and watchers and close its session.
	///
	/// No-op for inactive rules.
	pub async fn stop(&self, id: &str) -> Result<(), SyncError> {
		let runtime = self.states.lock().unwrap_or_else(|e| e.into_inner()).remove(id);
		let runtime = match runtime {
			Some(runtime) => runtime,
			None => return Ok(()),
		};

		runtime.shutdown().await;

		self.registry.modify(id, |rule| {
			rule.active = false;
			rule.status = SyncStatus::Idle;
			rule.error.clear();
		});
		self.registry.update_status(id, SyncStatus::Idle, "Sync stopped", "");
		self.registry.events().log(SyncLogEntry::info(id, "Sync stopped"));
		Ok(())
	}

	/// Stop every active rule
	pub async fn stop_all(&self) {
		let ids: Vec<String> =
			self.states.lock().unwrap_or_else(|e| e.into_inner()).keys().cloned().collect();
		let results = future::join_all(ids.iter().map(|id| self.stop(id))).await;
		for (id, result) in ids.iter().zip(results) {
			if let Err(e) = result {
				warn!(rule = %id, "Failed to stop: {}", e);
			}
		}
	}

	/// Full-sync path and remote watch strategy of an active rule
	pub fn active_modes(&self, id: &str) -> Option<(MirrorMode, RemoteWatchMode)> {
		self.states.lock().unwrap_or_else(|e| e.into_inner()).get(id).map(|rt| rt.mode())
	}

	/// True while the rule's syncing guard is held (pass running or cooling down)
	pub fn is_syncing(&self, id: &str) -> bool {
		self.states
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.get(id)
			.map(|rt| rt.is_guarded())
			.unwrap_or(false)
	}

	// ========================================================================
	// HOSTS
	// ========================================================================

	pub fn hosts(&self) -> Vec<HostEntry> {
		self.hosts.entries()
	}

	/// Open a throwaway session and check a round-trip command
	pub async fn test_connection(&self, host_id: &str) -> Result<(), SyncError> {
		let session = self.throwaway_session(host_id).await?;
		let result = session.exec(PING_COMMAND).await;
		session.close().await;

		let output = result?;
		if output.stdout.trim() != PING_REPLY {
			return Err(SyncError::UnexpectedReply { output: output.combined() });
		}
		info!(host = %host_id, "Connection test successful");
		Ok(())
	}

	/// Report which optional tools a host offers
	pub async fn check_remote_deps(&self, host_id: &str) -> Result<RemoteDepsStatus, SyncError> {
		let session = self.throwaway_session(host_id).await?;
		let status = check_remote_deps(session.as_ref(), &self.config).await;
		session.close().await;
		Ok(status)
	}

	async fn throwaway_session(&self, host_id: &str) -> Result<Arc<dyn RemoteSession>, SyncError> {
		let host = self
			.hosts
			.resolve(host_id)
			.ok_or_else(|| SyncError::HostNotFound { host: host_id.to_string() })?;
		Ok(self.connector.connect(&host).await?)
	}
}

// vim: ts=4
