//! Per-rule syncing guard
//!
//! Held while a pass runs and for a cooldown window afterwards, because
//! change notifications for the pass's own writes can arrive late. While
//! held, new triggers are dropped. It doubles as the mutual exclusion
//! between passes of the same rule.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Default)]
struct GuardState {
	held: bool,
	release: Option<JoinHandle<()>>,
}

pub struct SyncGuard {
	cooldown: Duration,
	state: Arc<Mutex<GuardState>>,
}

impl SyncGuard {
	pub fn new(cooldown: Duration) -> Self {
		SyncGuard { cooldown, state: Arc::new(Mutex::new(GuardState::default())) }
	}

	/// Take the guard; false if a pass or its cooldown holds it
	pub fn try_acquire(&self) -> bool {
		let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
		if state.held {
			return false;
		}
		state.held = true;
		true
	}

	pub fn is_held(&self) -> bool {
		self.state.lock().unwrap_or_else(|e| e.into_inner()).held
	}

	/// Clear the guard once the cooldown has elapsed
	pub fn release_after_cooldown(&self) {
		let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
		if let Some(handle) = state.release.take() {
			handle.abort();
		}
		let shared = self.state.clone();
		let cooldown = self.cooldown;
		state.release = Some(tokio::spawn(async move {
			tokio::time::sleep(cooldown).await;
			let mut state = shared.lock().unwrap_or_else(|e| e.into_inner());
			state.held = false;
			state.release = None;
		}));
	}

	/// Clear immediately, dropping any pending cooldown
	pub fn release_now(&self) {
		let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
		if let Some(handle) = state.release.take() {
			handle.abort();
		}
		state.held = false;
	}
}

impl Drop for SyncGuard {
	fn drop(&mut self) {
		self.release_now();
	}
}


// vim: ts=4
