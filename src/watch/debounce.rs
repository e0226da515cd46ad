//! Re-armable single-shot timer

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

type Action = Arc<dyn Fn() + Send + Sync>;

/// Fires its action once after `delay` of quiet.
///
/// Every [`poke`](Debouncer::poke) aborts the pending fire and starts the
/// wait over, so a burst of events yields a single call.
pub struct Debouncer {
	delay: Duration,
	action: Action,
	tracker: TaskTracker,
	pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
	pub fn new<F>(delay: Duration, tracker: TaskTracker, action: F) -> Self
	where
		F: Fn() + Send + Sync + 'static,
	{
		Debouncer { delay, action: Arc::new(action), tracker, pending: Mutex::new(None) }
	}

	/// Restart the quiet period; must be called within a tokio runtime
	pub fn poke(&self) {
		let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
		if let Some(handle) = pending.take() {
			handle.abort();
		}
		let action = self.action.clone();
		let delay = self.delay;
		*pending = Some(self.tracker.spawn(async move {
			tokio::time::sleep(delay).await;
			action();
		}));
	}

	/// Drop a pending fire, if any
	pub fn cancel(&self) {
		if let Some(handle) = self.pending.lock().unwrap_or_else(|e| e.into_inner()).take() {
			handle.abort();
		}
	}
}

impl Drop for Debouncer {
	fn drop(&mut self) {
		self.cancel();
	}
}


// vim: ts=4
