//! Push notifications from the engine to its caller
//!
//! Status changes and log entries are fire-and-forget: there is no
//! acknowledgment and no backpressure. Callers buffer as they see fit.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::logging::*;
use crate::types::{LogOutcome, StatusEvent, SyncLogEntry};

type StatusFn = dyn Fn(StatusEvent) + Send + Sync;
type LogFn = dyn Fn(SyncLogEntry) + Send + Sync;

/// Receiver of engine notifications
pub trait SyncEvents: Send + Sync {
	/// A rule changed status
	fn on_status(&self, _event: StatusEvent) {}

	/// A file operation or milestone happened
	fn on_log(&self, _entry: SyncLogEntry) {}
}

/// Sink that drops everything
pub struct NoEvents;

impl SyncEvents for NoEvents {}

/// Builder for a sink made of closures
pub struct CallbackBuilder {
	status: Option<Box<StatusFn>>,
	log: Option<Box<LogFn>>,
}

impl CallbackBuilder {
	pub fn new() -> Self {
		CallbackBuilder { status: None, log: None }
	}

	/// Set status callback
	pub fn on_status<F>(mut self, callback: F) -> Self
	where
		F: Fn(StatusEvent) + Send + Sync + 'static,
	{
		self.status = Some(Box::new(callback));
		self
	}

	/// Set log callback
	pub fn on_log<F>(mut self, callback: F) -> Self
	where
		F: Fn(SyncLogEntry) + Send + Sync + 'static,
	{
		self.log = Some(Box::new(callback));
		self
	}

	pub fn build(self) -> Box<dyn SyncEvents> {
		Box::new(CompositeEvents { status: self.status, log: self.log })
	}
}

impl Default for CallbackBuilder {
	fn default() -> Self {
		Self::new()
	}
}

struct CompositeEvents {
	status: Option<Box<StatusFn>>,
	log: Option<Box<LogFn>>,
}

impl SyncEvents for CompositeEvents {
	fn on_status(&self, event: StatusEvent) {
		if let Some(ref callback) = self.status {
			callback(event);
		}
	}

	fn on_log(&self, entry: SyncLogEntry) {
		if let Some(ref callback) = self.log {
			callback(entry);
		}
	}
}

/// Engine-side front of a sink.
///
/// Stamps log entries with the current time and mirrors them to tracing
/// before handing them on.
#[derive(Clone)]
pub struct Emitter {
	sink: Arc<dyn SyncEvents>,
}

impl Emitter {
	pub fn new(sink: Arc<dyn SyncEvents>) -> Self {
		Emitter { sink }
	}

	pub fn log(&self, mut entry: SyncLogEntry) {
		if entry.timestamp.is_empty() {
			entry.timestamp = chrono::Local::now().to_rfc3339();
		}
		match entry.status {
			LogOutcome::Error => {
				warn!(rule = %entry.rule_id, path = %entry.file_path, "{}", entry.message)
			}
			_ if entry.file_path.is_empty() => info!(rule = %entry.rule_id, "{}", entry.message),
			_ => info!(
				rule = %entry.rule_id,
				path = %entry.file_path,
				action = %entry.action,
				"{}",
				entry.message
			),
		}
		self.sink.on_log(entry);
	}

	pub fn status(&self, event: StatusEvent) {
		debug!(rule = %event.rule_id, status = %event.status, detail = %event.detail, "Status changed");
		self.sink.on_status(event);
	}
}

/// Notification forwarded through [`ChannelEvents`]
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
	Status(StatusEvent),
	Log(SyncLogEntry),
}

/// Forwards notifications into an unbounded channel
pub struct ChannelEvents {
	tx: mpsc::UnboundedSender<EngineEvent>,
}

impl ChannelEvents {
	pub fn new() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(ChannelEvents { tx }, rx)
	}
}

impl SyncEvents for ChannelEvents {
	fn on_status(&self, event: StatusEvent) {
		// Receiver gone means nobody is listening any more
		let _ = self.tx.send(EngineEvent::Status(event));
	}

	fn on_log(&self, entry: SyncLogEntry) {
		let _ = self.tx.send(EngineEvent::Log(entry));
	}
}

/// Keeps the most recent log entries and status events, oldest evicted first
pub struct LogRing {
	capacity: usize,
	logs: Mutex<VecDeque<SyncLogEntry>>,
	statuses: Mutex<VecDeque<StatusEvent>>,
}

impl LogRing {
	pub fn new(capacity: usize) -> Self {
		LogRing {
			capacity: capacity.max(1),
			logs: Mutex::new(VecDeque::new()),
			statuses: Mutex::new(VecDeque::new()),
		}
	}

	/// Copy of buffered log entries, oldest first
	pub fn logs(&self) -> Vec<SyncLogEntry> {
		self.logs.lock().unwrap_or_else(|e| e.into_inner()).iter().cloned().collect()
	}

	/// Copy of buffered log entries for one rule
	pub fn logs_for(&self, rule_id: &str) -> Vec<SyncLogEntry> {
		self.logs().into_iter().filter(|e| e.rule_id == rule_id).collect()
	}

	/// Copy of buffered status events, oldest first
	pub fn statuses(&self) -> Vec<StatusEvent> {
		self.statuses.lock().unwrap_or_else(|e| e.into_inner()).iter().cloned().collect()
	}

	pub fn clear(&self) {
		self.logs.lock().unwrap_or_else(|e| e.into_inner()).clear();
		self.statuses.lock().unwrap_or_else(|e| e.into_inner()).clear();
	}

	fn push<T>(&self, queue: &Mutex<VecDeque<T>>, item: T) {
		let mut queue = queue.lock().unwrap_or_else(|e| e.into_inner());
		while queue.len() >= self.capacity {
			queue.pop_front();
		}
		queue.push_back(item);
	}
}

impl SyncEvents for LogRing {
	fn on_status(&self, event: StatusEvent) {
		self.push(&self.statuses, event);
	}

	fn on_log(&self, entry: SyncLogEntry) {
		self.push(&self.logs, entry);
	}
}


// vim: ts=4
