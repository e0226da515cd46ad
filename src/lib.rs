//! # remsync - Continuous local <-> remote directory mirroring over SSH
//!
//! remsync keeps a local directory and a directory on an SSH host in step.
//! Each sync rule names one authoritative side; its content wins every full
//! pass. After an initial pass, watchers on both sides trigger debounced
//! follow-up passes until the rule is stopped.
//!
//! A pass uses rsync when both ends have it and falls back to a
//! snapshot-diff over the shell session otherwise. Remote changes arrive
//! through a streaming notification tool (inotifywait) when available, or
//! by polling remote snapshots.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use remsync::{callbacks::LogRing, Config, RuleSpec, SyncManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let events = Arc::new(LogRing::new(200));
//!     let manager = SyncManager::with_ssh(Config::load(None)?, events.clone())?;
//!     let rule = manager.add_rule(RuleSpec {
//!         ssh_host: "web".into(),
//!         remote_path: "~/site".into(),
//!         local_path: "/home/me/site".into(),
//!         source: "local".into(),
//!         ..Default::default()
//!     })?;
//!     manager.start(&rule.id).await?;
//!     tokio::signal::ctrl_c().await?;
//!     manager.stop_all().await;
//!     Ok(())
//! }
//! ```

pub mod callbacks;
pub mod config;
pub mod error;
pub mod full_sync;
pub mod guard;
pub mod hosts;
pub mod logging;
pub mod manager;
pub mod probe;
pub mod remote;
mod runtime;
pub mod snapshot;
pub mod state;
pub mod transfer;
pub mod types;
pub mod watch;

// Re-export commonly used types and functions
pub use callbacks::{CallbackBuilder, SyncEvents};
pub use config::{Config, HostEntry};
pub use error::{ConnectionError, StateError, SyncError};
pub use manager::SyncManager;
pub use types::{
	Direction, LogAction, LogOutcome, RemoteDepsStatus, RuleSpec, StatusEvent, SyncLogEntry, SyncRule,
	SyncSource, SyncStatus,
};

// vim: ts=4
