//! Logging prelude module for convenient access to tracing macros.
//!
//! ```ignore
//! use crate::logging::*;
//!
//! info!(rule = %id, "Local file watcher started");
//! ```

pub use tracing::{debug, error, info, warn};

/// Initialize the tracing subscriber with environment filter support.
///
/// `RUST_LOG` wins when set; otherwise `default_level` is used:
///
/// ```bash
/// RUST_LOG=remsync=debug remsync start
/// RUST_LOG=remsync::watch=trace,remsync::full_sync=debug remsync start
/// ```
pub fn init_tracing(default_level: &str) {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
		)
		.with_writer(std::io::stderr)
		.try_init();
}

// vim: ts=4
