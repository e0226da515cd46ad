//! Host registry lookups

use crate::config::{Config, HostEntry};

/// Resolves rule host identifiers to connection parameters
pub trait HostRegistry: Send + Sync {
	fn resolve(&self, host_id: &str) -> Option<HostEntry>;

	/// Every known entry, for listing
	fn entries(&self) -> Vec<HostEntry>;
}

/// Registry backed by the `hosts` list of the configuration
#[derive(Debug, Clone, Default)]
pub struct ConfigHosts {
	hosts: Vec<HostEntry>,
	allow_unlisted: bool,
}

impl ConfigHosts {
	pub fn new(hosts: Vec<HostEntry>, allow_unlisted: bool) -> Self {
		ConfigHosts { hosts, allow_unlisted }
	}

	pub fn from_config(config: &Config) -> Self {
		Self::new(config.hosts.clone(), config.ssh.allow_unlisted_hosts)
	}
}

impl HostRegistry for ConfigHosts {
	fn resolve(&self, host_id: &str) -> Option<HostEntry> {
		if host_id.is_empty() {
			return None;
		}
		if let Some(entry) = self.hosts.iter().find(|h| h.host == host_id) {
			return Some(entry.clone());
		}
		// Defer to ~/.ssh/config for unknown aliases
		if self.allow_unlisted {
			return Some(HostEntry::alias(host_id));
		}
		None
	}

	fn entries(&self) -> Vec<HostEntry> {
		self.hosts.clone()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn registry(allow_unlisted: bool) -> ConfigHosts {
		ConfigHosts::new(
			vec![HostEntry {
				host: "web".into(),
				hostname: "10.0.0.5".into(),
				user: "deploy".into(),
				..Default::default()
			}],
			allow_unlisted,
		)
	}

	#[test]
	fn test_resolve_listed() {
		let entry = registry(false).resolve("web").unwrap();
		assert_eq!(entry.destination(), "deploy@10.0.0.5");
	}

	#[test]
	fn test_unlisted_rejected_by_default() {
		assert!(registry(false).resolve("db").is_none());
		assert!(registry(false).resolve("").is_none());
	}

	#[test]
	fn test_unlisted_alias_when_allowed() {
		let entry = registry(true).resolve("db").unwrap();
		assert_eq!(entry.destination(), "db");
		assert!(registry(true).resolve("").is_none());
	}
}

// vim: ts=4
