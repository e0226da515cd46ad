//! Change detection on both sides of a rule

pub mod debounce;
pub mod filter;
pub mod local;
pub mod remote;

pub use debounce::Debouncer;
pub use filter::NameFilter;
pub use local::{start_local_watcher, LocalWatch};
pub use remote::{spawn_remote_watcher, RemoteWatch};

// vim: ts=4
