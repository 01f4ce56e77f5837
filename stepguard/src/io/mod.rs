//! I/O helpers for the hooks: paths, config, state documents, audit log.

pub mod config;
pub mod decision_log;
pub mod paths;
pub mod state_store;
