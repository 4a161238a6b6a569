//! Infrastructure adapters for ccp.
//!
//! Implements the ports defined in `ccp-core` against real resources:
//! SQLite for the `Store`, local subprocesses for the `WorkerPool`, and the
//! filesystem for configuration, workflow documents and watched directories.

pub mod config;
pub mod sqlite;
pub mod watcher;
pub mod worker;
pub mod workflow;
