//! Shared domain types for ccp.
//!
//! This crate contains the types exchanged between the controller core, its
//! infrastructure adapters and the server: the workflow document, package and
//! job records, decision summaries, configuration and error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod decision;
pub mod error;
pub mod package;
pub mod store;
pub mod workflow;
