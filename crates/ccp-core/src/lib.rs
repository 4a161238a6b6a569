//! Workflow controller core for ccp.
//!
//! This crate walks packages (Transfers, SIPs and DIPs) through the workflow
//! document: the controller admits packages, a job iterator per package
//! executes links as jobs, client-script jobs batch their tasks for the
//! worker pool, and decision points suspend a package until someone picks a
//! choice.
//!
//! Persistence and the worker pool are ports (`repository::Store`,
//! `worker::WorkerPool`) implemented by `ccp-infra`. This crate depends only
//! on `ccp-types` plus async and filesystem utilities.

pub mod chain;
pub mod controller;
pub mod decision;
pub mod deposit;
pub mod dict_literal;
pub mod iterator;
pub mod job;
pub mod package;
pub mod processing;
pub mod replacement;
pub mod repository;
pub mod task;
pub mod transfer;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;
