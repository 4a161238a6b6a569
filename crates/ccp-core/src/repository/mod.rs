//! Storage ports.
//!
//! The core never talks to a database directly. `Store` is implemented by
//! the infrastructure layer (ccp-infra) and by an in-memory double in tests.

pub mod store;

pub use store::Store;
