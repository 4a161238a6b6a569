//! SQLite storage layer.
//!
//! `SqliteStore` implements the core `Store` trait on top of a WAL-mode
//! database with split read/write connection pools.

pub mod pool;
pub mod store;

pub use pool::DatabasePool;
pub use store::SqliteStore;
