use thiserror::Error;
use uuid::Uuid;

/// Errors from store operations (used by the `Store` trait in ccp-core).
///
/// `NotFound` is the sentinel callers recover from when a default applies,
/// e.g. a unit variable that was never set.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("object not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

/// Errors raised while loading or validating a workflow document.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("invalid workflow document: {0}")]
    Parse(String),

    #[error("chain {chain} starts at unknown link {link}")]
    UnknownStartLink { chain: Uuid, link: Uuid },

    #[error("link {from} references unknown link {to}")]
    UnknownLink { from: Uuid, to: Uuid },

    #[error("watched directory {path:?} references unknown chain {chain}")]
    UnknownWatchedChain { path: String, chain: Uuid },
}
