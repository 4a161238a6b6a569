//! Workflow document loader.

use std::path::{Path, PathBuf};

use ccp_types::error::WorkflowError;
use ccp_types::workflow::Document;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowLoadError {
    #[error("failed to read workflow {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Invalid(#[from] WorkflowError),
}

/// Read, decode and validate the workflow document at `path`.
pub async fn load_workflow(path: &Path) -> Result<Document, WorkflowLoadError> {
    let blob = tokio::fs::read(path)
        .await
        .map_err(|source| WorkflowLoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    let document = Document::from_json(&blob)?;

    tracing::info!(
        path = %path.display(),
        chains = document.chains.len(),
        links = document.links.len(),
        watched_directories = document.watched_directories.len(),
        "loaded workflow"
    );
    Ok(document)
}
