//! Application state wiring the controller to its infrastructure.
//!
//! The controller is generic over the `Store` trait; `AppState` pins it to
//! the SQLite implementation and the subprocess worker pool.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use ccp_core::controller::{Controller, ControllerConfig};
use ccp_core::job::Services;
use ccp_core::processing::{self, BUILTIN_CONFIGS_DIR};
use ccp_core::worker::WorkerPool;
use ccp_infra::sqlite::pool::default_database_url;
use ccp_infra::sqlite::{DatabasePool, SqliteStore};
use ccp_infra::worker::SubprocessWorkerPool;
use ccp_infra::workflow::load_workflow;
use ccp_types::config::ServerConfig;
use ccp_types::workflow::Document;

pub type ConcreteController = Controller<SqliteStore>;

/// Shared state handed to every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub controller: ConcreteController,
    pub workflow: Arc<Document>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Open the database, load the workflow and build the controller.
    pub async fn init(config: ServerConfig) -> anyhow::Result<Self> {
        let workflow_path: PathBuf = config
            .workflow
            .clone()
            .context("no workflow document configured (set `workflow` or --workflow)")?;
        let workflow = Arc::new(load_workflow(&workflow_path).await?);
        install_processing_configs(&config).await?;

        let db_url = config.database_url.clone().unwrap_or_else(default_database_url);
        let pool = DatabasePool::open(&db_url)
            .await
            .with_context(|| format!("failed to open database {db_url}"))?;
        let store = SqliteStore::new(pool);
        store.remove_transient_data().await?;

        let workers: Arc<dyn WorkerPool> = Arc::new(SubprocessWorkerPool::new(&config.scripts_dir));
        Ok(Self::with_parts(config, store, workflow, workers))
    }

    /// Build the state from already-opened parts.
    pub fn with_parts(
        config: ServerConfig,
        store: SqliteStore,
        workflow: Arc<Document>,
        workers: Arc<dyn WorkerPool>,
    ) -> Self {
        let services = Services::new(Arc::new(store), Arc::clone(&workflow), workers)
            .with_aliases(config.decision_aliases.clone())
            .with_batch_size(config.batch_size);
        let controller = Controller::new(services, ControllerConfig::from(&config));

        Self {
            controller,
            workflow,
            config: Arc::new(config),
        }
    }
}

/// Install the built-in processing configurations into the shared directory.
pub async fn install_processing_configs(config: &ServerConfig) -> anyhow::Result<PathBuf> {
    let dir = config.shared_dir.join(BUILTIN_CONFIGS_DIR);
    processing::install_builtin_configs(&dir)
        .await
        .with_context(|| format!("failed to install built-in processing configurations in {}", dir.display()))?;
    tracing::info!(path = %dir.display(), "built-in processing configurations installed");
    Ok(dir)
}
