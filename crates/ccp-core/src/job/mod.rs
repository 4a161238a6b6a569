//! Jobs: one execution of a workflow link for one package.
//!
//! The link's manager string selects a [`JobKind`]; the link's typed
//! configuration must match it. Every kind shares the same lifecycle:
//!
//! 1. Reload the package from the store.
//! 2. Persist the job record.
//! 3. Run the kind-specific logic.
//! 4. Record the final status: `AwaitingDecision` when the job suspends,
//!    `CompletedSuccessfully` otherwise. Client jobs record the status the
//!    exit-code table assigns instead.
//!
//! Kinds are implemented in the submodules: decision jobs in [`decision`],
//! client-script jobs in [`client`] and local jobs in [`local`].

pub mod client;
pub mod decision;
pub mod local;

use std::sync::Arc;

use ccp_types::config::DecisionAliases;
use ccp_types::error::StoreError;
use ccp_types::package::JobStatus;
use ccp_types::store::JobRecord;
use ccp_types::workflow::{
    ChainChoiceConfig, Document, Link, LinkConfig, ReplacementDictConfig, SetUnitVariableConfig,
    StandardTaskConfig, UnitVariableLinkPullConfig,
};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::chain::Chain;
use crate::decision::{Decision, DecisionError};
use crate::package::{Package, PackageError};
use crate::repository::Store;
use crate::task::{DEFAULT_BATCH_SIZE, TaskError};
use crate::worker::WorkerPool;

// ---------------------------------------------------------------------------
// Errors and outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum JobError {
    #[error("unknown job manager: {0:?}")]
    UnknownManager(String),

    #[error("config provided is not compatible with its type (manager {manager}, model {model})")]
    ConfigMismatch { manager: String, model: &'static str },

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("package: {0}")]
    Package(#[from] PackageError),

    #[error("tasks: {0}")]
    Task(#[from] TaskError),

    #[error("decision: {0}")]
    Decision(#[from] DecisionError),

    #[error("{0}")]
    InvalidChoice(String),
}

impl JobError {
    /// Whether the underlying cause is the store's not-found sentinel.
    pub fn is_not_found(&self) -> bool {
        match self {
            JobError::Store(e) => e.is_not_found(),
            JobError::Package(e) => e.is_not_found(),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            JobError::Task(TaskError::Cancelled) | JobError::Decision(DecisionError::Cancelled)
        )
    }
}

/// Where the package goes after a job.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// Continue at a link or chain.
    Next(Uuid),
    /// Nothing follows in this chain.
    EndOfChain,
    /// Suspended until the decision resolves.
    Await(Arc<Decision>),
}

impl JobOutcome {
    pub fn from_link(link_id: Option<Uuid>) -> Self {
        match link_id {
            Some(id) => JobOutcome::Next(id),
            None => JobOutcome::EndOfChain,
        }
    }
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

/// Collaborators shared by every job of a controller.
pub struct Services<S: Store> {
    pub store: Arc<S>,
    pub workflow: Arc<Document>,
    pub pool: Arc<dyn WorkerPool>,
    pub aliases: Arc<DecisionAliases>,
    pub batch_size: usize,
}

impl<S: Store> Services<S> {
    pub fn new(store: Arc<S>, workflow: Arc<Document>, pool: Arc<dyn WorkerPool>) -> Self {
        Self {
            store,
            workflow,
            pool,
            aliases: Arc::new(DecisionAliases::default()),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_aliases(mut self, aliases: DecisionAliases) -> Self {
        self.aliases = Arc::new(aliases);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

impl<S: Store> Clone for Services<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            workflow: Arc::clone(&self.workflow),
            pool: Arc::clone(&self.pool),
            aliases: Arc::clone(&self.aliases),
            batch_size: self.batch_size,
        }
    }
}

// ---------------------------------------------------------------------------
// JobKind
// ---------------------------------------------------------------------------

/// Every job type, with the configuration it runs on.
#[derive(Debug, Clone)]
pub enum JobKind {
    /// `linkTaskManagerChoice`
    NextChainDecision(ChainChoiceConfig),
    /// `linkTaskManagerReplacementDicFromChoice`
    UpdateContextDecision(ReplacementDictConfig),
    /// `linkTaskManagerGetUserChoiceFromMicroserviceGeneratedList`
    OutputDecision(StandardTaskConfig),
    /// `linkTaskManagerDirectories`
    DirectoryClient(StandardTaskConfig),
    /// `linkTaskManagerFiles`
    FilesClient(StandardTaskConfig),
    /// `linkTaskManagerGetMicroserviceGeneratedListInStdOut`
    OutputClient(StandardTaskConfig),
    /// `linkTaskManagerSetUnitVariable`
    SetUnitVariable(SetUnitVariableConfig),
    /// `linkTaskManagerUnitVariableLinkPull`
    GetUnitVariable(UnitVariableLinkPullConfig),
}

impl JobKind {
    /// Select the kind for `link`, checking its configuration shape.
    pub fn from_link(link: &Link) -> Result<Self, JobError> {
        let manager = link.manager();
        let mismatch = || JobError::ConfigMismatch {
            manager: manager.to_string(),
            model: link.config.model(),
        };

        match manager {
            "linkTaskManagerChoice" => match &link.config {
                LinkConfig::ChainChoice(c) => Ok(JobKind::NextChainDecision(c.clone())),
                _ => Err(mismatch()),
            },
            "linkTaskManagerReplacementDicFromChoice" => match &link.config {
                LinkConfig::ReplacementDict(c) => Ok(JobKind::UpdateContextDecision(c.clone())),
                _ => Err(mismatch()),
            },
            "linkTaskManagerGetUserChoiceFromMicroserviceGeneratedList" => match &link.config {
                LinkConfig::StandardTask(c) => Ok(JobKind::OutputDecision(c.clone())),
                _ => Err(mismatch()),
            },
            "linkTaskManagerDirectories" => match &link.config {
                LinkConfig::StandardTask(c) => Ok(JobKind::DirectoryClient(c.clone())),
                _ => Err(mismatch()),
            },
            "linkTaskManagerFiles" => match &link.config {
                LinkConfig::StandardTask(c) => Ok(JobKind::FilesClient(c.clone())),
                _ => Err(mismatch()),
            },
            "linkTaskManagerGetMicroserviceGeneratedListInStdOut" => match &link.config {
                LinkConfig::StandardTask(c) => Ok(JobKind::OutputClient(c.clone())),
                _ => Err(mismatch()),
            },
            "linkTaskManagerSetUnitVariable" => match &link.config {
                LinkConfig::SetUnitVariable(c) => Ok(JobKind::SetUnitVariable(c.clone())),
                _ => Err(mismatch()),
            },
            "linkTaskManagerUnitVariableLinkPull" => match &link.config {
                LinkConfig::UnitVariableLinkPull(c) => Ok(JobKind::GetUnitVariable(c.clone())),
                _ => Err(mismatch()),
            },
            other => Err(JobError::UnknownManager(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobKind::NextChainDecision(_) => "next_chain_decision",
            JobKind::UpdateContextDecision(_) => "update_context_decision",
            JobKind::OutputDecision(_) => "output_decision",
            JobKind::DirectoryClient(_) => "directory_client",
            JobKind::FilesClient(_) => "files_client",
            JobKind::OutputClient(_) => "output_client",
            JobKind::SetUnitVariable(_) => "set_unit_variable",
            JobKind::GetUnitVariable(_) => "get_unit_variable",
        }
    }

    /// Client jobs record the status mapped to their exit code themselves.
    fn records_own_status(&self) -> bool {
        matches!(
            self,
            JobKind::DirectoryClient(_) | JobKind::FilesClient(_) | JobKind::OutputClient(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

pub struct Job<S: Store> {
    id: Uuid,
    created_at: DateTime<Utc>,
    link: Link,
    kind: JobKind,
    services: Services<S>,
}

impl<S: Store + 'static> Job<S> {
    pub fn new(services: Services<S>, link: &Link) -> Result<Self, JobError> {
        let kind = JobKind::from_link(link)?;
        Ok(Self {
            id: Uuid::now_v7(),
            created_at: Utc::now(),
            link: link.clone(),
            kind,
            services,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> &JobKind {
        &self.kind
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub async fn exec(
        &self,
        pkg: &mut Package,
        chain: &mut Chain,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, JobError> {
        pkg.reload(self.services.store.as_ref()).await?;
        self.save(pkg).await?;

        tracing::debug!(
            job_id = %self.id,
            package_id = %pkg.id(),
            link_id = %self.link.id,
            kind = self.kind.name(),
            "executing job"
        );

        let result = match &self.kind {
            JobKind::NextChainDecision(config) => self.next_chain_decision(pkg, config).await,
            JobKind::UpdateContextDecision(config) => {
                self.update_context_decision(pkg, chain, config).await
            }
            JobKind::OutputDecision(config) => self.output_decision(pkg, chain, config).await,
            JobKind::DirectoryClient(config) => {
                self.directory_client(pkg, chain, config, cancel).await
            }
            JobKind::FilesClient(config) => self.files_client(pkg, chain, config, cancel).await,
            JobKind::OutputClient(config) => self.output_client(pkg, chain, config, cancel).await,
            JobKind::SetUnitVariable(config) => self.set_unit_variable(pkg, config).await,
            JobKind::GetUnitVariable(config) => self.get_unit_variable(pkg, config).await,
        };

        match &result {
            Ok(JobOutcome::Await(_)) => self.mark(JobStatus::AwaitingDecision).await?,
            Ok(_) if !self.kind.records_own_status() => {
                self.mark(JobStatus::CompletedSuccessfully).await?
            }
            Ok(_) => {}
            Err(e) if e.is_cancelled() => {}
            Err(_) => {
                if let Err(e) = self.mark(JobStatus::Failed).await {
                    tracing::error!(job_id = %self.id, error = %e, "failed to record job failure");
                }
            }
        }

        result
    }

    async fn save(&self, pkg: &Package) -> Result<(), StoreError> {
        self.services
            .store
            .create_job(&JobRecord {
                id: self.id,
                job_type: self.link.description.text().to_string(),
                created_at: self.created_at,
                directory: pkg.path_for_db(),
                package_id: pkg.id(),
                unit_type: pkg.job_unit_type().to_string(),
                current_step: JobStatus::ExecutingCommands.as_str().to_string(),
                microservice_group: self.link.group.text().to_string(),
                link_id: self.link.id,
            })
            .await
    }

    async fn mark(&self, status: JobStatus) -> Result<(), StoreError> {
        self.services.store.update_job_status(self.id, status).await
    }

    /// Record the status the exit-code table maps `code` to.
    async fn mark_exit_code(&self, code: i32) -> Result<(), StoreError> {
        self.mark(self.link.job_status_for(code)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccp_types::package::PackageType;

    use crate::testing::{MemoryStore, ScriptedWorkerPool, link, workflow};

    #[test]
    fn test_unknown_manager() {
        let l = link(LinkConfig::StandardTask(StandardTaskConfig {
            manager: "linkTaskManagerUnknown".to_string(),
            ..Default::default()
        }));
        let err = JobKind::from_link(&l).unwrap_err();
        assert_eq!(err.to_string(), "unknown job manager: \"linkTaskManagerUnknown\"");
    }

    #[test]
    fn test_config_mismatch() {
        let l = link(LinkConfig::StandardTask(StandardTaskConfig {
            manager: "linkTaskManagerChoice".to_string(),
            ..Default::default()
        }));
        let err = JobKind::from_link(&l).unwrap_err();
        assert!(matches!(err, JobError::ConfigMismatch { model: "StandardTaskConfig", .. }));
        assert!(err.to_string().starts_with("config provided is not compatible with its type"));
    }

    #[test]
    fn test_every_manager_selects_a_kind() {
        let cases = [
            ("linkTaskManagerDirectories", "directory_client"),
            ("linkTaskManagerFiles", "files_client"),
            ("linkTaskManagerGetMicroserviceGeneratedListInStdOut", "output_client"),
            ("linkTaskManagerGetUserChoiceFromMicroserviceGeneratedList", "output_decision"),
        ];
        for (manager, kind) in cases {
            let l = link(LinkConfig::StandardTask(StandardTaskConfig {
                manager: manager.to_string(),
                ..Default::default()
            }));
            assert_eq!(JobKind::from_link(&l).unwrap().name(), kind);
        }
    }

    #[tokio::test]
    async fn test_lifecycle_records_job_and_completion() {
        let store = Arc::new(MemoryStore::new());
        let target = Uuid::now_v7();
        let l = link(LinkConfig::SetUnitVariable(SetUnitVariableConfig {
            manager: "linkTaskManagerSetUnitVariable".to_string(),
            variable: "resumeAfterNormalizationFileIdentificationToolSelected".to_string(),
            link_id: target,
        }));
        let services = Services::new(
            store.clone(),
            Arc::new(workflow(vec![], vec![l.clone()])),
            Arc::new(ScriptedWorkerPool::exit_code(0)),
        );
        let mut pkg = store.sip_package("/shared/", "/shared/currentlyProcessing/sip/");
        let mut chain = Chain::new(crate::testing::chain(l.id));

        let job = Job::new(services, &l).unwrap();
        let outcome = job.exec(&mut pkg, &mut chain, &CancellationToken::new()).await.unwrap();

        assert!(matches!(outcome, JobOutcome::Next(id) if id == target));
        let record = store.job(job.id()).unwrap();
        assert_eq!(record.unit_type, "unitSIP");
        assert_eq!(record.link_id, l.id);
        assert_eq!(store.job_status(job.id()), Some(JobStatus::CompletedSuccessfully));
        assert_eq!(pkg.package_type(), PackageType::Sip);
    }
}
