//! Per-package workflow state machine.
//!
//! A `JobIterator` walks one package through the workflow document. The
//! cursor points either at a chain (start a fresh chain context) or at a link
//! (build and run its job). Each call to [`JobIterator::next`] advances one
//! node and reports a [`Step`]:
//!
//! - `Continue`: call `next` again.
//! - `Await(decision)`: the package waits on a decision; resolve it, then
//!   [`JobIterator::resume`] with the decision's next link.
//! - `Done`: a terminal link ended its chain; the package is marked Done.
//! - `Suspended`: a non-terminal link ended its chain; processing continues
//!   when the package shows up in a watched directory again.

use std::sync::Arc;

use ccp_types::error::StoreError;
use ccp_types::package::PackageStatus;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::chain::Chain;
use crate::decision::Decision;
use crate::job::{Job, JobError, JobOutcome, Services};
use crate::package::Package;
use crate::repository::Store;

#[derive(Debug, Error)]
pub enum IteratorError {
    #[error("iterator cancelled")]
    Cancelled,

    #[error("can't process a job without a chain")]
    MissingChain,

    #[error("link not found in workflow document: {0}")]
    LinkNotFound(Uuid),

    #[error("mark package as processing: {0}")]
    MarkProcessing(#[source] StoreError),

    #[error("load context: {0}")]
    LoadContext(#[source] StoreError),

    #[error("build job for link {link_id}: {source}")]
    BuildJob {
        link_id: Uuid,
        #[source]
        source: JobError,
    },

    #[error("exec job for link {link_id} with manager {manager} ({description}): {source}")]
    ExecJob {
        link_id: Uuid,
        manager: String,
        description: String,
        #[source]
        source: JobError,
    },
}

impl IteratorError {
    /// The job error underneath, to test against its sentinels.
    pub fn job_error(&self) -> Option<&JobError> {
        match self {
            IteratorError::BuildJob { source, .. } | IteratorError::ExecJob { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Result of one iteration.
#[derive(Debug)]
pub enum Step {
    Continue,
    Await(Arc<Decision>),
    Done,
    Suspended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Uninitialized,
    /// A chain or link id.
    Node(Uuid),
    /// The last link had no successor; `terminal` is that link's end flag.
    EndOfChain { terminal: bool },
}

pub struct JobIterator<S: Store> {
    services: Services<S>,
    pkg: Package,
    cursor: Cursor,
    chain: Option<Chain>,
    /// End flag of the link whose decision is pending.
    awaiting_terminal: bool,
    cancel: CancellationToken,
}

impl<S: Store + 'static> JobIterator<S> {
    pub fn new(services: Services<S>, pkg: Package, cancel: CancellationToken) -> Self {
        Self {
            services,
            pkg,
            cursor: Cursor::Uninitialized,
            chain: None,
            awaiting_terminal: false,
            cancel,
        }
    }

    pub fn package(&self) -> &Package {
        &self.pkg
    }

    /// Continue after a decision resolved to `next`.
    pub fn resume(&mut self, next: Option<Uuid>) {
        self.cursor = match next {
            Some(id) => Cursor::Node(id),
            None => Cursor::EndOfChain {
                terminal: self.awaiting_terminal,
            },
        };
    }

    /// Iterate until the package waits, stops or fails.
    pub async fn run(&mut self) -> Result<Step, IteratorError> {
        loop {
            match self.next().await? {
                Step::Continue => continue,
                step => return Ok(step),
            }
        }
    }

    pub async fn next(&mut self) -> Result<Step, IteratorError> {
        if self.cancel.is_cancelled() {
            return Err(IteratorError::Cancelled);
        }

        match self.step().await {
            Err(IteratorError::Cancelled) => Err(IteratorError::Cancelled),
            Err(e) => {
                if let Err(mark_err) = self.pkg.mark_as(self.services.store.as_ref(), PackageStatus::Failed).await {
                    tracing::error!(package_id = %self.pkg.id(), error = %mark_err, "failed to mark the package as failed");
                }
                Err(e)
            }
            ok => ok,
        }
    }

    async fn init(&mut self) -> Result<Uuid, IteratorError> {
        tracing::info!(package_id = %self.pkg.id(), package_type = %self.pkg.package_type(), "init iterator");

        self.pkg
            .mark_as(self.services.store.as_ref(), PackageStatus::Processing)
            .await
            .map_err(IteratorError::MarkProcessing)?;

        self.pkg
            .start_at_chain()
            .filter(|id| self.services.workflow.chain(id).is_some())
            .ok_or(IteratorError::MissingChain)
    }

    async fn step(&mut self) -> Result<Step, IteratorError> {
        let node = match self.cursor {
            Cursor::Uninitialized => self.init().await?,
            Cursor::Node(id) => id,
            Cursor::EndOfChain { terminal } => return Ok(self.end_of_chain(terminal).await),
        };

        let workflow = Arc::clone(&self.services.workflow);

        if let Some(definition) = workflow.chain(&node) {
            tracing::info!(package_id = %self.pkg.id(), chain_id = %definition.id, description = %definition.description, "starting new chain");
            let mut chain = Chain::new(definition.clone());
            chain
                .load(self.services.store.as_ref(), &self.pkg)
                .await
                .map_err(IteratorError::LoadContext)?;
            self.chain = Some(chain);

            let start = match self.pkg.start_at_link() {
                Some(link_id) if self.pkg.start_at_chain() == Some(definition.id) => link_id,
                _ => definition.link_id,
            };
            self.cursor = Cursor::Node(start);
            return Ok(Step::Continue);
        }

        let Some(chain) = self.chain.as_mut() else {
            return Err(IteratorError::MissingChain);
        };
        let link = workflow.link(&node).ok_or(IteratorError::LinkNotFound(node))?;

        let job = Job::new(self.services.clone(), link).map_err(|source| IteratorError::BuildJob {
            link_id: link.id,
            source,
        })?;
        let result = job.exec(&mut self.pkg, chain, &self.cancel).await;
        tracing::info!(
            package_id = %self.pkg.id(),
            job_id = %job.id(),
            link_id = %link.id,
            description = %link.description,
            ok = result.is_ok(),
            "job executed"
        );

        match result {
            Ok(JobOutcome::Next(next)) => {
                self.cursor = Cursor::Node(next);
                Ok(Step::Continue)
            }
            Ok(JobOutcome::EndOfChain) => Ok(self.end_of_chain(link.end).await),
            Ok(JobOutcome::Await(decision)) => {
                self.awaiting_terminal = link.end;
                Ok(Step::Await(decision))
            }
            Err(e) if e.is_cancelled() => Err(IteratorError::Cancelled),
            Err(source) => Err(IteratorError::ExecJob {
                link_id: link.id,
                manager: link.manager().to_string(),
                description: link.description.to_string(),
                source,
            }),
        }
    }

    async fn end_of_chain(&mut self, terminal: bool) -> Step {
        self.cursor = Cursor::EndOfChain { terminal };
        if !terminal {
            tracing::info!(package_id = %self.pkg.id(), "chain ended on a non-terminal link, suspending");
            return Step::Suspended;
        }
        if let Err(e) = self.pkg.mark_as(self.services.store.as_ref(), PackageStatus::Done).await {
            tracing::error!(package_id = %self.pkg.id(), error = %e, "failed to mark the package as done");
        }
        tracing::info!(package_id = %self.pkg.id(), "package done");
        Step::Done
    }
}

#[cfg(test)]
mod tests {
    use ccp_types::package::JobStatus;
    use ccp_types::workflow::{
        ChainChoiceConfig, ExitCode, Link, LinkConfig, SetUnitVariableConfig, StandardTaskConfig,
        UnitVariableLinkPullConfig,
    };

    use super::*;
    use crate::testing::{self, MemoryStore, ScriptedWorkerPool, link, workflow};

    fn pull(default: Option<Uuid>, end: bool) -> Link {
        let mut l = link(LinkConfig::UnitVariableLinkPull(UnitVariableLinkPullConfig {
            manager: "linkTaskManagerUnitVariableLinkPull".to_string(),
            variable: "unset".to_string(),
            link_id: default,
        }));
        l.end = end;
        l
    }

    fn iterator(
        store: &Arc<MemoryStore>,
        chains: Vec<ccp_types::workflow::Chain>,
        links: Vec<Link>,
        start: Uuid,
    ) -> JobIterator<MemoryStore> {
        let services = Services::new(
            store.clone(),
            Arc::new(workflow(chains, links)),
            Arc::new(ScriptedWorkerPool::exit_code(0)),
        );
        let mut pkg = store.sip_package("/shared/", "/shared/currentlyProcessing/sip/");
        pkg.set_start_at(start, None);
        JobIterator::new(services, pkg, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_terminal_link_marks_done() {
        let store = Arc::new(MemoryStore::new());
        let last = pull(None, true);
        let first = pull(Some(last.id), false);
        let chain = testing::chain(first.id);

        let mut iter = iterator(&store, vec![chain.clone()], vec![first, last], chain.id);
        assert!(matches!(iter.run().await.unwrap(), Step::Done));
        assert_eq!(store.package_status(iter.package().id()), Some(PackageStatus::Done));
        assert_eq!(store.jobs().len(), 2);
    }

    #[tokio::test]
    async fn test_non_terminal_end_suspends() {
        let store = Arc::new(MemoryStore::new());
        let only = pull(None, false);
        let chain = testing::chain(only.id);

        let mut iter = iterator(&store, vec![chain.clone()], vec![only], chain.id);
        assert!(matches!(iter.run().await.unwrap(), Step::Suspended));
        assert_eq!(store.package_status(iter.package().id()), Some(PackageStatus::Processing));
    }

    #[tokio::test]
    async fn test_missing_start_chain() {
        let store = Arc::new(MemoryStore::new());
        let mut iter = iterator(&store, vec![], vec![], Uuid::now_v7());
        let err = iter.run().await.unwrap_err();
        assert!(matches!(err, IteratorError::MissingChain));
        assert_eq!(store.package_status(iter.package().id()), Some(PackageStatus::Failed));
    }

    #[tokio::test]
    async fn test_missing_link_fails_package() {
        let store = Arc::new(MemoryStore::new());
        let dangling = Uuid::now_v7();
        let first = pull(Some(dangling), false);
        let chain = testing::chain(first.id);

        let mut iter = iterator(&store, vec![chain.clone()], vec![first], chain.id);
        let err = iter.run().await.unwrap_err();
        assert!(matches!(err, IteratorError::LinkNotFound(id) if id == dangling));
        assert_eq!(store.package_status(iter.package().id()), Some(PackageStatus::Failed));
    }

    #[tokio::test]
    async fn test_job_error_is_wrapped_with_link() {
        let store = Arc::new(MemoryStore::new());
        let bad = link(LinkConfig::StandardTask(StandardTaskConfig {
            manager: "linkTaskManagerSplit".to_string(),
            ..Default::default()
        }));
        let chain = testing::chain(bad.id);

        let mut iter = iterator(&store, vec![chain.clone()], vec![bad.clone()], chain.id);
        let err = iter.run().await.unwrap_err();
        assert!(matches!(err.job_error(), Some(JobError::UnknownManager(_))));
        assert!(err.to_string().contains(&bad.id.to_string()));
        assert_eq!(store.package_status(iter.package().id()), Some(PackageStatus::Failed));
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_next_job() {
        let store = Arc::new(MemoryStore::new());
        let only = pull(None, true);
        let chain = testing::chain(only.id);
        let mut iter = iterator(&store, vec![chain.clone()], vec![only], chain.id);

        assert!(matches!(iter.next().await.unwrap(), Step::Continue));
        iter.cancel.cancel();
        assert!(matches!(iter.next().await, Err(IteratorError::Cancelled)));
        assert!(store.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_start_link_override_applies_to_start_chain() {
        let store = Arc::new(MemoryStore::new());
        let skipped = pull(None, false);
        let bypass = pull(None, true);
        let chain = testing::chain(skipped.id);

        let mut iter = iterator(&store, vec![chain.clone()], vec![skipped, bypass.clone()], chain.id);
        iter.pkg.set_start_at(chain.id, Some(bypass.id));
        assert!(matches!(iter.run().await.unwrap(), Step::Done));
        let jobs = store.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].link_id, bypass.id);
    }

    #[tokio::test]
    async fn test_await_and_resume_into_next_chain() {
        let store = Arc::new(MemoryStore::new());
        let done = pull(None, true);
        let next_chain = testing::chain(done.id);
        let mut choice = link(LinkConfig::ChainChoice(ChainChoiceConfig {
            manager: "linkTaskManagerChoice".to_string(),
            chain_choices: vec![next_chain.id],
        }));
        choice.exit_codes.insert(
            0,
            ExitCode {
                job_status: JobStatus::CompletedSuccessfully,
                link_id: None,
            },
        );
        let setter = link(LinkConfig::SetUnitVariable(SetUnitVariableConfig {
            manager: "linkTaskManagerSetUnitVariable".to_string(),
            variable: "resume".to_string(),
            link_id: choice.id,
        }));
        let start = testing::chain(setter.id);

        let mut iter = iterator(
            &store,
            vec![start.clone(), next_chain.clone()],
            vec![setter, choice, done],
            start.id,
        );
        let Step::Await(decision) = iter.run().await.unwrap() else {
            panic!("expected a decision");
        };
        decision.resolve(0).unwrap();
        let next = decision.wait(&CancellationToken::new()).await.unwrap();
        assert_eq!(next, Some(next_chain.id));

        iter.resume(next);
        assert!(matches!(iter.run().await.unwrap(), Step::Done));
        assert_eq!(store.package_status(iter.package().id()), Some(PackageStatus::Done));
    }
}
