//! Local jobs: persist or recall a link id in a package variable.

use ccp_types::workflow::{SetUnitVariableConfig, UnitVariableLinkPullConfig};

use super::{Job, JobError, JobOutcome};
use crate::package::Package;
use crate::repository::Store;

impl<S: Store + 'static> Job<S> {
    pub(super) async fn set_unit_variable(
        &self,
        pkg: &Package,
        config: &SetUnitVariableConfig,
    ) -> Result<JobOutcome, JobError> {
        pkg.save_link_id(self.services.store.as_ref(), &config.variable, config.link_id)
            .await?;

        let next = self.link.exit_code_link_id(0).unwrap_or(config.link_id);
        Ok(JobOutcome::Next(next))
    }

    pub(super) async fn get_unit_variable(
        &self,
        pkg: &Package,
        config: &UnitVariableLinkPullConfig,
    ) -> Result<JobOutcome, JobError> {
        let stored = match self
            .services
            .store
            .read_unit_link_id(pkg.id(), pkg.package_type(), &config.variable)
            .await
        {
            Ok(link_id) => link_id,
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };

        if stored.is_none() {
            tracing::debug!(
                job_id = %self.id,
                variable = %config.variable,
                "unit variable not set, using default link"
            );
        }
        Ok(JobOutcome::from_link(stored.or(config.link_id)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ccp_types::workflow::{Link, LinkConfig};
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    use super::*;
    use crate::chain::Chain;
    use crate::job::Services;
    use crate::testing::{self, MemoryStore, ScriptedWorkerPool, link, workflow};

    const VARIABLE: &str = "reNormalize";

    fn set_link(target: Uuid) -> Link {
        link(LinkConfig::SetUnitVariable(SetUnitVariableConfig {
            manager: "linkTaskManagerSetUnitVariable".to_string(),
            variable: VARIABLE.to_string(),
            link_id: target,
        }))
    }

    fn pull_link(default: Option<Uuid>) -> Link {
        link(LinkConfig::UnitVariableLinkPull(UnitVariableLinkPullConfig {
            manager: "linkTaskManagerUnitVariableLinkPull".to_string(),
            variable: VARIABLE.to_string(),
            link_id: default,
        }))
    }

    async fn run(store: &Arc<MemoryStore>, pkg: &mut Package, l: &Link) -> JobOutcome {
        let services = Services::new(
            store.clone(),
            Arc::new(workflow(vec![], vec![l.clone()])),
            Arc::new(ScriptedWorkerPool::exit_code(0)),
        );
        let mut chain = Chain::new(testing::chain(l.id));
        Job::new(services, l)
            .unwrap()
            .exec(pkg, &mut chain, &CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_set_then_get_round_trips_link() {
        let store = Arc::new(MemoryStore::new());
        let mut pkg = store.sip_package("/shared/", "/shared/sip/");
        let target = Uuid::now_v7();

        let outcome = run(&store, &mut pkg, &set_link(target)).await;
        assert!(matches!(outcome, JobOutcome::Next(id) if id == target));

        let outcome = run(&store, &mut pkg, &pull_link(Some(Uuid::now_v7()))).await;
        assert!(matches!(outcome, JobOutcome::Next(id) if id == target));
    }

    #[tokio::test]
    async fn test_set_prefers_exit_code_link() {
        let store = Arc::new(MemoryStore::new());
        let mut pkg = store.sip_package("/shared/", "/shared/sip/");
        let next = Uuid::now_v7();
        let mut l = set_link(Uuid::now_v7());
        l.fallback_link_id = Some(next);

        let outcome = run(&store, &mut pkg, &l).await;
        assert!(matches!(outcome, JobOutcome::Next(id) if id == next));
    }

    #[tokio::test]
    async fn test_get_falls_back_to_default() {
        let store = Arc::new(MemoryStore::new());
        let mut pkg = store.sip_package("/shared/", "/shared/sip/");
        let default = Uuid::now_v7();

        let outcome = run(&store, &mut pkg, &pull_link(Some(default))).await;
        assert!(matches!(outcome, JobOutcome::Next(id) if id == default));

        let outcome = run(&store, &mut pkg, &pull_link(None)).await;
        assert!(matches!(outcome, JobOutcome::EndOfChain));
    }
}
