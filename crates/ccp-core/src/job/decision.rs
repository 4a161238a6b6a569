//! Decision jobs: answer a decision point from the processing configuration
//! or suspend until someone picks a choice.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use ccp_types::package::JobStatus;
use ccp_types::workflow::{ChainChoiceConfig, LinkConfig, ReplacementDictConfig, StandardTaskConfig};
use indexmap::IndexMap;
use uuid::Uuid;

use super::{Job, JobError, JobOutcome};
use crate::chain::{Chain, ChainContext};
use crate::decision::{Choice, Decider, Decision, DecisionError};
use crate::package::Package;
use crate::repository::Store;

/// Wrap dictionary keys as template variables, e.g. `AIPsStore` becomes
/// `%AIPsStore%`.
fn format_keys(items: impl IntoIterator<Item = (String, String)>) -> IndexMap<String, String> {
    items.into_iter().map(|(k, v)| (format!("%{k}%"), v)).collect()
}

impl<S: Store + 'static> Job<S> {
    fn await_decision(&self, pkg: &Package, choices: Vec<Choice>, decider: Box<dyn Decider>) -> JobOutcome {
        tracing::info!(
            job_id = %self.id,
            package_id = %pkg.id(),
            link_id = %self.link.id,
            choices = choices.len(),
            "awaiting decision"
        );
        JobOutcome::Await(Arc::new(Decision::new(
            self.link.description.text(),
            pkg.info(),
            self.id,
            choices,
            decider,
        )))
    }

    // -----------------------------------------------------------------------
    // Next chain
    // -----------------------------------------------------------------------

    pub(super) async fn next_chain_decision(
        &self,
        pkg: &Package,
        config: &ChainChoiceConfig,
    ) -> Result<JobOutcome, JobError> {
        if let Some(chain_id) = pkg.preconfigured_chain(self.link.id).await? {
            if !config.chain_choices.contains(&chain_id) {
                return Err(JobError::InvalidChoice(format!(
                    "choice {chain_id} is not one of the available choices"
                )));
            }
            tracing::debug!(job_id = %self.id, %chain_id, "using preconfigured chain");
            return Ok(JobOutcome::Next(chain_id));
        }

        let workflow = &self.services.workflow;
        let choices = config
            .chain_choices
            .iter()
            .filter_map(|id| workflow.chain(id))
            .filter(|chain| workflow.choice_available(&self.link, chain))
            .map(|chain| Choice::new(chain.description.text(), Some(chain.id)))
            .collect();

        Ok(self.await_decision(
            pkg,
            choices,
            Box::new(CompleteJob {
                store: Arc::clone(&self.services.store),
                job_id: self.id,
            }),
        ))
    }

    // -----------------------------------------------------------------------
    // Update context
    // -----------------------------------------------------------------------

    pub(super) async fn update_context_decision(
        &self,
        pkg: &Package,
        chain: &Chain,
        config: &ReplacementDictConfig,
    ) -> Result<JobOutcome, JobError> {
        let next = self.link.exit_code_link_id(0);

        if config.replacements.is_empty() {
            let dict = self.stored_context().await?;
            if !dict.is_empty() {
                chain.context.update(dict).await;
                return Ok(JobOutcome::from_link(next));
            }
        }

        let dict = self.preconfigured_context(pkg).await?;
        if !dict.is_empty() {
            chain.context.update(dict).await;
            return Ok(JobOutcome::from_link(next));
        }

        let choices = config
            .replacements
            .iter()
            .map(|replacement| {
                let choice = Choice::new(replacement.description.text(), next);
                match replacement.items.first() {
                    Some((k, v)) => choice.with_value(k.as_str(), v.as_str()),
                    None => choice,
                }
            })
            .collect();

        Ok(self.await_decision(
            pkg,
            choices,
            Box::new(SetContextValue {
                store: Arc::clone(&self.services.store),
                job_id: self.id,
                context: chain.context.clone(),
                key: None,
            }),
        ))
    }

    /// Dictionary named after the `execute` of the fallback link, e.g. the
    /// settings of an upload script.
    async fn stored_context(&self) -> Result<IndexMap<String, String>, JobError> {
        let Some(fallback) = self
            .link
            .fallback_link_id
            .and_then(|id| self.services.workflow.link(&id))
        else {
            return Ok(IndexMap::new());
        };
        let LinkConfig::StandardTask(config) = &fallback.config else {
            return Ok(IndexMap::new());
        };
        if config.execute.is_empty() {
            return Ok(IndexMap::new());
        }

        match self.services.store.read_dict(&config.execute).await {
            Ok(dict) => Ok(format_keys(dict)),
            Err(e) if e.is_not_found() => Ok(IndexMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Items of the replacement the processing configuration picks for this
    /// decision point. Aliased decision points and replacements share the
    /// answer given for their canonical id.
    async fn preconfigured_context(&self, pkg: &Package) -> Result<IndexMap<String, String>, JobError> {
        let aliases = &self.services.aliases;
        let canonical = aliases.canonical(self.link.id);
        let config = pkg.processing_config().await?;

        let mut dict = IndexMap::new();
        for choice in config.choices() {
            if choice.link_id() != Some(canonical) {
                continue;
            }
            let desired = choice.chain_id().ok_or_else(|| {
                JobError::InvalidChoice(format!("invalid preconfigured choice: {:?}", choice.value()))
            })?;
            let desired = aliases.canonical(desired);

            let link = self
                .services
                .workflow
                .link(&canonical)
                .ok_or_else(|| JobError::InvalidChoice(format!("desired choice not found: {desired}")))?;
            let LinkConfig::ReplacementDict(replacements) = &link.config else {
                return Err(JobError::InvalidChoice(format!(
                    "desired choice doesn't have the expected type: {desired}"
                )));
            };
            if let Some(replacement) = replacements.replacements.iter().find(|r| r.id == desired) {
                dict = format_keys(replacement.items.clone());
            }
        }
        Ok(dict)
    }

    // -----------------------------------------------------------------------
    // Output decision
    // -----------------------------------------------------------------------

    pub(super) async fn output_decision(
        &self,
        pkg: &Package,
        chain: &Chain,
        config: &StandardTaskConfig,
    ) -> Result<JobOutcome, JobError> {
        let next = self.link.exit_code_link_id(0);

        let preconfigured = pkg.preconfigured_choice(self.link.id).await?;
        if let Some(wanted) = preconfigured.as_ref().map(|c| c.value()) {
            if let Some(choice) = chain.generated_choices.iter().find(|c| c.value.1 == wanted) {
                chain.context.set(config.execute.as_str(), choice.value.1.as_str()).await;
                return Ok(JobOutcome::from_link(next));
            }
        }

        let choices = chain
            .generated_choices
            .iter()
            .cloned()
            .map(|choice| Choice { next_link: next, ..choice })
            .collect();

        Ok(self.await_decision(
            pkg,
            choices,
            Box::new(SetContextValue {
                store: Arc::clone(&self.services.store),
                job_id: self.id,
                context: chain.context.clone(),
                key: Some(config.execute.clone()),
            }),
        ))
    }
}

// ---------------------------------------------------------------------------
// Deciders
// ---------------------------------------------------------------------------

async fn complete<S: Store>(store: &S, job_id: Uuid) -> Result<(), DecisionError> {
    store
        .update_job_status(job_id, JobStatus::CompletedSuccessfully)
        .await
        .map_err(|e| DecisionError::Decide(e.to_string()))
}

/// Marks the job complete; the chosen chain is all the decision carries.
struct CompleteJob<S: Store> {
    store: Arc<S>,
    job_id: Uuid,
}

impl<S: Store + 'static> Decider for CompleteJob<S> {
    fn decide<'a>(
        &'a self,
        _choice: &'a Choice,
    ) -> Pin<Box<dyn Future<Output = Result<(), DecisionError>> + Send + 'a>> {
        Box::pin(complete(self.store.as_ref(), self.job_id))
    }
}

/// Writes the chosen value into the chain context, then marks the job
/// complete.
///
/// With a fixed `key` the choice's value is stored under it. Otherwise the
/// choice carries its own key, wrapped as a template variable.
struct SetContextValue<S: Store> {
    store: Arc<S>,
    job_id: Uuid,
    context: ChainContext,
    key: Option<String>,
}

impl<S: Store + 'static> Decider for SetContextValue<S> {
    fn decide<'a>(
        &'a self,
        choice: &'a Choice,
    ) -> Pin<Box<dyn Future<Output = Result<(), DecisionError>> + Send + 'a>> {
        Box::pin(async move {
            let (key, value) = &choice.value;
            match &self.key {
                Some(fixed) => self.context.set(fixed.as_str(), value.as_str()).await,
                None if !key.is_empty() => self.context.set(format!("%{key}%"), value.as_str()).await,
                None => {}
            }
            complete(self.store.as_ref(), self.job_id).await
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use ccp_types::config::DecisionAliases;
    use ccp_types::workflow::{I18nField, Replacement};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::job::Services;
    use crate::processing::PROCESSING_CONFIG_FILE;
    use crate::testing::{self, MemoryStore, ScriptedWorkerPool, link, workflow};

    struct Fixture {
        store: Arc<MemoryStore>,
        pkg: Package,
        _dir: tempfile::TempDir,
    }

    fn fixture(processing_xml: Option<&str>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        if let Some(xml) = processing_xml {
            std::fs::write(dir.path().join(PROCESSING_CONFIG_FILE), xml).unwrap();
        }
        let store = Arc::new(MemoryStore::new());
        let pkg = store.sip_package("/shared/", &dir.path().to_string_lossy());
        Fixture { store, pkg, _dir: dir }
    }

    fn processing_xml(applies_to: Uuid, go_to_chain: Uuid) -> String {
        format!(
            "<processingMCP><preconfiguredChoices><preconfiguredChoice>\
             <appliesTo>{applies_to}</appliesTo><goToChain>{go_to_chain}</goToChain>\
             </preconfiguredChoice></preconfiguredChoices></processingMCP>"
        )
    }

    fn chain_choice_link(choices: Vec<Uuid>) -> ccp_types::workflow::Link {
        link(LinkConfig::ChainChoice(ChainChoiceConfig {
            manager: "linkTaskManagerChoice".to_string(),
            chain_choices: choices,
        }))
    }

    async fn run(
        fx: &mut Fixture,
        doc: ccp_types::workflow::Document,
        l: &ccp_types::workflow::Link,
        chain: &mut Chain,
        aliases: DecisionAliases,
    ) -> Result<JobOutcome, JobError> {
        let services = Services::new(
            fx.store.clone(),
            Arc::new(doc),
            Arc::new(ScriptedWorkerPool::exit_code(0)),
        )
        .with_aliases(aliases);
        let job = Job::new(services, l)?;
        job.exec(&mut fx.pkg, chain, &CancellationToken::new()).await
    }

    #[tokio::test]
    async fn test_next_chain_offers_available_chains() {
        let mut fx = fixture(None);
        let approve = testing::chain(Uuid::now_v7());
        let mut hidden = testing::chain(Uuid::now_v7());
        hidden.available = false;
        let l = chain_choice_link(vec![approve.id, hidden.id, Uuid::now_v7()]);
        let doc = workflow(vec![approve.clone(), hidden], vec![l.clone()]);
        let mut chain = Chain::new(testing::chain(l.id));

        let outcome = run(&mut fx, doc, &l, &mut chain, DecisionAliases::empty()).await.unwrap();
        let JobOutcome::Await(decision) = outcome else {
            panic!("expected a decision");
        };
        assert_eq!(decision.choices().len(), 1);
        assert_eq!(decision.choices()[0].next_link, Some(approve.id));
        assert_eq!(fx.store.job_status(decision.job_id()), Some(JobStatus::AwaitingDecision));

        decision.resolve(0).unwrap();
        let next = decision.wait(&CancellationToken::new()).await.unwrap();
        assert_eq!(next, Some(approve.id));
        assert_eq!(fx.store.job_status(decision.job_id()), Some(JobStatus::CompletedSuccessfully));
    }

    #[tokio::test]
    async fn test_next_chain_uses_preconfigured_choice() {
        let chain_id = Uuid::now_v7();
        let l = chain_choice_link(vec![chain_id]);
        let mut fx = fixture(Some(&processing_xml(l.id, chain_id)));
        let doc = workflow(vec![testing::chain(Uuid::now_v7())], vec![l.clone()]);
        let mut chain = Chain::new(testing::chain(l.id));

        let outcome = run(&mut fx, doc, &l, &mut chain, DecisionAliases::empty()).await.unwrap();
        assert!(matches!(outcome, JobOutcome::Next(id) if id == chain_id));
    }

    #[tokio::test]
    async fn test_next_chain_falls_back_to_automated_choices() {
        let store_aip: Uuid = "9efab23c-31dc-4cbd-a39d-bb1665460cbe".parse().unwrap();
        let mut l = chain_choice_link(vec![Uuid::now_v7(), store_aip]);
        l.id = "2d32235c-02d4-4686-88a6-96f4d6c7b1c3".parse().unwrap();
        let mut fx = fixture(Some(&processing_xml(Uuid::now_v7(), Uuid::now_v7())));
        let doc = workflow(vec![], vec![l.clone()]);
        let mut chain = Chain::new(testing::chain(l.id));

        let outcome = run(&mut fx, doc, &l, &mut chain, DecisionAliases::empty()).await.unwrap();
        assert!(matches!(outcome, JobOutcome::Next(id) if id == store_aip));
    }

    #[tokio::test]
    async fn test_next_chain_without_processing_config_awaits() {
        let store_aip: Uuid = "9efab23c-31dc-4cbd-a39d-bb1665460cbe".parse().unwrap();
        let mut l = chain_choice_link(vec![store_aip]);
        l.id = "2d32235c-02d4-4686-88a6-96f4d6c7b1c3".parse().unwrap();
        let mut fx = fixture(None);
        let mut target = testing::chain(Uuid::now_v7());
        target.id = store_aip;
        let doc = workflow(vec![target], vec![l.clone()]);
        let mut chain = Chain::new(testing::chain(l.id));

        let outcome = run(&mut fx, doc, &l, &mut chain, DecisionAliases::empty()).await.unwrap();
        let JobOutcome::Await(decision) = outcome else {
            panic!("expected a decision");
        };
        assert_eq!(decision.choices()[0].next_link, Some(store_aip));
    }

    #[tokio::test]
    async fn test_next_chain_rejects_foreign_preconfigured_choice() {
        let l = chain_choice_link(vec![Uuid::now_v7()]);
        let foreign = Uuid::now_v7();
        let mut fx = fixture(Some(&processing_xml(l.id, foreign)));
        let doc = workflow(vec![], vec![l.clone()]);
        let mut chain = Chain::new(testing::chain(l.id));

        let err = run(&mut fx, doc, &l, &mut chain, DecisionAliases::empty()).await.unwrap_err();
        assert_eq!(err.to_string(), format!("choice {foreign} is not one of the available choices"));
    }

    fn replacement_link(id: Uuid, replacements: Vec<Replacement>, next: Uuid) -> ccp_types::workflow::Link {
        let mut l = link(LinkConfig::ReplacementDict(ReplacementDictConfig {
            manager: "linkTaskManagerReplacementDicFromChoice".to_string(),
            replacements,
        }));
        l.id = id;
        l.exit_codes.insert(
            0,
            ccp_types::workflow::ExitCode {
                job_status: JobStatus::CompletedSuccessfully,
                link_id: Some(next),
            },
        );
        l
    }

    fn replacement(id: Uuid, label: &str, key: &str, value: &str) -> Replacement {
        Replacement {
            id,
            description: I18nField::new(label),
            items: IndexMap::from([(key.to_string(), value.to_string())]),
        }
    }

    #[tokio::test]
    async fn test_update_context_alias_resolves_like_canonical() {
        let canonical = Uuid::now_v7();
        let alias = Uuid::now_v7();
        let yes = Uuid::now_v7();
        let yes_alias = Uuid::now_v7();
        let next = Uuid::now_v7();
        let aliases = DecisionAliases(HashMap::from([(alias, canonical), (yes_alias, yes)]));
        let canonical_link = replacement_link(
            canonical,
            vec![replacement(yes, "Yes", "AssignUUIDsToDirectories", "True")],
            next,
        );
        let alias_link = replacement_link(
            alias,
            vec![replacement(yes_alias, "Yes", "AssignUUIDsToDirectories", "True")],
            next,
        );

        for l in [&canonical_link, &alias_link] {
            let mut fx = fixture(Some(&processing_xml(canonical, yes)));
            let doc = workflow(vec![], vec![canonical_link.clone(), alias_link.clone()]);
            let mut chain = Chain::new(testing::chain(l.id));

            let outcome = run(&mut fx, doc, l, &mut chain, aliases.clone()).await.unwrap();
            assert!(matches!(outcome, JobOutcome::Next(id) if id == next));
            assert_eq!(
                chain.context.get("%AssignUUIDsToDirectories%").await.as_deref(),
                Some("True")
            );
        }
    }

    #[tokio::test]
    async fn test_update_context_awaits_and_applies_choice() {
        let next = Uuid::now_v7();
        let l = replacement_link(
            Uuid::now_v7(),
            vec![
                replacement(Uuid::now_v7(), "5 - normal compression mode", "AIPCompressionLevel", "5"),
                replacement(Uuid::now_v7(), "1 - fastest mode", "AIPCompressionLevel", "1"),
            ],
            next,
        );
        let mut fx = fixture(None);
        let doc = workflow(vec![], vec![l.clone()]);
        let mut chain = Chain::new(testing::chain(l.id));

        let outcome = run(&mut fx, doc, &l, &mut chain, DecisionAliases::empty()).await.unwrap();
        let JobOutcome::Await(decision) = outcome else {
            panic!("expected a decision");
        };
        assert_eq!(decision.choices()[1].label, "1 - fastest mode");
        decision.resolve(1).unwrap();
        assert_eq!(decision.wait(&CancellationToken::new()).await.unwrap(), Some(next));
        assert_eq!(chain.context.get("%AIPCompressionLevel%").await.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_update_context_reads_stored_dict() {
        let mut upload = link(LinkConfig::StandardTask(StandardTaskConfig {
            manager: "linkTaskManagerDirectories".to_string(),
            execute: "upload-qubit_v0.0".to_string(),
            ..Default::default()
        }));
        upload.id = Uuid::now_v7();
        let mut l = replacement_link(Uuid::now_v7(), vec![], upload.id);
        l.fallback_link_id = Some(upload.id);

        let mut fx = fixture(None);
        fx.store.put_dict("upload-qubit_v0.0", [("url", "http://atom")]);
        let doc = workflow(vec![], vec![l.clone(), upload.clone()]);
        let mut chain = Chain::new(testing::chain(l.id));

        let outcome = run(&mut fx, doc, &l, &mut chain, DecisionAliases::empty()).await.unwrap();
        assert!(matches!(outcome, JobOutcome::Next(id) if id == upload.id));
        assert_eq!(chain.context.get("%url%").await.as_deref(), Some("http://atom"));
    }

    #[tokio::test]
    async fn test_output_decision_sets_execute_key() {
        let mut l = link(LinkConfig::StandardTask(StandardTaskConfig {
            manager: "linkTaskManagerGetUserChoiceFromMicroserviceGeneratedList".to_string(),
            execute: "%AIPsStore%".to_string(),
            ..Default::default()
        }));
        let next = Uuid::now_v7();
        l.fallback_link_id = Some(next);

        let mut fx = fixture(None);
        let doc = workflow(vec![], vec![l.clone()]);
        let mut chain = Chain::new(testing::chain(l.id));
        chain.generated_choices = vec![
            Choice::new("Default location", None).with_value("default", "/api/v2/location/default/"),
            Choice::new("Archive", None).with_value("archive", "/api/v2/location/archive/"),
        ];

        let outcome = run(&mut fx, doc, &l, &mut chain, DecisionAliases::empty()).await.unwrap();
        let JobOutcome::Await(decision) = outcome else {
            panic!("expected a decision");
        };
        assert!(decision.choices().iter().all(|c| c.next_link == Some(next)));
        decision.resolve(1).unwrap();
        decision.wait(&CancellationToken::new()).await.unwrap();
        assert_eq!(
            chain.context.get("%AIPsStore%").await.as_deref(),
            Some("/api/v2/location/archive/")
        );
    }
}
