//! Client-script jobs: run a script on the worker pool, once for the package
//! directory or once per file, and follow the exit-code table.

use ccp_types::workflow::{I18nField, StandardTaskConfig};
use indexmap::IndexMap;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::{Job, JobError, JobOutcome};
use crate::chain::Chain;
use crate::decision::Choice;
use crate::dict_literal;
use crate::package::Package;
use crate::replacement::ReplacementMapping;
use crate::repository::Store;
use crate::task::{BatchResults, TaskBackend, TaskError};

/// Unit variable key overriding a file job's subdirectory.
const FILTER_SUBDIR_KEY: &str = "filterSubDir";

/// One entry of the choice list a script prints on stdout.
#[derive(Debug, Deserialize)]
struct GeneratedChoice {
    description: I18nField,
    uri: String,
}

impl<S: Store + 'static> Job<S> {
    fn task_backend(&self, execute: &str) -> TaskBackend<S> {
        TaskBackend::new(
            self.services.store.clone(),
            self.services.pool.clone(),
            self.id,
            execute,
            self.services.batch_size,
        )
    }

    /// Package variables overlaid with the chain context.
    async fn replacements(&self, pkg: &Package, chain: &Chain, filter_subdir: &str) -> ReplacementMapping {
        let mut rm = pkg.replacements(filter_subdir);
        rm.update(chain.context.snapshot().await);
        rm
    }

    async fn submit_task(
        &self,
        backend: &mut TaskBackend<S>,
        config: &StandardTaskConfig,
        rm: ReplacementMapping,
        wants_output: bool,
    ) -> Result<(), JobError> {
        let args = rm.replace_values(&config.arguments);
        let stdout_path = rm.replace_values(&config.stdout_file);
        let stderr_path = rm.replace_values(&config.stderr_file);
        backend
            .submit(rm, args, wants_output, stdout_path, stderr_path)
            .await?;
        Ok(())
    }

    /// Record the status for the batch's exit code and pick the next link.
    ///
    /// Every one of the `submitted` tasks must have reported back; a task
    /// without a result fails the job.
    async fn follow_exit_code(&self, results: &BatchResults, submitted: usize) -> Result<JobOutcome, JobError> {
        if results.len() < submitted {
            tracing::warn!(job_id = %self.id, submitted, received = results.len(), "task results missing");
            return Err(TaskError::Incomplete {
                submitted,
                received: results.len(),
            }
            .into());
        }
        let code = results.exit_code();
        self.mark_exit_code(code).await?;
        tracing::debug!(job_id = %self.id, exit_code = code, tasks = results.len(), "client job finished");
        Ok(JobOutcome::from_link(self.link.next_link_for_exit_code(code)))
    }

    // -----------------------------------------------------------------------
    // Directory
    // -----------------------------------------------------------------------

    pub(super) async fn directory_client(
        &self,
        pkg: &Package,
        chain: &Chain,
        config: &StandardTaskConfig,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, JobError> {
        let rm = self.replacements(pkg, chain, &config.filter_subdir).await;
        let mut backend = self.task_backend(&config.execute);
        self.submit_task(&mut backend, config, rm, false).await?;
        let results = backend.wait(cancel).await?;
        self.follow_exit_code(&results, 1).await
    }

    // -----------------------------------------------------------------------
    // Files
    // -----------------------------------------------------------------------

    pub(super) async fn files_client(
        &self,
        pkg: &Package,
        chain: &Chain,
        config: &StandardTaskConfig,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, JobError> {
        let filter_subdir = self.filter_subdir(pkg, config).await?;
        let rm = self.replacements(pkg, chain, &filter_subdir).await;

        let files = pkg
            .files(self.services.store.as_ref(), &config.filter_file_end, &filter_subdir)
            .await?;
        if files.is_empty() {
            tracing::debug!(job_id = %self.id, package_id = %pkg.id(), "no files matched");
            return self.follow_exit_code(&BatchResults::default(), 0).await;
        }

        let mut backend = self.task_backend(&config.execute);
        for file in &files {
            self.submit_task(&mut backend, config, rm.with(file), false).await?;
        }
        let results = backend.wait(cancel).await?;
        self.follow_exit_code(&results, files.len()).await
    }

    /// The link's subdirectory, unless a package variable named after the
    /// script overrides it with a `filterSubDir` entry.
    async fn filter_subdir(&self, pkg: &Package, config: &StandardTaskConfig) -> Result<String, JobError> {
        let default = config.filter_subdir.clone();
        let value = match self
            .services
            .store
            .read_unit_var(pkg.id(), pkg.package_type(), &config.execute)
            .await
        {
            Ok(value) => value,
            Err(e) if e.is_not_found() => return Ok(default),
            Err(e) => return Err(e.into()),
        };
        if value.is_empty() {
            return Ok(default);
        }

        match dict_literal::parse(&value) {
            Ok(dict) => Ok(dict.get(FILTER_SUBDIR_KEY).cloned().unwrap_or(default)),
            Err(e) => {
                tracing::warn!(job_id = %self.id, value = %value, error = %e, "ignoring unparseable unit variable");
                Ok(default)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Output
    // -----------------------------------------------------------------------

    pub(super) async fn output_client(
        &self,
        pkg: &Package,
        chain: &mut Chain,
        config: &StandardTaskConfig,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, JobError> {
        let rm = self.replacements(pkg, chain, &config.filter_subdir).await;
        let mut backend = self.task_backend(&config.execute);
        self.submit_task(&mut backend, config, rm, true).await?;
        let results = backend.wait(cancel).await?;

        let stdout = results.first().map(|r| r.stdout.as_str()).unwrap_or_default();
        match serde_json::from_str::<IndexMap<String, GeneratedChoice>>(stdout) {
            Ok(generated) => {
                chain.generated_choices = generated
                    .into_iter()
                    .map(|(key, item)| Choice::new(item.description.text(), None).with_value(key, item.uri))
                    .collect();
            }
            Err(e) => {
                tracing::error!(job_id = %self.id, error = %e, "unable to parse generated choices");
            }
        }

        self.follow_exit_code(&results, 1).await
    }
}
