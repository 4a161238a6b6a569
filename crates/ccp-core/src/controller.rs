//! Admission control and scheduling of packages.
//!
//! Packages enter through [`Controller::submit`] (user requests) or
//! [`Controller::notify`] (watched-directory events) and wait in a FIFO
//! queue. A scheduling pass admits packages while fewer than
//! `max_concurrent_packages` are running, each one driven by its own
//! [`JobIterator`] inside a tracked task. Passes run on a fixed interval and
//! right after every submission.
//!
//! A package blocked on a decision keeps its admission slot: the execution
//! unit is still alive, parked in [`Decision::wait`].

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ccp_types::config::ServerConfig;
use ccp_types::decision::DecisionSummary;
use ccp_types::error::StoreError;
use ccp_types::package::{CreatePackageRequest, PackageStatus};
use ccp_types::store::NewTransfer;
use indexmap::IndexMap;
use thiserror::Error;
use tokio::sync::{Semaphore, oneshot};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::decision::{Decision, DecisionError};
use crate::deposit::{self, DepositError};
use crate::iterator::{IteratorError, JobIterator, Step};
use crate::job::Services;
use crate::package::{Package, PackageError, PackageInfo, dir_path};
use crate::repository::Store;
use crate::transfer;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("unknown transfer type: {0:?}")]
    UnknownTransferType(String),

    #[error("no watched directory configured at {0:?}")]
    UnknownWatchedDir(String),

    #[error("chain {0} not found in the workflow document")]
    MissingChain(Uuid),

    #[error("path {0:?} is outside the watched directory")]
    OutsideWatchedDir(String),

    #[error("unmatched event: {0:?}")]
    UnmatchedEvent(String),

    #[error("decision cannot be found")]
    DecisionNotFound,

    #[error("package is not awaiting")]
    NotAwaiting,

    #[error("unknown choice: {0:?}")]
    UnknownChoice(String),

    #[error("controller is closed")]
    Closed,

    #[error(transparent)]
    Decision(#[from] DecisionError),

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("deposit: {0}")]
    Deposit(#[from] DepositError),
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Shared directory, with a trailing slash.
    pub shared_dir: String,
    /// Root of the watched directories.
    pub watched_dir: PathBuf,
    /// Admission ceiling.
    pub max_concurrent_packages: usize,
    /// Ceiling on execution units in flight.
    pub max_in_flight: usize,
    pub pick_interval: Duration,
}

impl From<&ServerConfig> for ControllerConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            shared_dir: dir_path(&config.shared_dir.to_string_lossy()),
            watched_dir: config.watched_dir(),
            max_concurrent_packages: config.max_concurrent_packages,
            max_in_flight: config.max_in_flight,
            pick_interval: Duration::from_millis(config.pick_interval_ms),
        }
    }
}

/// A transfer accepted by [`Controller::submit`].
///
/// `handle` resolves once the transfer contents are in place and the package
/// is queued, or with the error that stopped it. The deposit runs as a
/// controller task: [`Controller::close`] cancels it and waits for it.
#[derive(Debug)]
pub struct Submission {
    pub id: Uuid,
    pub name: String,
    pub handle: oneshot::Receiver<Result<(), ControllerError>>,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

#[derive(Default)]
struct State {
    queued: VecDeque<Package>,
    active: Vec<PackageInfo>,
    /// Packages parked on a decision, keyed by package id.
    awaiting: IndexMap<Uuid, (PackageInfo, Arc<Decision>)>,
}

struct Inner<S: Store> {
    services: Services<S>,
    config: ControllerConfig,
    state: Mutex<State>,
    tasks: Mutex<JoinSet<()>>,
    in_flight: Arc<Semaphore>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

pub struct Controller<S: Store> {
    inner: Arc<Inner<S>>,
}

impl<S: Store> Clone for Controller<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Store + 'static> Controller<S> {
    pub fn new(services: Services<S>, config: ControllerConfig) -> Self {
        let in_flight = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self {
            inner: Arc::new(Inner {
                services,
                config,
                state: Mutex::new(State::default()),
                tasks: Mutex::new(JoinSet::new()),
                in_flight,
                cancel: CancellationToken::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Start the periodic scheduling passes.
    pub fn run(&self) {
        let inner = Arc::clone(&self.inner);
        let mut tasks = self.inner.tasks.lock().expect("controller tasks lock poisoned");
        tasks.spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.pick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = inner.cancel.cancelled() => break,
                    _ = ticker.tick() => inner.pick(),
                }
            }
            tracing::debug!("scheduler stopped");
        });
    }

    /// Cancel every execution unit and wait for them to finish. Calling it
    /// again is a no-op.
    pub async fn close(&self) -> Result<(), ControllerError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!("closing controller");
        self.inner.cancel.cancel();

        let mut tasks = std::mem::take(&mut *self.inner.tasks.lock().expect("controller tasks lock poisoned"));
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                if e.is_panic() {
                    tracing::error!(error = %e, "package task panicked");
                }
            }
        }
        self.inner.state.lock().expect("controller state lock poisoned").queued.clear();
        Ok(())
    }

    /// Create a transfer and start copying its contents in the background.
    ///
    /// The transfer type and its starting chain are validated first; nothing
    /// is recorded or queued when they are not usable.
    pub async fn submit(&self, req: CreatePackageRequest) -> Result<Submission, ControllerError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ControllerError::Closed);
        }

        let type_name = req.transfer_type.clone().unwrap_or_default();
        let tt = transfer::transfer_type(&type_name)
            .ok_or_else(|| ControllerError::UnknownTransferType(type_name.clone()))?;

        let (chain_id, link_id) = if req.auto_approve {
            (tt.bypass_chain_id, Some(tt.bypass_link_id))
        } else {
            let wd = self
                .inner
                .services
                .workflow
                .watched_directory(tt.watched_dir)
                .ok_or_else(|| ControllerError::UnknownWatchedDir(tt.watched_dir.to_string()))?;
            (wd.chain_id, None)
        };
        if self.inner.services.workflow.chain(&chain_id).is_none() {
            return Err(ControllerError::MissingChain(chain_id));
        }
        if req.path.is_empty() {
            return Err(DepositError::NoPath.into());
        }
        if req.name.is_empty() || req.name.contains('/') || req.name.contains("..") {
            return Err(DepositError::IllegalPath(req.name.clone()).into());
        }

        let store = self.inner.services.store.as_ref();
        let id = Uuid::now_v7();
        store
            .create_transfer(&NewTransfer {
                id,
                accession_id: req.accession.clone().unwrap_or_default(),
                access_system_id: req.access_system_id.clone().unwrap_or_default(),
                metadata_set_id: req.metadata_set_id,
            })
            .await?;

        let mut pkg = Package::new_transfer(id, &self.inner.config.shared_dir);
        pkg.set_start_at(chain_id, link_id);
        pkg.set_auto_approve(req.auto_approve);

        let processing_config = req
            .processing_config
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "default".to_string());
        pkg.save_value(store, "processingConfiguration", &processing_config).await?;
        pkg.save_value(store, "accessionNumber", req.accession.as_deref().unwrap_or_default())
            .await?;

        tracing::info!(
            package_id = %id,
            name = %req.name,
            transfer_type = tt.name,
            auto_approve = req.auto_approve,
            "transfer submitted"
        );

        let (tx, handle) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let cancel = self.inner.cancel.child_token();
        let name = req.name.clone();
        let sources = req.path;
        {
            let mut tasks = self.inner.tasks.lock().expect("controller tasks lock poisoned");
            tasks.spawn(async move {
                let res = tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::warn!(package_id = %id, "controller closed, deposit abandoned");
                        Err(ControllerError::Closed)
                    }
                    res = inner.deposit(pkg, name, sources) => res,
                };
                let _ = tx.send(res);
            });
        }

        Ok(Submission {
            id,
            name: req.name,
            handle,
        })
    }

    /// Queue the package that appeared at `path` inside a watched directory.
    pub async fn notify(&self, path: &Path) -> Result<(), ControllerError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ControllerError::Closed);
        }

        let display = path.display().to_string();
        let rel = path
            .strip_prefix(&self.inner.config.watched_dir)
            .map_err(|_| ControllerError::OutsideWatchedDir(display.clone()))?;
        let parent = rel
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        let workflow = Arc::clone(&self.inner.services.workflow);
        let wd = workflow
            .watched_directory(&parent)
            .ok_or(ControllerError::UnmatchedEvent(display))?;
        tracing::debug!(path = %path.display(), watched_dir = %wd.path, "watched directory event");

        let pkg = Package::from_watched(
            self.inner.services.store.as_ref(),
            &self.inner.config.shared_dir,
            path,
            wd,
        )
        .await?;
        self.inner.queue(pkg);
        self.inner.pick();
        Ok(())
    }

    /// Names of the packages being processed.
    pub fn active(&self) -> Vec<String> {
        let state = self.inner.state.lock().expect("controller state lock poisoned");
        state.active.iter().map(|info| info.name.clone()).collect()
    }

    pub fn active_packages(&self) -> Vec<PackageInfo> {
        let state = self.inner.state.lock().expect("controller state lock poisoned");
        state.active.clone()
    }

    pub fn is_active(&self, id: Uuid) -> bool {
        let state = self.inner.state.lock().expect("controller state lock poisoned");
        state.active.iter().any(|info| info.id == id) || state.awaiting.contains_key(&id)
    }

    /// Number of packages waiting for admission.
    pub fn queued(&self) -> usize {
        let state = self.inner.state.lock().expect("controller state lock poisoned");
        state.queued.len()
    }

    /// Pending decisions, in the order they were raised.
    pub fn decisions(&self) -> Vec<DecisionSummary> {
        let state = self.inner.state.lock().expect("controller state lock poisoned");
        state
            .awaiting
            .values()
            .map(|(_, decision)| decision.summary())
            .collect()
    }

    /// One line per pending decision.
    pub fn decision_lines(&self) -> Vec<String> {
        self.decisions()
            .iter()
            .map(|summary| {
                let mut line = format!("{} ({}): {}", summary.package_path, summary.package_id, summary.name);
                for choice in &summary.choices {
                    let _ = write!(line, " [{}] {}", choice.id, choice.label);
                }
                line
            })
            .collect()
    }

    /// Pending decisions of one package; `None` when it is not awaiting.
    pub fn package_decisions(&self, id: Uuid) -> Option<Vec<DecisionSummary>> {
        let state = self.inner.state.lock().expect("controller state lock poisoned");
        state
            .awaiting
            .get(&id)
            .map(|(_, decision)| vec![decision.summary()])
    }

    pub fn resolve_decision(&self, id: Uuid, position: usize) -> Result<(), ControllerError> {
        let decision = {
            let state = self.inner.state.lock().expect("controller state lock poisoned");
            state
                .awaiting
                .values()
                .find(|(_, decision)| decision.id() == id)
                .map(|(_, decision)| Arc::clone(decision))
                .ok_or(ControllerError::DecisionNotFound)?
        };
        decision.resolve(position)?;
        tracing::info!(decision_id = %id, position, "decision resolved");
        Ok(())
    }

    /// Resolve the decision raised by job `job_id`. `choice` is a position
    /// or, when not a number, the value or label of a choice.
    pub fn resolve_decision_legacy(&self, job_id: Uuid, choice: &str) -> Result<(), ControllerError> {
        let decision = {
            let state = self.inner.state.lock().expect("controller state lock poisoned");
            state
                .awaiting
                .values()
                .find(|(_, decision)| decision.job_id() == job_id)
                .map(|(_, decision)| Arc::clone(decision))
                .ok_or(ControllerError::NotAwaiting)?
        };

        let position = match choice.trim().parse::<usize>() {
            Ok(position) => position,
            Err(_) => decision
                .choices()
                .iter()
                .position(|c| c.value.1 == choice)
                .or_else(|| decision.choices().iter().position(|c| c.label == choice))
                .ok_or_else(|| ControllerError::UnknownChoice(choice.to_string()))?,
        };
        decision.resolve(position)?;
        tracing::info!(job_id = %job_id, position, "decision resolved by job");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

/// Removes a package from the active and awaiting lists when its execution
/// unit ends, however it ends.
struct ActiveGuard<'a, S: Store> {
    inner: &'a Inner<S>,
    id: Uuid,
}

impl<S: Store> Drop for ActiveGuard<'_, S> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock().expect("controller state lock poisoned");
        state.active.retain(|info| info.id != self.id);
        state.awaiting.shift_remove(&self.id);
    }
}

impl<S: Store + 'static> Inner<S> {
    fn queue(&self, pkg: Package) {
        if self.closed.load(Ordering::SeqCst) {
            tracing::warn!(package_id = %pkg.id(), "controller closed, package not queued");
            return;
        }
        tracing::info!(package_id = %pkg.id(), package = %pkg, "package queued");
        let mut state = self.state.lock().expect("controller state lock poisoned");
        state.queued.push_back(pkg);
    }

    /// Admit queued packages while there is room.
    fn pick(self: &Arc<Self>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        let mut state = self.state.lock().expect("controller state lock poisoned");
        let mut tasks = self.tasks.lock().expect("controller tasks lock poisoned");
        while let Some(res) = tasks.try_join_next() {
            if let Err(e) = res {
                if e.is_panic() {
                    tracing::error!(error = %e, "package task panicked");
                }
            }
        }

        while state.active.len() + state.awaiting.len() < self.config.max_concurrent_packages {
            if state.queued.is_empty() {
                break;
            }
            let Ok(permit) = Arc::clone(&self.in_flight).try_acquire_owned() else {
                tracing::warn!(max_in_flight = self.config.max_in_flight, "in-flight ceiling reached");
                break;
            };
            let Some(pkg) = state.queued.pop_front() else {
                break;
            };

            tracing::debug!(package_id = %pkg.id(), "package admitted");
            state.active.push(pkg.info());
            let inner = Arc::clone(self);
            tasks.spawn(async move {
                Arc::clone(&inner).process(pkg).await;
                drop(permit);
                inner.pick();
            });
        }
    }

    /// Drive one package until it is done, suspended, failed or cancelled.
    async fn process(self: Arc<Self>, pkg: Package) {
        let id = pkg.id();
        let _guard = ActiveGuard { inner: &*self, id };
        let cancel = self.cancel.child_token();
        let mut iter = JobIterator::new(self.services.clone(), pkg, cancel.clone());

        loop {
            match iter.run().await {
                Ok(Step::Await(decision)) => {
                    tracing::info!(package_id = %id, decision = decision.name(), "package awaiting decision");
                    self.to_awaiting(iter.package().info(), Arc::clone(&decision));
                    let resolved = decision.wait(&cancel).await;
                    self.from_awaiting(id);

                    match resolved {
                        Ok(next) => iter.resume(next),
                        Err(DecisionError::Cancelled) => {
                            tracing::debug!(package_id = %id, "decision wait cancelled");
                            break;
                        }
                        Err(e) => {
                            tracing::error!(package_id = %id, error = %e, "failed to apply decision");
                            if let Err(mark_err) = iter
                                .package()
                                .mark_as(self.services.store.as_ref(), PackageStatus::Failed)
                                .await
                            {
                                tracing::error!(package_id = %id, error = %mark_err, "failed to mark the package as failed");
                            }
                            break;
                        }
                    }
                }
                Ok(Step::Continue) => continue,
                Ok(Step::Done) | Ok(Step::Suspended) => break,
                Err(IteratorError::Cancelled) => {
                    tracing::debug!(package_id = %id, "package processing cancelled");
                    break;
                }
                Err(e) => {
                    tracing::error!(package_id = %id, error = %e, "package processing failed");
                    break;
                }
            }
        }
    }

    fn to_awaiting(&self, info: PackageInfo, decision: Arc<Decision>) {
        let mut state = self.state.lock().expect("controller state lock poisoned");
        state.active.retain(|p| p.id != info.id);
        state.awaiting.insert(info.id, (info, decision));
    }

    fn from_awaiting(&self, id: Uuid) {
        let mut state = self.state.lock().expect("controller state lock poisoned");
        if let Some((info, _)) = state.awaiting.shift_remove(&id) {
            state.active.push(info);
        }
    }

    /// Copy the transfer contents into place, record the location and queue
    /// the package.
    async fn deposit(
        self: Arc<Self>,
        mut pkg: Package,
        name: String,
        sources: Vec<String>,
    ) -> Result<(), ControllerError> {
        let shared = PathBuf::from(&self.config.shared_dir);
        let deposited = match tokio::task::spawn_blocking(move || deposit::deposit(&shared, &name, &sources)).await {
            Ok(res) => res,
            Err(e) => Err(DepositError::Io {
                context: "deposit task".to_string(),
                source: e.into(),
            }),
        };

        let path = match deposited {
            Ok(path) => path,
            Err(e) => {
                tracing::error!(package_id = %pkg.id(), error = %e, "failed to deposit transfer");
                self.fail_transfer(&pkg).await;
                return Err(e.into());
            }
        };

        let location = if path.is_dir() {
            dir_path(&path.to_string_lossy())
        } else {
            path.to_string_lossy().into_owned()
        };
        pkg.update_path(&location);
        if let Err(e) = self
            .services
            .store
            .update_transfer_location(pkg.id(), &pkg.path_for_db())
            .await
        {
            tracing::error!(package_id = %pkg.id(), error = %e, "failed to record transfer location");
            self.fail_transfer(&pkg).await;
            return Err(e.into());
        }

        tracing::info!(package_id = %pkg.id(), path = %location, "transfer deposited");
        self.queue(pkg);
        self.pick();
        Ok(())
    }

    async fn fail_transfer(&self, pkg: &Package) {
        if let Err(e) = pkg.mark_as(self.services.store.as_ref(), PackageStatus::Failed).await {
            tracing::error!(package_id = %pkg.id(), error = %e, "failed to mark the transfer as failed");
        }
    }
}
