//! Test doubles: an in-memory store, a scripted worker pool and workflow
//! builders.

use std::collections::HashMap;
use std::sync::Mutex;

use ccp_types::error::StoreError;
use ccp_types::package::{JobStatus, PackageStatus, PackageType};
use ccp_types::store::{
    FileRecord, JobRecord, NewTransfer, SipRecord, TaskRecord, UnitVar, UnitVarValue,
};
use ccp_types::workflow::{self, Document, I18nField, Link, LinkConfig};
use indexmap::IndexMap;
use uuid::Uuid;

use crate::package::{Package, dir_path};
use crate::repository::Store;
use crate::task::{BatchRequest, BatchResults, TaskPayload, TaskResult};
use crate::worker::{Callback, JobUpdate, WorkerPool, WorkerRequest};

// ---------------------------------------------------------------------------
// Workflow builders
// ---------------------------------------------------------------------------

pub fn link(config: LinkConfig) -> Link {
    Link {
        id: Uuid::now_v7(),
        description: I18nField::new("test link"),
        group: I18nField::new("test group"),
        config,
        exit_codes: HashMap::new(),
        fallback_link_id: None,
        fallback_job_status: JobStatus::default(),
        end: false,
    }
}

pub fn chain(link_id: Uuid) -> workflow::Chain {
    workflow::Chain {
        id: Uuid::now_v7(),
        description: I18nField::new("test chain"),
        link_id,
        available: true,
    }
}

/// A document holding `chains` and `links` as given, unvalidated.
pub fn workflow(chains: Vec<workflow::Chain>, links: Vec<Link>) -> Document {
    Document {
        chains: chains.into_iter().map(|c| (c.id, c)).collect(),
        links: links.into_iter().map(|l| (l.id, l)).collect(),
        watched_directories: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

struct PackageRow {
    package_type: PackageType,
    path: String,
    status: Option<PackageStatus>,
}

#[derive(Default)]
struct MemoryState {
    packages: IndexMap<Uuid, PackageRow>,
    transfers: Vec<NewTransfer>,
    sips: HashMap<Uuid, SipRecord>,
    jobs: IndexMap<Uuid, (JobRecord, JobStatus)>,
    tasks: Vec<TaskRecord>,
    unit_vars: Vec<(Uuid, PackageType, UnitVar)>,
    files: Vec<(Uuid, FileRecord)>,
    dicts: HashMap<String, IndexMap<String, String>>,
}

pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl Default for PackageRow {
    fn default() -> Self {
        Self {
            package_type: PackageType::Transfer,
            path: String::new(),
            status: None,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().expect("memory store lock poisoned")
    }

    /// Register a SIP located at `path` and return its package.
    pub fn sip_package(&self, shared_dir: &str, path: &str) -> Package {
        let pkg = Package::for_tests(PackageType::Sip, shared_dir, &dir_path(path));
        let db_path = pkg.path_for_db();
        let mut state = self.state();
        state.packages.insert(
            pkg.id(),
            PackageRow {
                package_type: PackageType::Sip,
                path: db_path.clone(),
                status: None,
            },
        );
        state.sips.insert(
            pkg.id(),
            SipRecord {
                id: pkg.id(),
                current_path: db_path,
                ..Default::default()
            },
        );
        pkg
    }

    pub fn put_sip(&self, sip: SipRecord) {
        self.state().sips.insert(sip.id, sip);
    }

    pub fn add_file(&self, package_id: Uuid, file: FileRecord) {
        self.state().files.push((package_id, file));
    }

    pub fn put_dict<'a>(&self, name: &str, items: impl IntoIterator<Item = (&'a str, &'a str)>) {
        let dict = items
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.state().dicts.insert(name.to_string(), dict);
    }

    pub fn package_path(&self, id: Uuid) -> Option<String> {
        self.state().packages.get(&id).map(|row| row.path.clone())
    }

    pub fn package_status(&self, id: Uuid) -> Option<PackageStatus> {
        self.state().packages.get(&id).and_then(|row| row.status)
    }

    pub fn transfers(&self) -> Vec<NewTransfer> {
        self.state().transfers.clone()
    }

    pub fn unit_var_value(&self, id: Uuid, name: &str) -> Option<String> {
        self.state()
            .unit_vars
            .iter()
            .rev()
            .find(|(pkg, _, var)| *pkg == id && var.name == name)
            .and_then(|(_, _, var)| var.value.clone())
    }

    pub fn job(&self, id: Uuid) -> Option<JobRecord> {
        self.state().jobs.get(&id).map(|(job, _)| job.clone())
    }

    pub fn job_status(&self, id: Uuid) -> Option<JobStatus> {
        self.state().jobs.get(&id).map(|(_, status)| *status)
    }

    /// Jobs in creation order.
    pub fn jobs(&self) -> Vec<JobRecord> {
        self.state().jobs.values().map(|(job, _)| job.clone()).collect()
    }

    pub fn tasks(&self) -> Vec<TaskRecord> {
        self.state().tasks.clone()
    }

    fn find_var(&self, id: Uuid, package_type: PackageType, name: &str) -> Option<UnitVar> {
        self.state()
            .unit_vars
            .iter()
            .rev()
            .find(|(pkg, ty, var)| *pkg == id && *ty == package_type && var.name == name)
            .map(|(_, _, var)| var.clone())
    }

    fn set_path(state: &mut MemoryState, package_type: PackageType, id: Uuid, path: &str) {
        let row = state.packages.entry(id).or_default();
        row.package_type = package_type;
        row.path = path.to_string();
        if package_type == PackageType::Sip {
            state
                .sips
                .entry(id)
                .or_insert_with(|| SipRecord {
                    id,
                    ..Default::default()
                })
                .current_path = path.to_string();
        }
    }
}

impl Store for MemoryStore {
    async fn create_job(&self, job: &JobRecord) -> Result<(), StoreError> {
        self.state()
            .jobs
            .insert(job.id, (job.clone(), JobStatus::ExecutingCommands));
        Ok(())
    }

    async fn update_job_status(&self, id: Uuid, status: JobStatus) -> Result<(), StoreError> {
        let mut state = self.state();
        let (_, current) = state.jobs.get_mut(&id).ok_or(StoreError::NotFound)?;
        *current = status;
        Ok(())
    }

    async fn create_tasks(&self, tasks: &[TaskRecord]) -> Result<(), StoreError> {
        self.state().tasks.extend_from_slice(tasks);
        Ok(())
    }

    async fn update_package_status(
        &self,
        id: Uuid,
        package_type: PackageType,
        status: PackageStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.state();
        let row = state.packages.entry(id).or_default();
        row.package_type = package_type;
        row.status = Some(status);
        Ok(())
    }

    async fn create_transfer(&self, transfer: &NewTransfer) -> Result<(), StoreError> {
        let mut state = self.state();
        if state.packages.contains_key(&transfer.id) {
            return Err(StoreError::Conflict(transfer.id.to_string()));
        }
        state.packages.insert(transfer.id, PackageRow::default());
        state.transfers.push(transfer.clone());
        Ok(())
    }

    async fn read_transfer_location(&self, id: Uuid) -> Result<String, StoreError> {
        self.state()
            .packages
            .get(&id)
            .filter(|row| row.package_type == PackageType::Transfer)
            .map(|row| row.path.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn update_transfer_location(&self, id: Uuid, path: &str) -> Result<(), StoreError> {
        let mut state = self.state();
        let row = state.packages.get_mut(&id).ok_or(StoreError::NotFound)?;
        row.path = path.to_string();
        Ok(())
    }

    async fn upsert_package(
        &self,
        package_type: PackageType,
        id: Uuid,
        path: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.state();
        let created = !state.packages.contains_key(&id);
        Self::set_path(&mut state, package_type, id, path);
        Ok(created)
    }

    async fn ensure_package(
        &self,
        package_type: PackageType,
        path: &str,
    ) -> Result<(Uuid, bool), StoreError> {
        let mut state = self.state();
        let existing = state
            .packages
            .iter()
            .find(|(_, row)| row.package_type == package_type && row.path == path)
            .map(|(id, _)| *id);
        if let Some(id) = existing {
            return Ok((id, false));
        }
        let id = Uuid::now_v7();
        Self::set_path(&mut state, package_type, id, path);
        Ok((id, true))
    }

    async fn read_sip(&self, id: Uuid) -> Result<SipRecord, StoreError> {
        self.state().sips.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn read_unit_vars(
        &self,
        id: Uuid,
        package_type: PackageType,
        name: &str,
    ) -> Result<Vec<UnitVar>, StoreError> {
        Ok(self
            .state()
            .unit_vars
            .iter()
            .filter(|(pkg, ty, var)| *pkg == id && *ty == package_type && (name.is_empty() || var.name == name))
            .map(|(_, _, var)| var.clone())
            .collect())
    }

    async fn read_unit_var(
        &self,
        id: Uuid,
        package_type: PackageType,
        name: &str,
    ) -> Result<String, StoreError> {
        self.find_var(id, package_type, name)
            .and_then(|var| var.value)
            .ok_or(StoreError::NotFound)
    }

    async fn read_unit_link_id(
        &self,
        id: Uuid,
        package_type: PackageType,
        name: &str,
    ) -> Result<Option<Uuid>, StoreError> {
        self.find_var(id, package_type, name)
            .map(|var| var.link_id)
            .ok_or(StoreError::NotFound)
    }

    async fn create_unit_var(
        &self,
        id: Uuid,
        package_type: PackageType,
        name: &str,
        value: UnitVarValue,
        update: bool,
    ) -> Result<(), StoreError> {
        let var = match value {
            UnitVarValue::Value(value) => UnitVar {
                name: name.to_string(),
                value: Some(value),
                link_id: None,
            },
            UnitVarValue::LinkId(link_id) => UnitVar {
                name: name.to_string(),
                value: None,
                link_id: Some(link_id),
            },
        };
        let mut state = self.state();
        if update {
            if let Some((_, _, existing)) = state
                .unit_vars
                .iter_mut()
                .find(|(pkg, ty, v)| *pkg == id && *ty == package_type && v.name == name)
            {
                *existing = var;
                return Ok(());
            }
        }
        state.unit_vars.push((id, package_type, var));
        Ok(())
    }

    async fn files(
        &self,
        id: Uuid,
        _package_type: PackageType,
        filter_filename_end: &str,
        filter_subdir: &str,
        replacement_path: &str,
    ) -> Result<Vec<FileRecord>, StoreError> {
        let prefix = format!("{replacement_path}{filter_subdir}");
        Ok(self
            .state()
            .files
            .iter()
            .filter(|(pkg, file)| {
                *pkg == id
                    && file.current_location.ends_with(filter_filename_end)
                    && (filter_subdir.is_empty() || file.current_location.starts_with(&prefix))
            })
            .map(|(_, file)| file.clone())
            .collect())
    }

    async fn read_dict(&self, name: &str) -> Result<IndexMap<String, String>, StoreError> {
        self.state().dicts.get(name).cloned().ok_or(StoreError::NotFound)
    }
}

// ---------------------------------------------------------------------------
// ScriptedWorkerPool
// ---------------------------------------------------------------------------

type Script = dyn Fn(&str, &TaskPayload) -> Option<TaskResult> + Send + Sync;

enum Mode {
    /// Answer every task with the script's result; `None` omits the task.
    Script(Box<Script>),
    /// Report every batch as failed.
    Fail,
    /// Never answer. Callbacks are kept so listeners stay pending.
    Silent,
}

struct Request {
    func_name: String,
    payloads: Vec<TaskPayload>,
}

/// Worker pool that answers batches in-process.
pub struct ScriptedWorkerPool {
    mode: Mode,
    requests: Mutex<Vec<Request>>,
    held: Mutex<Vec<Callback>>,
}

impl ScriptedWorkerPool {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&str, &TaskPayload) -> Option<TaskResult> + Send + Sync + 'static,
    {
        Self::with_mode(Mode::Script(Box::new(script)))
    }

    /// Every task exits with `code`.
    pub fn exit_code(code: i32) -> Self {
        Self::new(move |_, _| {
            Some(TaskResult {
                exit_code: code,
                ..Default::default()
            })
        })
    }

    pub fn failing() -> Self {
        Self::with_mode(Mode::Fail)
    }

    pub fn silent() -> Self {
        Self::with_mode(Mode::Silent)
    }

    fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            requests: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> std::sync::MutexGuard<'_, Vec<Request>> {
        self.requests.lock().expect("scripted pool lock poisoned")
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.requests().iter().map(|r| r.payloads.len()).collect()
    }

    pub fn func_names(&self) -> Vec<String> {
        self.requests().iter().map(|r| r.func_name.clone()).collect()
    }

    /// Arguments of every task, in submission order.
    pub fn arguments(&self) -> Vec<String> {
        self.requests()
            .iter()
            .flat_map(|r| r.payloads.iter().map(|p| p.arguments.clone()))
            .collect()
    }
}

impl WorkerPool for ScriptedWorkerPool {
    fn submit(&self, request: WorkerRequest) {
        let batch = match BatchRequest::decode(&request.payload) {
            Ok(batch) => batch,
            Err(_) => {
                (request.callback)(JobUpdate::Fail);
                return;
            }
        };
        self.requests().push(Request {
            func_name: request.func_name.clone(),
            payloads: batch.tasks.values().cloned().collect(),
        });

        match &self.mode {
            Mode::Script(script) => {
                let results = BatchResults {
                    results: batch
                        .tasks
                        .iter()
                        .filter_map(|(id, payload)| script(&request.func_name, payload).map(|r| (*id, r)))
                        .collect(),
                };
                match results.encode() {
                    Ok(data) => (request.callback)(JobUpdate::Complete(data)),
                    Err(_) => (request.callback)(JobUpdate::Fail),
                }
            }
            Mode::Fail => (request.callback)(JobUpdate::Fail),
            Mode::Silent => self
                .held
                .lock()
                .expect("scripted pool lock poisoned")
                .push(request.callback),
        }
    }
}
