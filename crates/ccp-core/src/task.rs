//! Task backend: batches client-script tasks and exchanges them with the
//! worker pool.
//!
//! Tasks accumulate in a pending batch that is flushed every `batch_size`
//! tasks. Each flush persists the batch, encodes it as a single request and
//! spawns a listener that waits for the pool's callback. [`TaskBackend::wait`]
//! flushes the remainder and blocks until every listener finishes.
//!
//! Cancelling `wait` only stops local waiting: listeners are dropped, but
//! batches already handed to the pool are not recalled and their task
//! records remain.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use ccp_types::error::StoreError;
use ccp_types::store::TaskRecord;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::replacement::ReplacementMapping;
use crate::repository::Store;
use crate::worker::{JobUpdate, WorkerPool, WorkerRequest};

/// Tasks per worker-pool request.
pub const DEFAULT_BATCH_SIZE: usize = 128;

/// `createdDate` layout: six fractional digits and an explicit UTC offset.
const CREATED_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f+00:00";

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("save tasks: {0}")]
    Store(#[from] StoreError),

    #[error("encode batch: {0}")]
    Encode(String),

    #[error("decode batch: {0}")]
    Decode(String),

    #[error("task backend cancelled")]
    Cancelled,

    #[error("worker pool reported {received} of {submitted} task results")]
    Incomplete { submitted: usize, received: usize },
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// One task as sent to the worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub task_uuid: Uuid,
    pub arguments: String,
    pub wants_output: bool,
    #[serde(
        rename = "createdDate",
        serialize_with = "serialize_created_date",
        deserialize_with = "deserialize_created_date"
    )]
    pub created_at: DateTime<Utc>,
}

/// Request payload: `{"tasks": {<task-id>: TaskPayload}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub tasks: IndexMap<Uuid, TaskPayload>,
}

impl BatchRequest {
    pub fn encode(&self) -> Result<Vec<u8>, TaskError> {
        if self.tasks.is_empty() {
            return Err(TaskError::Encode("map is empty".to_string()));
        }
        serde_json::to_vec(self).map_err(|e| TaskError::Encode(e.to_string()))
    }

    pub fn decode(data: &[u8]) -> Result<Self, TaskError> {
        serde_json::from_slice(data).map_err(|e| TaskError::Decode(e.to_string()))
    }
}

/// Outcome of one task as reported by the worker pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    #[serde(rename = "exitCode")]
    pub exit_code: i32,
    #[serde(rename = "finishedTimestamp", default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

/// Result payload: `{"task_results": {<task-id>: TaskResult}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchResults {
    #[serde(rename = "task_results", default)]
    pub results: HashMap<Uuid, TaskResult>,
}

impl BatchResults {
    pub fn encode(&self) -> Result<Vec<u8>, TaskError> {
        serde_json::to_vec(self).map_err(|e| TaskError::Encode(e.to_string()))
    }

    pub fn decode(data: &[u8]) -> Result<Self, TaskError> {
        serde_json::from_slice(data).map_err(|e| TaskError::Decode(e.to_string()))
    }

    /// Highest exit code across the batch; zero when empty.
    pub fn exit_code(&self) -> i32 {
        self.results.values().map(|r| r.exit_code).max().unwrap_or(0)
    }

    /// Any one result.
    pub fn first(&self) -> Option<&TaskResult> {
        self.results.values().next()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

fn serialize_created_date<S: Serializer>(value: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&value.format(CREATED_DATE_FORMAT).to_string())
}

fn deserialize_created_date<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(d)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(serde::de::Error::custom)
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Task {
    id: Uuid,
    created_at: DateTime<Utc>,
    args: String,
    wants_output: bool,
    stdout_path: String,
    stderr_path: String,
    replacements: ReplacementMapping,
}

impl Task {
    fn payload(&self) -> TaskPayload {
        TaskPayload {
            task_uuid: self.id,
            arguments: self.args.clone(),
            wants_output: self.wants_output,
            created_at: self.created_at,
        }
    }

    fn record(&self, exec: &str, job_id: Uuid) -> TaskRecord {
        let file_id = self
            .replacements
            .get("%fileUUID%")
            .and_then(|v| Uuid::parse_str(v).ok());
        let filename = self
            .replacements
            .get("%relativeLocation%")
            .and_then(|v| Path::new(v).file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        TaskRecord {
            id: self.id,
            created_at: self.created_at,
            file_id,
            filename,
            exec: exec.to_string(),
            arguments: self.args.clone(),
            job_id,
        }
    }

    /// Append the task's output to its redirect targets.
    async fn write_output(&self, stdout: &str, stderr: &str) {
        for (path, contents) in [(&self.stdout_path, stdout), (&self.stderr_path, stderr)] {
            if path.is_empty() || contents.is_empty() {
                continue;
            }
            if let Err(e) = append_file(path, contents).await {
                tracing::warn!(task_id = %self.id, path = %path, error = %e, "failed to write task output");
            }
        }
    }
}

async fn append_file(path: &str, contents: &str) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.append(true).create(true);
    #[cfg(unix)]
    options.mode(0o750);
    let mut file = options.open(path).await?;
    file.write_all(contents.as_bytes()).await?;
    file.flush().await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o750)).await?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// TaskBackend
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Shared {
    tasks: HashMap<Uuid, Task>,
    results: BatchResults,
}

/// Batches the tasks of one client job.
pub struct TaskBackend<S: Store> {
    store: Arc<S>,
    pool: Arc<dyn WorkerPool>,
    job_id: Uuid,
    /// Script name; lowercased as the request's function name.
    execute: String,
    batch_size: usize,
    batch: Vec<Task>,
    batches_sent: usize,
    shared: Arc<Mutex<Shared>>,
    listeners: JoinSet<()>,
}

impl<S: Store + 'static> TaskBackend<S> {
    pub fn new(
        store: Arc<S>,
        pool: Arc<dyn WorkerPool>,
        job_id: Uuid,
        execute: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            store,
            pool,
            job_id,
            execute: execute.into(),
            batch_size,
            batch: Vec::with_capacity(batch_size),
            batches_sent: 0,
            shared: Arc::new(Mutex::new(Shared::default())),
            listeners: JoinSet::new(),
        }
    }

    /// Queue a task, flushing the batch once it is full.
    pub async fn submit(
        &mut self,
        replacements: ReplacementMapping,
        args: String,
        wants_output: bool,
        stdout_path: String,
        stderr_path: String,
    ) -> Result<(), TaskError> {
        let wants_output = wants_output || !stdout_path.is_empty() || !stderr_path.is_empty();
        self.batch.push(Task {
            id: Uuid::now_v7(),
            created_at: Utc::now(),
            args,
            wants_output,
            stdout_path,
            stderr_path,
            replacements,
        });

        if self.batch.len() >= self.batch_size {
            self.send_batch().await?;
        }
        Ok(())
    }

    async fn send_batch(&mut self) -> Result<(), TaskError> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let batch = std::mem::replace(&mut self.batch, Vec::with_capacity(self.batch_size));

        {
            let mut shared = self.shared.lock().await;
            for task in &batch {
                shared.tasks.insert(task.id, task.clone());
            }
        }

        let records: Vec<TaskRecord> = batch
            .iter()
            .map(|t| t.record(&self.execute, self.job_id))
            .collect();
        self.store.create_tasks(&records).await?;

        let request = BatchRequest {
            tasks: batch.iter().map(|t| (t.id, t.payload())).collect(),
        };
        let payload = request.encode()?;

        tracing::info!(
            job_id = %self.job_id,
            script = %self.execute,
            size = batch.len(),
            "submitting batch to worker pool"
        );

        let (tx, rx) = oneshot::channel::<JobUpdate>();
        let shared = Arc::clone(&self.shared);
        let job_id = self.job_id;
        self.listeners.spawn(async move {
            match rx.await {
                Ok(update) => handle_update(job_id, &shared, update).await,
                Err(_) => tracing::warn!(%job_id, "worker pool dropped batch callback"),
            }
        });

        self.pool.submit(WorkerRequest {
            id: Uuid::now_v7().to_string(),
            func_name: self.execute.to_lowercase(),
            payload,
            callback: Box::new(move |update| {
                let _ = tx.send(update);
            }),
        });
        self.batches_sent += 1;

        Ok(())
    }

    /// Flush pending tasks and wait for every batch to report back.
    ///
    /// Tasks of failed batches are absent from the results.
    pub async fn wait(mut self, cancel: &CancellationToken) -> Result<BatchResults, TaskError> {
        self.send_batch().await?;

        let drained = async {
            while let Some(res) = self.listeners.join_next().await {
                if let Err(e) = res {
                    tracing::error!(job_id = %self.job_id, error = %e, "batch listener failed");
                }
            }
        };
        tokio::select! {
            _ = cancel.cancelled() => return Err(TaskError::Cancelled),
            _ = drained => {}
        }

        let shared = std::mem::take(&mut *self.shared.lock().await);
        tracing::info!(
            job_id = %self.job_id,
            batches = self.batches_sent,
            tasks = shared.results.len(),
            "completed all batches"
        );
        Ok(shared.results)
    }
}

async fn handle_update(job_id: Uuid, shared: &Mutex<Shared>, update: JobUpdate) {
    tracing::debug!(%job_id, kind = update.kind(), "received job update from worker");

    let data = match update {
        JobUpdate::Complete(data) => data,
        JobUpdate::Fail | JobUpdate::Exception(_) => return,
    };
    let results = match BatchResults::decode(&data) {
        Ok(results) => results,
        Err(e) => {
            tracing::warn!(%job_id, error = %e, "failed to decode results of a batch");
            return;
        }
    };

    let mut shared = shared.lock().await;
    for (id, result) in results.results {
        let Some(task) = shared.tasks.get(&id).cloned() else {
            continue;
        };
        task.write_output(&result.stdout, &result.stderr).await;
        shared.results.results.insert(id, result);
    }
}
