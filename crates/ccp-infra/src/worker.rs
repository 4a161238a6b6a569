//! Local worker pool that runs client scripts as subprocesses.
//!
//! Each request names a script under `scripts_dir`. Every task of the batch
//! runs as `sh -c "<script> <arguments>"`, with at most
//! `max_concurrent_tasks` processes alive at once, and the collected exit
//! codes and output are handed back through the request callback.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ccp_core::task::{BatchRequest, BatchResults, TaskPayload, TaskResult};
use ccp_core::worker::{JobUpdate, WorkerPool, WorkerRequest};
use chrono::Utc;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Exit code reported for a task whose process could not be started or was
/// killed by a signal.
const ABNORMAL_EXIT: i32 = -1;

pub struct SubprocessWorkerPool {
    scripts_dir: PathBuf,
    limit: Arc<Semaphore>,
}

impl SubprocessWorkerPool {
    pub fn new(scripts_dir: impl Into<PathBuf>) -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self::with_concurrency(scripts_dir, parallelism)
    }

    pub fn with_concurrency(scripts_dir: impl Into<PathBuf>, max_concurrent_tasks: usize) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
            limit: Arc::new(Semaphore::new(max_concurrent_tasks.max(1))),
        }
    }

    /// Script path for a function name, if the script exists.
    fn script(&self, func_name: &str) -> Option<PathBuf> {
        if func_name.is_empty() || func_name.contains('/') || func_name.contains("..") {
            return None;
        }
        let path = self.scripts_dir.join(func_name);
        path.is_file().then_some(path)
    }
}

impl WorkerPool for SubprocessWorkerPool {
    fn submit(&self, request: WorkerRequest) {
        let WorkerRequest {
            id,
            func_name,
            payload,
            callback,
        } = request;

        let batch = match BatchRequest::decode(&payload) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(request_id = %id, func_name = %func_name, error = %e, "undecodable batch");
                callback(JobUpdate::Fail);
                return;
            }
        };
        let Some(script) = self.script(&func_name) else {
            tracing::warn!(request_id = %id, func_name = %func_name, "client script not found");
            callback(JobUpdate::Fail);
            return;
        };

        let limit = Arc::clone(&self.limit);
        tokio::spawn(async move {
            tracing::debug!(request_id = %id, func_name = %func_name, tasks = batch.tasks.len(), "running batch");
            let results = run_batch(&script, batch, limit).await;
            match results.encode() {
                Ok(data) => callback(JobUpdate::Complete(data)),
                Err(e) => callback(JobUpdate::Exception(e.to_string().into_bytes())),
            }
        });
    }
}

async fn run_batch(script: &Path, batch: BatchRequest, limit: Arc<Semaphore>) -> BatchResults {
    let mut set = JoinSet::new();
    for (id, task) in batch.tasks {
        let script = script.to_path_buf();
        let limit = Arc::clone(&limit);
        set.spawn(async move {
            let _permit = limit.acquire_owned().await.ok();
            (id, run_task(&script, &task).await)
        });
    }

    let mut results = BatchResults::default();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((id, result)) => {
                results.results.insert(id, result);
            }
            Err(e) => tracing::error!(error = %e, "task runner panicked"),
        }
    }
    results
}

async fn run_task(script: &Path, task: &TaskPayload) -> TaskResult {
    let command_line = format!("{} {}", script.display(), task.arguments);
    let output = Command::new("sh")
        .arg("-c")
        .arg(&command_line)
        .env("CCP_TASK_UUID", task.task_uuid.to_string())
        .kill_on_drop(true)
        .output()
        .await;

    match output {
        Ok(output) => {
            let exit_code = output.status.code().unwrap_or(ABNORMAL_EXIT);
            tracing::debug!(task_id = %task.task_uuid, exit_code, "task finished");
            TaskResult {
                exit_code,
                finished_at: Some(Utc::now()),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }
        }
        Err(e) => {
            tracing::warn!(task_id = %task.task_uuid, error = %e, "failed to start task");
            TaskResult {
                exit_code: ABNORMAL_EXIT,
                finished_at: Some(Utc::now()),
                stdout: String::new(),
                stderr: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use std::os::unix::fs::PermissionsExt;
    use tokio::sync::oneshot;
    use uuid::Uuid;

    fn write_script(dir: &Path, name: &str, body: &str) {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn batch(arguments: &[&str]) -> (Vec<Uuid>, Vec<u8>) {
        let mut tasks = IndexMap::new();
        let mut ids = Vec::new();
        for args in arguments {
            let id = Uuid::now_v7();
            ids.push(id);
            tasks.insert(
                id,
                TaskPayload {
                    task_uuid: id,
                    arguments: args.to_string(),
                    wants_output: true,
                    created_at: Utc::now(),
                },
            );
        }
        (ids, BatchRequest { tasks }.encode().unwrap())
    }

    async fn submit(pool: &SubprocessWorkerPool, func_name: &str, payload: Vec<u8>) -> JobUpdate {
        let (tx, rx) = oneshot::channel();
        pool.submit(WorkerRequest {
            id: Uuid::now_v7().to_string(),
            func_name: func_name.to_string(),
            payload,
            callback: Box::new(move |update| {
                let _ = tx.send(update);
            }),
        });
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn test_runs_every_task() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "echo_v0.0", r#"echo "$1"; exit "$2""#);
        let pool = SubprocessWorkerPool::with_concurrency(dir.path(), 2);

        let (ids, payload) = batch(&["one 0", "two 3", "three 0"]);
        let JobUpdate::Complete(data) = submit(&pool, "echo_v0.0", payload).await else {
            panic!("expected complete");
        };
        let results = BatchResults::decode(&data).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results.exit_code(), 3);
        assert_eq!(results.results[&ids[0]].stdout, "one\n");
        assert_eq!(results.results[&ids[1]].exit_code, 3);
        assert!(results.results[&ids[2]].finished_at.is_some());
    }

    #[tokio::test]
    async fn test_missing_script_fails() {
        let dir = tempfile::tempdir().unwrap();
        let pool = SubprocessWorkerPool::new(dir.path());
        let (_, payload) = batch(&["x"]);
        assert_eq!(submit(&pool, "missing_v0.0", payload).await, JobUpdate::Fail);

        let (_, payload) = batch(&["x"]);
        assert_eq!(submit(&pool, "../escape", payload).await, JobUpdate::Fail);
    }

    #[tokio::test]
    async fn test_undecodable_payload_fails() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "noop_v0.0", "exit 0");
        let pool = SubprocessWorkerPool::new(dir.path());
        assert_eq!(submit(&pool, "noop_v0.0", b"not json".to_vec()).await, JobUpdate::Fail);
    }
}
