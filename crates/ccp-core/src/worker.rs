//! Worker pool port.
//!
//! The worker pool runs client scripts out of process. Requests are
//! asynchronous: `submit` returns immediately and the pool invokes the
//! request's callback exactly once when the work finishes.

use std::fmt;

/// Outcome of a worker-pool request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobUpdate {
    /// The request ran; the payload holds the encoded results.
    Complete(Vec<u8>),
    /// The request could not run.
    Fail,
    /// The worker raised; the payload holds its description.
    Exception(Vec<u8>),
}

impl JobUpdate {
    pub fn kind(&self) -> &'static str {
        match self {
            JobUpdate::Complete(_) => "complete",
            JobUpdate::Fail => "fail",
            JobUpdate::Exception(_) => "exception",
        }
    }
}

pub type Callback = Box<dyn FnOnce(JobUpdate) + Send + 'static>;

/// One request to the worker pool.
pub struct WorkerRequest {
    /// Unique request id.
    pub id: String,
    /// Script identifier, lowercased.
    pub func_name: String,
    pub payload: Vec<u8>,
    pub callback: Callback,
}

impl fmt::Debug for WorkerRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerRequest")
            .field("id", &self.id)
            .field("func_name", &self.func_name)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Dispatches work to external workers.
///
/// Object-safe so the controller can hold an `Arc<dyn WorkerPool>` chosen at
/// startup.
pub trait WorkerPool: Send + Sync {
    fn submit(&self, request: WorkerRequest);
}
