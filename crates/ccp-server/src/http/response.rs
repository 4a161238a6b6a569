//! JSON envelope shared by every admin API response.
//!
//! ```json
//! {
//!   "data": [ { "id": "...", "name": "Approve normalization", "choices": [...] } ],
//!   "meta": { "request_id": "...", "timestamp": "...", "response_time_ms": 1 },
//!   "errors": [],
//!   "_links": { "self": "/api/v1/decisions" }
//! }
//! ```

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Identifies one request and measures how long the handler took.
pub struct RequestTimer {
    request_id: Uuid,
    started: Instant,
}

impl RequestTimer {
    pub fn start() -> Self {
        Self {
            request_id: Uuid::now_v7(),
            started: Instant::now(),
        }
    }

    fn meta(&self) -> ApiMeta {
        ApiMeta {
            request_id: self.request_id,
            timestamp: Utc::now(),
            response_time_ms: self.started.elapsed().as_millis() as u64,
        }
    }

    /// Wrap `data` in a success envelope.
    pub fn finish<T: Serialize>(&self, data: T) -> ApiResponse<T> {
        ApiResponse {
            data: Some(data),
            meta: self.meta(),
            errors: Vec::new(),
            links: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub meta: ApiMeta,
    /// Empty on success.
    pub errors: Vec<ApiErrorDetail>,
    #[serde(rename = "_links", skip_serializing_if = "BTreeMap::is_empty")]
    pub links: BTreeMap<&'static str, String>,
}

#[derive(Debug, Serialize)]
pub struct ApiMeta {
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub response_time_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorDetail {
    /// Machine-readable code, e.g. `DECISION_NOT_FOUND`.
    pub code: &'static str,
    pub message: String,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn with_link(mut self, rel: &'static str, href: impl Into<String>) -> Self {
        self.links.insert(rel, href.into());
        self
    }
}

impl ApiResponse<()> {
    /// Envelope carrying a single error and no data.
    pub fn error(code: &'static str, message: impl Into<String>) -> Self {
        let mut response = RequestTimer::start().finish(());
        response.data = None;
        response.errors.push(ApiErrorDetail {
            code,
            message: message.into(),
        });
        response
    }
}
